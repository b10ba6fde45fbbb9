//! Connection management.

use crate::error::ClientError;
use async_trait::async_trait;
use bytes::Bytes;
use gridlink_protocol::{MsgHeader, ProtocolError, WireEncoding, WireMessage, MAX_HEADER_LEN};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Transport read timeout; None blocks indefinitely.
    pub request_timeout: Option<Duration>,
    /// Negotiated payload encoding. The message header is always XML.
    pub encoding: WireEncoding,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> ConnectionConfig {
        ConnectionConfig {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Some(Duration::from_secs(30)),
            encoding: WireEncoding::Binary,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_encoding(mut self, encoding: WireEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// External reconnection primitive. An implementation re-establishes the
/// session's secondary channel and hands back the replacement connection;
/// the session swaps its socket handle under the reconnect lock.
#[async_trait]
pub trait Reconnector: Send + Sync {
    async fn attempt_reconnect(&self) -> Option<Connection>;
}

/// One TCP connection speaking the framed wire protocol.
pub struct Connection {
    stream: TcpStream,
    request_timeout: Option<Duration>,
}

impl Connection {
    /// Connects and configures the socket.
    pub async fn connect(config: &ConnectionConfig) -> Result<Connection, ClientError> {
        tracing::debug!("connecting to {}", config.addr);
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(ClientError::Io)?;
        stream.set_nodelay(true).ok();
        Ok(Connection {
            stream,
            request_timeout: config.request_timeout,
        })
    }

    /// Wraps an already-established stream (reconnectors, tests).
    pub fn from_stream(stream: TcpStream, request_timeout: Option<Duration>) -> Connection {
        Connection {
            stream,
            request_timeout,
        }
    }

    /// Writes one framed message.
    pub async fn send(&mut self, msg: &WireMessage) -> Result<(), ClientError> {
        let encoded = msg.encode()?;
        tracing::trace!(
            "sending {} ({} bytes)",
            msg.header.msg_type,
            encoded.len()
        );
        self.stream
            .write_all(&encoded)
            .await
            .map_err(ClientError::Io)
    }

    /// Reads one framed message under the configured timeout.
    pub async fn recv(&mut self) -> Result<WireMessage, ClientError> {
        match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.recv_inner())
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => self.recv_inner().await,
        }
    }

    /// Strict two-phase read: length prefix and header first, then each
    /// declared segment in order. The phases never reorder.
    async fn recv_inner(&mut self) -> Result<WireMessage, ClientError> {
        let mut len_buf = [0u8; 4];
        self.read_exact(&mut len_buf).await?;
        let header_len = i32::from_be_bytes(len_buf) as i64;
        if header_len <= 0 || header_len as usize > MAX_HEADER_LEN {
            return Err(ClientError::Protocol(ProtocolError::HeaderLength(
                header_len,
            )));
        }

        let mut header_buf = vec![0u8; header_len as usize];
        self.read_exact(&mut header_buf).await?;
        let header = MsgHeader::decode(&header_buf)?;
        tracing::trace!(
            "received {} header: msgLen={} errorLen={} bsLen={} intInfo={}",
            header.msg_type,
            header.msg_len,
            header.error_len,
            header.bs_len,
            header.int_info
        );

        let payload = self.read_segment(header.msg_len as usize).await?;
        let error = self.read_segment(header.error_len as usize).await?;
        let bs = self.read_segment(header.bs_len as usize).await?;

        Ok(WireMessage {
            header,
            payload,
            error,
            bs,
        })
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ClientError> {
        self.stream.read_exact(buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ClientError::ConnectionClosed
            } else {
                ClientError::Io(e)
            }
        })?;
        Ok(())
    }

    async fn read_segment(&mut self, len: usize) -> Result<Bytes, ClientError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Shuts the write half down; the peer sees EOF.
    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await.map_err(ClientError::Io)
    }
}
