//! The RPC call lifecycle.
//!
//! One call runs Idle -> Sending -> AwaitingReply -> Decoding -> Done or
//! Failed, synchronously from its caller's point of view: the session's
//! socket is exclusively held for the whole exchange and replies arrive in
//! request order. Transport failures pass through a one-shot
//! reconnect-and-retry policy; a second failure is terminal and surfaces
//! the original failure. A negative reply status is not an error - it is
//! the call's result, paired with any merged error-stack entries.

use crate::api::{ApiEntry, ApiTable};
use crate::connection::{Connection, ConnectionConfig, Reconnector};
use crate::error::ClientError;
use bytes::Bytes;
use gridlink_protocol::frame::{MSG_API_REPLY, MSG_API_REQ, MSG_DISCONNECT};
use gridlink_protocol::{
    ErrorEntry, ErrorStack, Packer, Registry, Unpacker, Value, WireMessage,
};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;

/// Outcome of one call: the header's signed status, the decoded output
/// record when the endpoint declares one and the status is non-negative,
/// and the raw reply byte-stream.
#[derive(Debug)]
pub struct CallResult {
    pub status: i32,
    pub output: Option<Value>,
    pub bytestream: Bytes,
}

/// One client session: a socket, an endpoint table, a registry and the
/// pending error stack. No pipelining; calls serialize on the connection.
pub struct Session {
    config: ConnectionConfig,
    api_table: ApiTable,
    registry: Registry,
    conn: Mutex<Option<Connection>>,
    /// Guards the reconnect path, which replaces the socket handle.
    reconnect_lock: Mutex<()>,
    reconnector: Option<Box<dyn Reconnector>>,
    error_stack: StdMutex<ErrorStack>,
}

impl Session {
    pub fn new(config: ConnectionConfig) -> Session {
        Session {
            config,
            api_table: ApiTable::core(),
            registry: Registry::new(),
            conn: Mutex::new(None),
            reconnect_lock: Mutex::new(()),
            reconnector: None,
            error_stack: StdMutex::new(ErrorStack::new()),
        }
    }

    pub fn with_api_table(mut self, table: ApiTable) -> Self {
        self.api_table = table;
        self
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_reconnector(mut self, reconnector: Box<dyn Reconnector>) -> Self {
        self.reconnector = Some(reconnector);
        self
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        let conn = Connection::connect(&self.config).await?;
        *self.conn.lock().await = Some(conn);
        tracing::debug!("connected to {}", self.config.addr);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Diagnostics merged from reply error segments of the current call.
    pub fn error_stack(&self) -> Vec<ErrorEntry> {
        self.error_stack.lock().expect("error stack lock").entries.clone()
    }

    /// Runs one complete call against the endpoint.
    pub async fn call(
        &self,
        number: u32,
        input: Option<&Value>,
        input_bs: Option<Bytes>,
    ) -> Result<CallResult, ClientError> {
        let entry = self.api_table.lookup(number)?.clone();
        // a new call starts clean; replies within the call only append
        self.error_stack.lock().expect("error stack lock").entries.clear();

        let payload = match (&entry.in_type, input) {
            (Some(schema), Some(record)) => {
                Packer::new(&self.registry, self.config.encoding)
                    .pack(record, schema)?
                    .data
            }
            (Some(_), None) => return Err(ClientError::MissingInput(number)),
            (None, _) => Bytes::new(),
        };
        let bs = if entry.in_bs {
            input_bs.unwrap_or_default()
        } else {
            if input_bs.is_some() {
                tracing::warn!("endpoint {number} takes no byte-stream, dropping it");
            }
            Bytes::new()
        };
        let request = WireMessage::new(MSG_API_REQ, number as i32, payload, Bytes::new(), bs);

        let outcome = {
            let mut guard = self.conn.lock().await;
            match self.send_with_retry(&mut guard, &request).await {
                Ok(()) => self.read_reply(&mut guard, &entry).await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = &outcome {
            self.note_local_failure(e);
        }
        outcome
    }

    /// Re-enters the reply wait under the same endpoint context, for
    /// endpoints that emit interim replies before the final one.
    pub async fn next_reply(&self, number: u32) -> Result<CallResult, ClientError> {
        let entry = self.api_table.lookup(number)?.clone();
        let outcome = {
            let mut guard = self.conn.lock().await;
            self.read_reply(&mut guard, &entry).await
        };
        if let Err(e) = &outcome {
            self.note_local_failure(e);
        }
        outcome
    }

    /// Local failures join the remote diagnostics so the caller sees one
    /// concatenated stack for the call.
    fn note_local_failure(&self, e: &ClientError) {
        self.error_stack
            .lock()
            .expect("error stack lock")
            .push(e.code(), e.to_string());
    }

    /// Orderly shutdown: header-only DISCONNECT, then close.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            let bye = WireMessage::bare(MSG_DISCONNECT, 0);
            if let Err(e) = conn.send(&bye).await {
                tracing::debug!("disconnect send failed: {e}");
            }
            let _ = conn.shutdown().await;
        }
        Ok(())
    }

    async fn send_with_retry(
        &self,
        guard: &mut Option<Connection>,
        msg: &WireMessage,
    ) -> Result<(), ClientError> {
        let conn = guard.as_mut().ok_or(ClientError::NotConnected)?;
        match conn.send(msg).await {
            Ok(()) => Ok(()),
            Err(original) if original.is_retryable() => match self.reconnect(guard).await {
                Some(conn) => match conn.send(msg).await {
                    Ok(()) => {
                        tracing::debug!("send retry after reconnect succeeded");
                        Ok(())
                    }
                    Err(retry) => {
                        tracing::debug!("send retry failed: {retry}");
                        Err(original)
                    }
                },
                None => Err(original),
            },
            Err(e) => Err(e),
        }
    }

    async fn recv_with_retry(
        &self,
        guard: &mut Option<Connection>,
    ) -> Result<WireMessage, ClientError> {
        let conn = guard.as_mut().ok_or(ClientError::NotConnected)?;
        match conn.recv().await {
            Ok(msg) => Ok(msg),
            Err(e) if is_fatal_framing(&e) => {
                // corruption: the connection is dead, never retried
                tracing::error!("fatal framing corruption: {e}");
                *guard = None;
                Err(e)
            }
            Err(original) if original.is_retryable() => match self.reconnect(guard).await {
                Some(conn) => match conn.recv().await {
                    Ok(msg) => Ok(msg),
                    Err(retry) => {
                        tracing::debug!("recv retry failed: {retry}");
                        Err(original)
                    }
                },
                None => Err(original),
            },
            Err(e) => Err(e),
        }
    }

    /// One reconnect attempt under the reconnect lock, which serializes
    /// socket replacement.
    async fn reconnect<'g>(
        &self,
        guard: &'g mut Option<Connection>,
    ) -> Option<&'g mut Connection> {
        let reconnector = self.reconnector.as_ref()?;
        let _held = self.reconnect_lock.lock().await;
        tracing::warn!("transport failure, attempting reconnect");
        match reconnector.attempt_reconnect().await {
            Some(conn) => {
                *guard = Some(conn);
                guard.as_mut()
            }
            None => {
                tracing::warn!("reconnect attempt failed");
                None
            }
        }
    }

    async fn read_reply(
        &self,
        guard: &mut Option<Connection>,
        entry: &ApiEntry,
    ) -> Result<CallResult, ClientError> {
        let msg = self.recv_with_retry(guard).await?;
        if msg.header.msg_type != MSG_API_REPLY {
            return Err(ClientError::UnexpectedReply(msg.header.msg_type));
        }

        if !msg.error.is_empty() {
            match ErrorStack::decode(&msg.error) {
                Ok(stack) => self
                    .error_stack
                    .lock()
                    .expect("error stack lock")
                    .append(stack),
                Err(e) => tracing::warn!("undecodable error stack: {e}"),
            }
        }

        let status = msg.header.int_info;
        if status < 0 {
            // the negative status is the call's result; no output decode
            tracing::debug!("endpoint {} returned status {status}", entry.number);
            return Ok(CallResult {
                status,
                output: None,
                bytestream: msg.bs,
            });
        }

        let output = match &entry.out_type {
            Some(schema) if !msg.payload.is_empty() => Some(
                Unpacker::new(&self.registry, self.config.encoding)
                    .unpack(&msg.payload, schema)?,
            ),
            None if !msg.payload.is_empty() => {
                tracing::warn!("unexpected payload from endpoint {}", entry.number);
                None
            }
            _ => None,
        };

        let bytestream = if entry.out_bs {
            msg.bs
        } else {
            if !msg.bs.is_empty() {
                tracing::warn!("unexpected byte-stream from endpoint {}", entry.number);
            }
            Bytes::new()
        };

        Ok(CallResult {
            status,
            output,
            bytestream,
        })
    }
}

fn is_fatal_framing(e: &ClientError) -> bool {
    matches!(e, ClientError::Protocol(p) if p.is_fatal_framing())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(ConnectionConfig::new("127.0.0.1:7427".parse().unwrap()))
    }

    #[tokio::test]
    async fn test_call_requires_connection() {
        let s = session();
        let err = s.call(100, None, None).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_unknown_endpoint_fails_before_io() {
        let s = session();
        let err = s.call(31337, None, None).await.unwrap_err();
        assert!(matches!(err, ClientError::UnknownEndpoint(31337)));
    }

    #[tokio::test]
    async fn test_declared_input_schema_requires_input() {
        let s = session();
        // endpoint 210 declares KeyValPair_PI input
        let err = s.call(210, None, None).await.unwrap_err();
        assert!(matches!(err, ClientError::MissingInput(210)));
    }
}
