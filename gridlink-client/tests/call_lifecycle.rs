//! End-to-end call lifecycle tests against an in-process TCP server.

use bytes::{Bytes, BytesMut};
use gridlink_client::{ApiEntry, ApiTable, ClientError, Connection, ConnectionConfig, Reconnector, Session};
use gridlink_protocol::frame::{MSG_API_REPLY, MSG_DISCONNECT};
use gridlink_protocol::{
    ErrorStack, Packer, Registry, Unpacker, Value, WireEncoding, WireMessage,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

fn test_registry() -> Registry {
    Registry::new().with_local("TestCount_PI", "int count;")
}

fn test_api_table() -> ApiTable {
    ApiTable::new()
        .with_entry(
            ApiEntry::new(42)
                .with_input("TestCount_PI")
                .with_output("TestCount_PI"),
        )
        .with_entry(ApiEntry::new(43).with_input_bs().with_output_bs())
}

fn test_session(addr: SocketAddr, encoding: WireEncoding) -> Session {
    Session::new(ConnectionConfig::new(addr).with_encoding(encoding))
        .with_api_table(test_api_table())
        .with_registry(test_registry())
}

async fn read_message(stream: &mut TcpStream, buf: &mut BytesMut) -> Option<WireMessage> {
    loop {
        if let Some(msg) = WireMessage::decode(buf).unwrap() {
            return Some(msg);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn pack_count(encoding: WireEncoding, count: i32) -> Bytes {
    let registry = test_registry();
    let record = Value::record([("count", Value::Int(count))]);
    Packer::new(&registry, encoding)
        .pack(&record, "TestCount_PI")
        .unwrap()
        .data
}

fn unpack_count(encoding: WireEncoding, payload: &[u8]) -> i32 {
    let registry = test_registry();
    Unpacker::new(&registry, encoding)
        .unpack(payload, "TestCount_PI")
        .unwrap()
        .get("count")
        .and_then(Value::as_int)
        .unwrap()
}

/// Echo server: endpoint 42 replies count+1 with status 0; endpoint 43
/// mirrors the request byte-stream back.
async fn spawn_echo_server(encoding: WireEncoding) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                while let Some(msg) = read_message(&mut stream, &mut buf).await {
                    if msg.header.msg_type == MSG_DISCONNECT {
                        break;
                    }
                    let reply = match msg.header.int_info {
                        42 => {
                            let count = unpack_count(encoding, &msg.payload);
                            WireMessage::new(
                                MSG_API_REPLY,
                                0,
                                pack_count(encoding, count + 1),
                                Bytes::new(),
                                Bytes::new(),
                            )
                        }
                        43 => WireMessage::new(
                            MSG_API_REPLY,
                            0,
                            Bytes::new(),
                            Bytes::new(),
                            msg.bs.clone(),
                        ),
                        _ => WireMessage::new(
                            MSG_API_REPLY,
                            -1,
                            Bytes::new(),
                            Bytes::new(),
                            Bytes::new(),
                        ),
                    };
                    stream.write_all(&reply.encode().unwrap()).await.unwrap();
                }
            });
        }
    });
    addr
}

/// Server replying a fixed negative status with an error stack and no
/// payload.
async fn spawn_negative_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = BytesMut::new();
        while let Some(_msg) = read_message(&mut stream, &mut buf).await {
            let mut stack = ErrorStack::new();
            stack.push(-808000, "boom");
            let reply = WireMessage::new(
                MSG_API_REPLY,
                -808000,
                Bytes::new(),
                stack.encode().unwrap(),
                Bytes::new(),
            );
            stream.write_all(&reply.encode().unwrap()).await.unwrap();
        }
    });
    addr
}

/// Server emitting two replies per request: an interim count+1 and a final
/// count+2, both status 0.
async fn spawn_streaming_server(encoding: WireEncoding) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = BytesMut::new();
        while let Some(msg) = read_message(&mut stream, &mut buf).await {
            if msg.header.msg_type == MSG_DISCONNECT {
                break;
            }
            let count = unpack_count(encoding, &msg.payload);
            for step in 1..=2 {
                let reply = WireMessage::new(
                    MSG_API_REPLY,
                    0,
                    pack_count(encoding, count + step),
                    Bytes::new(),
                    Bytes::new(),
                );
                stream.write_all(&reply.encode().unwrap()).await.unwrap();
            }
        }
    });
    addr
}

/// Server that resets every accepted connection immediately; writes to it
/// fail once the reset lands.
async fn spawn_reset_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            stream.set_linger(Some(Duration::ZERO)).unwrap();
            drop(stream);
        }
    });
    addr
}

/// Server that accepts, reads the request, and never replies.
async fn spawn_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });
    addr
}

/// Server that closes accepted connections without sending anything, so a
/// pending read sees EOF.
async fn spawn_closing_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            drop(stream);
        }
    });
    addr
}

struct TestReconnector {
    target: SocketAddr,
    attempts: Arc<AtomicUsize>,
    request_timeout: Option<Duration>,
}

#[async_trait::async_trait]
impl Reconnector for TestReconnector {
    async fn attempt_reconnect(&self) -> Option<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let stream = TcpStream::connect(self.target).await.ok()?;
        Some(Connection::from_stream(stream, self.request_timeout))
    }
}

#[tokio::test]
async fn test_end_to_end_echo_binary() {
    let addr = spawn_echo_server(WireEncoding::Binary).await;
    let session = test_session(addr, WireEncoding::Binary);
    session.connect().await.unwrap();

    let input = Value::record([("count", Value::Int(5))]);
    let result = session.call(42, Some(&input), None).await.unwrap();

    assert_eq!(result.status, 0);
    let output = result.output.unwrap();
    assert_eq!(output.get("count").and_then(Value::as_int), Some(6));
    assert!(session.error_stack().is_empty());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_end_to_end_echo_xml() {
    let addr = spawn_echo_server(WireEncoding::Xml).await;
    let session = test_session(addr, WireEncoding::Xml);
    session.connect().await.unwrap();

    let input = Value::record([("count", Value::Int(5))]);
    let result = session.call(42, Some(&input), None).await.unwrap();

    assert_eq!(result.status, 0);
    assert_eq!(
        result.output.unwrap().get("count").and_then(Value::as_int),
        Some(6)
    );
}

#[tokio::test]
async fn test_byte_stream_passthrough() {
    let addr = spawn_echo_server(WireEncoding::Binary).await;
    let session = test_session(addr, WireEncoding::Binary);
    session.connect().await.unwrap();

    let bs = Bytes::from(vec![7u8; 512]);
    let result = session.call(43, None, Some(bs.clone())).await.unwrap();
    assert_eq!(result.status, 0);
    assert!(result.output.is_none());
    assert_eq!(result.bytestream, bs);
}

#[tokio::test]
async fn test_negative_result_with_error_stack() {
    let addr = spawn_negative_server().await;
    let session = test_session(addr, WireEncoding::Binary);
    session.connect().await.unwrap();

    let input = Value::record([("count", Value::Int(5))]);
    let result = session.call(42, Some(&input), None).await.unwrap();

    assert_eq!(result.status, -808000);
    assert!(result.output.is_none());

    let stack = session.error_stack();
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].status, -808000);
    assert_eq!(stack[0].message, "boom");
}

#[tokio::test]
async fn test_streaming_interim_replies() {
    let addr = spawn_streaming_server(WireEncoding::Binary).await;
    let session = test_session(addr, WireEncoding::Binary);
    session.connect().await.unwrap();

    let input = Value::record([("count", Value::Int(10))]);
    let first = session.call(42, Some(&input), None).await.unwrap();
    assert_eq!(
        first.output.unwrap().get("count").and_then(Value::as_int),
        Some(11)
    );

    let second = session.next_reply(42).await.unwrap();
    assert_eq!(
        second.output.unwrap().get("count").and_then(Value::as_int),
        Some(12)
    );
}

#[tokio::test]
async fn test_reconnect_once_recovers_failed_send() {
    let dead = spawn_reset_server().await;
    let live = spawn_echo_server(WireEncoding::Binary).await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let session = Session::new(ConnectionConfig::new(dead))
        .with_api_table(test_api_table())
        .with_registry(test_registry())
        .with_reconnector(Box::new(TestReconnector {
            target: live,
            attempts: attempts.clone(),
            request_timeout: Some(Duration::from_secs(5)),
        }));

    session.connect().await.unwrap();
    // give the reset time to land so the next write fails
    tokio::time::sleep(Duration::from_millis(100)).await;

    let input = Value::record([("count", Value::Int(5))]);
    let result = session.call(42, Some(&input), None).await.unwrap();

    assert_eq!(result.status, 0);
    assert_eq!(
        result.output.unwrap().get("count").and_then(Value::as_int),
        Some(6)
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_failure_returns_original_error() {
    let silent = spawn_silent_server().await;
    let closing = spawn_closing_server().await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let session = Session::new(
        ConnectionConfig::new(silent).with_request_timeout(Some(Duration::from_millis(150))),
    )
    .with_api_table(test_api_table())
    .with_registry(test_registry())
    .with_reconnector(Box::new(TestReconnector {
        target: closing,
        attempts: attempts.clone(),
        request_timeout: Some(Duration::from_millis(150)),
    }));

    session.connect().await.unwrap();

    let input = Value::record([("count", Value::Int(5))]);
    let err = session.call(42, Some(&input), None).await.unwrap_err();

    // the original timeout is reported, not the retry's connection error
    assert!(matches!(err, ClientError::Timeout), "got {err:?}");
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_reconnector_means_no_retry() {
    let silent = spawn_silent_server().await;
    let session = Session::new(
        ConnectionConfig::new(silent).with_request_timeout(Some(Duration::from_millis(100))),
    )
    .with_api_table(test_api_table())
    .with_registry(test_registry());

    session.connect().await.unwrap();
    let input = Value::record([("count", Value::Int(5))]);
    let err = session.call(42, Some(&input), None).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
}

#[tokio::test]
async fn test_close_sends_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = BytesMut::new();
        while let Some(msg) = read_message(&mut stream, &mut buf).await {
            let _ = tx.send(msg.header.msg_type);
        }
    });

    let session = test_session(addr, WireEncoding::Binary);
    session.connect().await.unwrap();
    assert!(session.is_connected().await);
    session.close().await.unwrap();
    assert!(!session.is_connected().await);

    let msg_type = rx.recv().await.unwrap();
    assert_eq!(msg_type, MSG_DISCONNECT);
}
