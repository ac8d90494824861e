//! End-to-end pipeline tests over in-memory duplex streams.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

use qactuar::asgi::{AsgiApp, AsgiChannel, Event, Scheme, Scope};
use qactuar::config::Config;
use qactuar::error::{QactuarError, QactuarResult};
use qactuar::pipeline::Pipeline;
use qactuar::router::AppTable;
use qactuar::websocket::{Frame, Opcode};

fn test_config() -> Arc<Config> {
    let mut config = Config::default();
    config.recv_timeout = 0.01;
    config.request_timeout = 0.25;
    Arc::new(config)
}

fn spawn_pipeline(table: AppTable) -> (DuplexStream, tokio::task::JoinHandle<()>) {
    let (client, server_side) = duplex(1 << 16);
    let pipeline = Pipeline::new(
        server_side,
        test_config(),
        Arc::new(table),
        Scheme::Http,
        ("testhost".to_string(), 8000),
        ("127.0.0.1".to_string(), 40000),
    );
    let task = tokio::spawn(pipeline.run());
    (client, task)
}

async fn exchange(table: AppTable, request: &[u8]) -> Vec<u8> {
    let (mut client, task) = spawn_pipeline(table);
    client.write_all(request).await.unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    task.await.unwrap();
    out
}

async fn read_http_head(client: &mut DuplexStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        client.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    head
}

fn count_headers(raw: &[u8], name: &str) -> usize {
    String::from_utf8_lossy(raw)
        .lines()
        .filter(|line| {
            line.to_ascii_lowercase()
                .starts_with(&format!("{}:", name.to_ascii_lowercase()))
        })
        .count()
}

// ---- test applications ----

struct StaticApp(&'static [u8]);

#[async_trait]
impl AsgiApp for StaticApp {
    async fn call(&self, _scope: Scope, channel: &mut dyn AsgiChannel) -> QactuarResult<()> {
        match channel.receive().await? {
            Event::HttpRequest { .. } => {
                channel
                    .send(Event::HttpResponseStart {
                        status: 200,
                        headers: Vec::new(),
                    })
                    .await?;
                channel
                    .send(Event::HttpResponseBody {
                        body: self.0.to_vec(),
                        more_body: false,
                    })
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

struct BodyEchoApp;

#[async_trait]
impl AsgiApp for BodyEchoApp {
    async fn call(&self, _scope: Scope, channel: &mut dyn AsgiChannel) -> QactuarResult<()> {
        match channel.receive().await? {
            Event::HttpRequest { body, .. } => {
                channel
                    .send(Event::HttpResponseStart {
                        status: 200,
                        headers: vec![(
                            b"content-length".to_vec(),
                            body.len().to_string().into_bytes(),
                        )],
                    })
                    .await?;
                channel
                    .send(Event::HttpResponseBody {
                        body,
                        more_body: false,
                    })
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

struct ScopeCaptureApp {
    scopes: Arc<Mutex<Vec<Scope>>>,
}

#[async_trait]
impl AsgiApp for ScopeCaptureApp {
    async fn call(&self, scope: Scope, channel: &mut dyn AsgiChannel) -> QactuarResult<()> {
        match channel.receive().await? {
            Event::HttpRequest { .. } => {
                self.scopes.lock().unwrap().push(scope);
                channel
                    .send(Event::HttpResponseStart {
                        status: 200,
                        headers: Vec::new(),
                    })
                    .await?;
                channel
                    .send(Event::HttpResponseBody {
                        body: b"ok".to_vec(),
                        more_body: false,
                    })
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

struct FailingApp;

#[async_trait]
impl AsgiApp for FailingApp {
    async fn call(&self, _scope: Scope, channel: &mut dyn AsgiChannel) -> QactuarResult<()> {
        match channel.receive().await? {
            Event::HttpRequest { .. } => {
                Err(QactuarError::Application("boom".to_string()))
            }
            _ => Ok(()),
        }
    }
}

struct TeapotApp;

#[async_trait]
impl AsgiApp for TeapotApp {
    async fn call(&self, _scope: Scope, channel: &mut dyn AsgiChannel) -> QactuarResult<()> {
        match channel.receive().await? {
            Event::HttpRequest { .. } => Err(QactuarError::Http(418)),
            _ => Ok(()),
        }
    }
}

struct StreamingApp;

#[async_trait]
impl AsgiApp for StreamingApp {
    async fn call(&self, _scope: Scope, channel: &mut dyn AsgiChannel) -> QactuarResult<()> {
        match channel.receive().await? {
            Event::HttpRequest { .. } => {
                channel
                    .send(Event::HttpResponseStart {
                        status: 200,
                        headers: Vec::new(),
                    })
                    .await?;
                channel
                    .send(Event::HttpResponseBody {
                        body: b"part1".to_vec(),
                        more_body: true,
                    })
                    .await?;
                channel
                    .send(Event::HttpResponseBody {
                        body: b"part2".to_vec(),
                        more_body: false,
                    })
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

struct WsEchoApp;

#[async_trait]
impl AsgiApp for WsEchoApp {
    async fn call(&self, scope: Scope, channel: &mut dyn AsgiChannel) -> QactuarResult<()> {
        match scope {
            Scope::WebSocket(_) => loop {
                match channel.receive().await? {
                    Event::WebSocketConnect => {
                        channel
                            .send(Event::WebSocketAccept {
                                subprotocol: None,
                                headers: Vec::new(),
                            })
                            .await?;
                    }
                    Event::WebSocketReceive { text, bytes } => {
                        channel.send(Event::WebSocketSend { text, bytes }).await?;
                    }
                    Event::WebSocketDisconnect { .. } => return Ok(()),
                    _ => return Ok(()),
                }
            },
            _ => Ok(()),
        }
    }
}

fn single_app_table(app: Arc<dyn AsgiApp>) -> AppTable {
    let mut table = AppTable::new();
    table.register("/", app);
    table
}

const UPGRADE_REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
    Host: localhost\r\n\
    Connection: Upgrade\r\n\
    Upgrade: websocket\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

// ---- scenarios ----

#[tokio::test]
async fn get_root_returns_framed_response() {
    let out = exchange(
        single_app_table(Arc::new(StaticApp(b"hi"))),
        b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )
    .await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 200\r\n"), "got: {text}");
    assert_eq!(count_headers(&out, "date"), 1);
    assert_eq!(count_headers(&out, "server"), 1);
    assert_eq!(count_headers(&out, "x-request-id"), 1);
    assert!(text.contains("Server: Qactuar "));
    assert!(text.ends_with("\r\n\r\nhi"));
}

#[tokio::test]
async fn post_body_is_echoed() {
    let out = exchange(
        single_app_table(Arc::new(BodyEchoApp)),
        b"POST /items HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello",
    )
    .await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 200\r\n"));
    assert!(text.contains("content-length: 5\r\n"));
    assert!(text.ends_with("hello"));
}

#[tokio::test]
async fn route_prefix_is_stripped_from_scope_path() {
    let scopes = Arc::new(Mutex::new(Vec::new()));
    let mut table = AppTable::new();
    table.register(
        "/api",
        Arc::new(ScopeCaptureApp {
            scopes: Arc::clone(&scopes),
        }),
    );
    table.register("/", Arc::new(StaticApp(b"fallback")));

    let out = exchange(table, b"GET /api/foo HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(String::from_utf8_lossy(&out).ends_with("ok"));

    let scopes = scopes.lock().unwrap();
    assert_eq!(scopes.len(), 1);
    match &scopes[0] {
        Scope::Http(scope) => {
            assert_eq!(scope.path, "/foo");
            assert_eq!(scope.raw_path, b"/api/foo");
            assert_eq!(scope.method, "GET");
            assert_eq!(scope.scheme, Scheme::Http);
            assert_eq!(scope.server, ("testhost".to_string(), 8000));
        }
        _ => panic!("expected an http scope"),
    }
}

#[tokio::test]
async fn missing_route_yields_404() {
    let mut table = AppTable::new();
    table.register("/api", Arc::new(StaticApp(b"api")));
    let out = exchange(table, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 404\r\n"));
    assert!(text.ends_with("\r\n\r\n404"));
}

#[tokio::test]
async fn application_failure_yields_500() {
    let out = exchange(
        single_app_table(Arc::new(FailingApp)),
        b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )
    .await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 500\r\n"));
    assert!(text.ends_with("Internal Server Error"));
}

#[tokio::test]
async fn http_error_code_is_passed_through() {
    let out = exchange(
        single_app_table(Arc::new(TeapotApp)),
        b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )
    .await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 418\r\n"));
    assert!(text.ends_with("418"));
}

#[tokio::test]
async fn malformed_request_closes_without_writing() {
    let out = exchange(
        single_app_table(Arc::new(StaticApp(b"hi"))),
        b"GARBAGE\r\n\r\n",
    )
    .await;
    assert!(out.is_empty(), "expected silent close, got: {out:?}");
}

#[tokio::test]
async fn streamed_response_uses_chunked_encoding() {
    let out = exchange(
        single_app_table(Arc::new(StreamingApp)),
        b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )
    .await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 200\r\n"));
    assert!(text.contains("transfer-encoding: chunked\r\n"));
    assert!(text.contains("5\r\npart1\r\n"));
    assert!(text.contains("5\r\npart2\r\n"));
    assert!(text.ends_with("0\r\n\r\n"));
}

#[tokio::test]
async fn websocket_handshake_matches_rfc_sample() {
    let (mut client, task) = spawn_pipeline(single_app_table(Arc::new(WsEchoApp)));
    client.write_all(UPGRADE_REQUEST).await.unwrap();

    let head = read_http_head(&mut client).await;
    let text = String::from_utf8_lossy(&head);
    assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(text.contains("Upgrade: websocket\r\n"));
    assert!(text.contains("Connection: Upgrade\r\n"));
    assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

    // Close the session from the client side.
    let close = Frame::encode(true, Opcode::Close, &1000u16.to_be_bytes(), Some([1, 2, 3, 4]));
    client.write_all(&close).await.unwrap();

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn websocket_text_message_is_echoed() {
    let (mut client, task) = spawn_pipeline(single_app_table(Arc::new(WsEchoApp)));
    client.write_all(UPGRADE_REQUEST).await.unwrap();
    read_http_head(&mut client).await;

    let frame = Frame::encode(true, Opcode::Text, b"hi", Some([9, 8, 7, 6]));
    client.write_all(&frame).await.unwrap();

    // The echo comes back unmasked: FIN+TEXT, length 2, payload "hi".
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, [0x81, 0x02, b'h', b'i']);

    let close = Frame::encode(true, Opcode::Close, &1000u16.to_be_bytes(), Some([1, 2, 3, 4]));
    client.write_all(&close).await.unwrap();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn websocket_ping_is_answered_with_matching_pong() {
    let (mut client, task) = spawn_pipeline(single_app_table(Arc::new(WsEchoApp)));
    client.write_all(UPGRADE_REQUEST).await.unwrap();
    read_http_head(&mut client).await;

    let ping = Frame::encode(true, Opcode::Ping, b"tick", Some([4, 4, 4, 4]));
    client.write_all(&ping).await.unwrap();

    let mut pong = [0u8; 6];
    client.read_exact(&mut pong).await.unwrap();
    assert_eq!(pong, [0x8A, 0x04, b't', b'i', b'c', b'k']);

    let close = Frame::encode(true, Opcode::Close, &1000u16.to_be_bytes(), Some([1, 2, 3, 4]));
    client.write_all(&close).await.unwrap();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn unmasked_client_frame_terminates_the_session() {
    let (mut client, task) = spawn_pipeline(single_app_table(Arc::new(WsEchoApp)));
    client.write_all(UPGRADE_REQUEST).await.unwrap();
    read_http_head(&mut client).await;

    let frame = Frame::encode(true, Opcode::Text, b"hi", None);
    client.write_all(&frame).await.unwrap();

    // No echo arrives; the server closes the connection.
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    task.await.unwrap();
}
