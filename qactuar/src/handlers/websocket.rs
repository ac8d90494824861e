//! WebSocket handler: the INIT → ACCEPTED → DISCONNECTED state machine
//! between the `websocket.*` events and the frame-level session state.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};

use crate::asgi::{AsgiChannel, Event, Scheme, Scope, WebSocketScope};
use crate::error::{QactuarError, QactuarResult};
use crate::request::Request;
use crate::response::Response;
use crate::websocket::{WebSocket, WsMessage};

/// RFC 6455 handshake GUID.
const WS_MAGIC: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketState {
    Init,
    Accepted,
    Disconnected,
}

/// Stage the `101 Switching Protocols` handshake response.
///
/// Fails when the client omitted `Sec-WebSocket-Key`; the pipeline turns
/// that into a 403.
pub fn shake_hand(request: &Request, response: &mut Response) -> QactuarResult<()> {
    let key = request.headers().get("sec-websocket-key").ok_or_else(|| {
        QactuarError::WebSocket("upgrade request without sec-websocket-key".to_string())
    })?;
    let mut digest = Sha1::new();
    digest.update(key.as_bytes());
    digest.update(WS_MAGIC);
    let accept = BASE64.encode(digest.finalize());

    response.status = b"101 Switching Protocols".to_vec();
    response.add_header("Upgrade", "websocket");
    response.add_header("Connection", "Upgrade");
    response.add_header("Sec-WebSocket-Accept", accept);
    Ok(())
}

pub struct WebSocketHandler<'a> {
    state: &'a mut WebSocketState,
    response: &'a mut Response,
    websocket: &'a mut WebSocket,
    incoming: Option<WsMessage>,
}

impl<'a> WebSocketHandler<'a> {
    pub fn new(
        state: &'a mut WebSocketState,
        response: &'a mut Response,
        websocket: &'a mut WebSocket,
        incoming: Option<WsMessage>,
    ) -> Self {
        Self {
            state,
            response,
            websocket,
            incoming,
        }
    }

    pub fn create_scope(
        request: &Request,
        scheme: Scheme,
        client: (String, u16),
        server: (String, u16),
    ) -> Scope {
        let subprotocols = request
            .headers()
            .get("sec-websocket-protocol")
            .map(|raw| {
                raw.split(',')
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Scope::WebSocket(WebSocketScope {
            http_version: request.request_version_num().to_string(),
            scheme,
            path: request.path().to_string(),
            raw_path: request.raw_path().to_vec(),
            query_string: request.query_string().to_vec(),
            root_path: String::new(),
            headers: request.raw_headers().to_vec(),
            client,
            server,
            subprotocols,
        })
    }
}

#[async_trait]
impl AsgiChannel for WebSocketHandler<'_> {
    async fn receive(&mut self) -> QactuarResult<Event> {
        match *self.state {
            WebSocketState::Init => Ok(Event::WebSocketConnect),
            WebSocketState::Accepted => match self.incoming.take() {
                Some(WsMessage::Text(text)) => Ok(Event::WebSocketReceive {
                    text: Some(text),
                    bytes: None,
                }),
                Some(WsMessage::Binary(bytes)) => Ok(Event::WebSocketReceive {
                    text: None,
                    bytes: Some(bytes),
                }),
                // Nothing left to deliver on this drive; let the
                // application's receive loop wind down.
                None => Ok(Event::WebSocketDisconnect {
                    code: self.websocket.close_code(),
                }),
            },
            WebSocketState::Disconnected => Ok(Event::WebSocketDisconnect {
                code: self.websocket.close_code(),
            }),
        }
    }

    async fn send(&mut self, event: Event) -> QactuarResult<()> {
        match event {
            Event::WebSocketAccept {
                subprotocol,
                headers,
            } => {
                for (name, value) in headers {
                    if name.eq_ignore_ascii_case(b"sec-websocket-protocol") {
                        self.websocket.subprotocol =
                            Some(String::from_utf8_lossy(&value).into_owned());
                    }
                    self.response.add_header(&name, &value);
                }
                if let Some(subprotocol) = subprotocol {
                    self.websocket
                        .accepted_subprotocols
                        .push(subprotocol.clone());
                    self.websocket.subprotocol = Some(subprotocol.clone());
                    self.response
                        .add_header("Sec-WebSocket-Protocol", subprotocol);
                }
                *self.state = WebSocketState::Accepted;
                Ok(())
            }
            Event::WebSocketClose { code } => {
                self.websocket.set_close_code(code);
                *self.state = WebSocketState::Disconnected;
                Ok(())
            }
            Event::WebSocketSend { text, bytes } => match (text, bytes) {
                (Some(text), None) => {
                    self.websocket.write_text(&text);
                    Ok(())
                }
                (None, Some(bytes)) => {
                    self.websocket.write_bytes(&bytes);
                    Ok(())
                }
                _ => Err(QactuarError::WebSocket(
                    "websocket.send requires exactly one of text or bytes".to_string(),
                )),
            },
            other => Err(QactuarError::Application(format!(
                "unexpected {} on the websocket channel",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request() -> Request {
        let mut request = Request::new();
        request.set_raw(
            b"GET /chat HTTP/1.1\r\n\
              Host: server.example.com\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Protocol: chat, superchat\r\n\r\n"
                .to_vec(),
        );
        request
    }

    #[test]
    fn handshake_matches_rfc_sample() {
        let request = upgrade_request();
        let mut response = Response::new();
        shake_hand(&request, &mut response).unwrap();
        assert_eq!(response.status, b"101 Switching Protocols");
        let raw = response.to_http();
        let text = String::from_utf8_lossy(&raw);
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[test]
    fn handshake_requires_key() {
        let mut request = Request::new();
        request.set_raw(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n".to_vec());
        let mut response = Response::new();
        assert!(shake_hand(&request, &mut response).is_err());
    }

    #[test]
    fn scope_carries_offered_subprotocols() {
        let request = upgrade_request();
        let scope = WebSocketHandler::create_scope(
            &request,
            Scheme::Http,
            ("127.0.0.1".to_string(), 40000),
            ("localhost".to_string(), 8000),
        );
        match scope {
            Scope::WebSocket(scope) => {
                assert_eq!(scope.subprotocols, vec!["chat", "superchat"]);
                assert_eq!(scope.path, "/chat");
            }
            _ => panic!("expected a websocket scope"),
        }
    }

    #[tokio::test]
    async fn accept_transitions_and_records_subprotocol() {
        let mut state = WebSocketState::Init;
        let mut response = Response::new();
        let mut ws = WebSocket::new();
        let mut handler = WebSocketHandler::new(&mut state, &mut response, &mut ws, None);

        assert_eq!(handler.receive().await.unwrap(), Event::WebSocketConnect);
        handler
            .send(Event::WebSocketAccept {
                subprotocol: Some("chat".to_string()),
                headers: vec![(b"x-extra".to_vec(), b"1".to_vec())],
            })
            .await
            .unwrap();
        assert_eq!(state, WebSocketState::Accepted);
        assert_eq!(ws.subprotocol.as_deref(), Some("chat"));
        assert_eq!(ws.accepted_subprotocols, vec!["chat"]);
        assert_eq!(response.headers.len(), 2);
    }

    #[tokio::test]
    async fn receive_delivers_exactly_one_message_kind() {
        let mut state = WebSocketState::Accepted;
        let mut response = Response::new();
        let mut ws = WebSocket::new();
        let mut handler = WebSocketHandler::new(
            &mut state,
            &mut response,
            &mut ws,
            Some(WsMessage::Text("hi".to_string())),
        );
        assert_eq!(
            handler.receive().await.unwrap(),
            Event::WebSocketReceive {
                text: Some("hi".to_string()),
                bytes: None
            }
        );
    }

    #[tokio::test]
    async fn close_records_code_and_disconnects() {
        let mut state = WebSocketState::Accepted;
        let mut response = Response::new();
        let mut ws = WebSocket::new();
        let mut handler = WebSocketHandler::new(&mut state, &mut response, &mut ws, None);
        handler
            .send(Event::WebSocketClose { code: 4001 })
            .await
            .unwrap();
        assert_eq!(state, WebSocketState::Disconnected);
        assert_eq!(ws.close_code(), 4001);

        let mut handler = WebSocketHandler::new(&mut state, &mut response, &mut ws, None);
        assert_eq!(
            handler.receive().await.unwrap(),
            Event::WebSocketDisconnect { code: 4001 }
        );
    }

    #[tokio::test]
    async fn send_requires_exactly_one_payload() {
        let mut state = WebSocketState::Accepted;
        let mut response = Response::new();
        let mut ws = WebSocket::new();
        let mut handler = WebSocketHandler::new(&mut state, &mut response, &mut ws, None);
        assert!(
            handler
                .send(Event::WebSocketSend {
                    text: None,
                    bytes: None
                })
                .await
                .is_err()
        );
        assert!(
            handler
                .send(Event::WebSocketSend {
                    text: Some("a".to_string()),
                    bytes: Some(b"b".to_vec())
                })
                .await
                .is_err()
        );
    }
}
