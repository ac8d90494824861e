//! Per-connection pipeline: read, parse, dispatch to an application,
//! serialize, tear down.
//!
//! Every execution model funnels accepted sockets through this type.
//! Errors are trapped here and converted into HTTP responses; nothing
//! escapes into the accept loops. The stream is generic so tests can
//! drive the pipeline over in-memory duplex streams.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::asgi::{AsgiApp, Scheme};
use crate::config::Config;
use crate::error::{QactuarError, QactuarResult};
use crate::handlers::{HttpHandler, WebSocketHandler, WebSocketState, shake_hand};
use crate::request::Request;
use crate::response::Response;
use crate::router::AppTable;
use crate::util::BytesList;
use crate::websocket::{Frame, FrameParse, WebSocket, WsMessage};

pub struct Pipeline<S> {
    stream: S,
    config: Arc<Config>,
    apps: Arc<AppTable>,
    scheme: Scheme,
    server_info: (String, u16),
    client_info: (String, u16),
    request: Request,
    response: Response,
    response_streamed: bool,
    ws_state: WebSocketState,
    websocket: WebSocket,
    ws_buf: Vec<u8>,
    app: Option<Arc<dyn AsgiApp>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Pipeline<S> {
    pub fn new(
        stream: S,
        config: Arc<Config>,
        apps: Arc<AppTable>,
        scheme: Scheme,
        server_info: (String, u16),
        client_info: (String, u16),
    ) -> Self {
        Self {
            stream,
            config,
            apps,
            scheme,
            server_info,
            client_info,
            request: Request::new(),
            response: Response::new(),
            response_streamed: false,
            ws_state: WebSocketState::Init,
            websocket: WebSocket::new(),
            ws_buf: Vec::new(),
            app: None,
        }
    }

    /// Serve exactly one request (or one WebSocket session) and close.
    pub async fn run(mut self) {
        self.get_request_data().await;
        if self.request.is_empty() {
            debug!(target: "qactuar::child", "no parseable request received, closing");
            self.close().await;
            return;
        }
        if self.is_websocket_upgrade() {
            self.handle_websocket().await;
        } else {
            self.handle_http().await;
        }
    }

    /// Read until the request is complete or the request timeout lapses.
    /// Incomplete input leaves the request empty, which the caller turns
    /// into a silent close.
    async fn get_request_data(&mut self) {
        let started = Instant::now();
        let recv_timeout = self.config.recv_timeout();
        let request_timeout = self.config.request_timeout();
        let mut data = BytesList::new();
        let mut buf = vec![0u8; self.config.recv_bytes.max(1)];

        let complete = loop {
            match timeout(recv_timeout, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => break self.request_complete(),
                Ok(Ok(read)) => {
                    data.write(&buf[..read]);
                    self.request.set_raw(data.read());
                    if self.request_complete() {
                        break true;
                    }
                }
                Ok(Err(err)) => {
                    debug!(target: "qactuar::child", "recv failed: {err}");
                    break false;
                }
                Err(_elapsed) => {}
            }
            if started.elapsed() > request_timeout {
                debug!(target: "qactuar::child", "no complete request received, timing out");
                break self.request_complete();
            }
        };
        if !complete {
            self.request.set_raw(Vec::new());
        }
    }

    /// A request is complete when headers are complete and either no body
    /// is expected (no content-length, or a GET) or the body has reached
    /// the declared length.
    fn request_complete(&self) -> bool {
        if !self.request.headers_complete {
            return false;
        }
        if self.request.method() == "GET" {
            return true;
        }
        match self
            .request
            .headers()
            .get("content-length")
            .and_then(|value| value.parse::<usize>().ok())
        {
            Some(length) => self.request.body().len() >= length,
            None => true,
        }
    }

    fn is_websocket_upgrade(&self) -> bool {
        let headers = self.request.headers();
        headers
            .get("connection")
            .is_some_and(|value| value.to_ascii_lowercase().contains("upgrade"))
            && headers
                .get("upgrade")
                .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
    }

    /// Resolve (and cache) the application for this request, rewriting
    /// the scoped path when a non-root prefix matched.
    fn resolve_app(&mut self) -> QactuarResult<Arc<dyn AsgiApp>> {
        if let Some(app) = &self.app {
            return Ok(Arc::clone(app));
        }
        let (app, scoped) = self.apps.resolve(self.request.path())?;
        self.request.set_path(scoped);
        self.app = Some(Arc::clone(&app));
        Ok(app)
    }

    // ---- HTTP ----

    async fn handle_http(&mut self) {
        match self.drive_http_app(false).await {
            Ok(()) => {}
            Err(QactuarError::Http(code)) => self.error_response(code),
            Err(QactuarError::RouteNotFound(_)) => self.error_response(404),
            Err(QactuarError::Socket(err)) => {
                error!(
                    target: "qactuar::exception",
                    request_id = %self.request.request_id(),
                    "send failed: {err}"
                );
                self.close().await;
                return;
            }
            Err(err) => {
                error!(
                    target: "qactuar::exception",
                    request_id = %self.request.request_id(),
                    "application error: {err}"
                );
                self.response.set_status(500);
                self.response.body.write(&b"Internal Server Error"[..]);
            }
        }
        self.finish_response().await;
    }

    async fn drive_http_app(&mut self, closing: bool) -> QactuarResult<()> {
        let app = self.resolve_app()?;
        let scope = HttpHandler::<S>::create_scope(
            &self.request,
            self.scheme,
            self.client_info.clone(),
            self.server_info.clone(),
        );
        let mut handler = HttpHandler::new(
            &mut self.stream,
            &self.request,
            &mut self.response,
            &mut self.response_streamed,
            closing,
        );
        app.call(scope, &mut handler).await
    }

    fn error_response(&mut self, code: u16) {
        self.response.set_status(code);
        self.response.body.write(code.to_string());
    }

    async fn finish_response(&mut self) {
        if self.response_streamed {
            self.log_access();
        } else if !self.response.is_empty() {
            self.response
                .add_header("x-request-id", self.request.request_id());
            let raw = self.response.to_http();
            match self.stream.write_all(&raw).await {
                Ok(()) => {
                    let _ = self.stream.flush().await;
                }
                Err(err) => {
                    error!(
                        target: "qactuar::exception",
                        request_id = %self.request.request_id(),
                        "send failed: {err}"
                    );
                }
            }
            self.log_access();
        }
        // One more drive so the application can observe http.disconnect.
        let _ = self.drive_http_app(true).await;
        self.close().await;
    }

    // ---- WebSocket ----

    async fn handle_websocket(&mut self) {
        match self.websocket_loop().await {
            Ok(()) => {}
            Err(QactuarError::Http(code)) => {
                // Pre-accept refusal; replace the staged 101 response.
                self.response.clear();
                self.error_response(code);
                self.finish_response().await;
                return;
            }
            Err(QactuarError::RouteNotFound(_)) => {
                self.response.clear();
                self.error_response(404);
                self.finish_response().await;
                return;
            }
            Err(QactuarError::WebSocket(reason)) => {
                warn!(
                    target: "qactuar::child",
                    request_id = %self.request.request_id(),
                    "websocket protocol violation: {reason}"
                );
            }
            Err(QactuarError::Socket(err)) => {
                debug!(target: "qactuar::child", "websocket peer went away: {err}");
                self.ws_state = WebSocketState::Disconnected;
                let _ = self.drive_ws_app(None).await;
            }
            Err(err) => {
                error!(
                    target: "qactuar::exception",
                    request_id = %self.request.request_id(),
                    "websocket application error: {err}"
                );
            }
        }
        self.close().await;
    }

    async fn websocket_loop(&mut self) -> QactuarResult<()> {
        if let Err(err) = shake_hand(&self.request, &mut self.response) {
            warn!(
                target: "qactuar::child",
                request_id = %self.request.request_id(),
                "{err}"
            );
            return Err(QactuarError::Http(403));
        }

        // Drive the application once with websocket.connect.
        self.drive_ws_app(None).await?;
        if self.ws_state != WebSocketState::Accepted {
            return Err(QactuarError::Http(403));
        }
        let raw = self.response.to_http();
        self.stream
            .write_all(&raw)
            .await
            .map_err(QactuarError::Socket)?;
        self.log_access();
        self.response.clear();
        self.flush_ws_frames().await?;

        loop {
            self.websocket.clear_frames();
            self.read_ws_message().await?;
            if self.websocket.should_terminate() {
                self.ws_state = WebSocketState::Disconnected;
                let _ = self.drive_ws_app(None).await;
                break;
            }
            if self.websocket.being_pinged() {
                let payload = self.websocket.last_payload();
                self.websocket.write_pong(&payload);
                self.flush_ws_frames().await?;
                continue;
            }
            if let Some(message) = self.websocket.read()? {
                self.drive_ws_app(Some(message)).await?;
                self.flush_ws_frames().await?;
            }
            if self.ws_state == WebSocketState::Disconnected {
                // The application closed from its side.
                let code = self.websocket.close_code();
                self.websocket.write_close(code);
                self.flush_ws_frames().await?;
                break;
            }
        }
        Ok(())
    }

    async fn drive_ws_app(&mut self, incoming: Option<WsMessage>) -> QactuarResult<()> {
        let app = self.resolve_app()?;
        let scope = WebSocketHandler::create_scope(
            &self.request,
            self.scheme,
            self.client_info.clone(),
            self.server_info.clone(),
        );
        let mut handler = WebSocketHandler::new(
            &mut self.ws_state,
            &mut self.response,
            &mut self.websocket,
            incoming,
        );
        app.call(scope, &mut handler).await
    }

    /// Read frames for one inbound message. Unmasked client frames are a
    /// protocol error.
    async fn read_ws_message(&mut self) -> QactuarResult<()> {
        while !self.websocket.reading_complete() {
            let frame = self.next_frame().await?;
            if !frame.masked {
                return Err(QactuarError::WebSocket(
                    "client frame is not masked".to_string(),
                ));
            }
            self.websocket.add_read_frame(frame);
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> QactuarResult<Frame> {
        let mut buf = vec![0u8; self.config.recv_bytes.max(1)];
        loop {
            if let FrameParse::Complete { frame, consumed } = Frame::decode(&self.ws_buf)? {
                self.ws_buf.drain(..consumed);
                return Ok(frame);
            }
            let read = self
                .stream
                .read(&mut buf)
                .await
                .map_err(QactuarError::Socket)?;
            if read == 0 {
                return Err(QactuarError::Socket(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed mid-frame",
                )));
            }
            self.ws_buf.extend_from_slice(&buf[..read]);
        }
    }

    async fn flush_ws_frames(&mut self) -> QactuarResult<()> {
        for frame in self.websocket.take_write_frames() {
            self.stream
                .write_all(&frame)
                .await
                .map_err(QactuarError::Socket)?;
        }
        self.stream.flush().await.map_err(QactuarError::Socket)?;
        Ok(())
    }

    // ---- Teardown ----

    fn log_access(&self) {
        info!(
            target: "qactuar::access",
            host = %self.client_info.0,
            port = self.client_info.1,
            pid = std::process::id(),
            request_id = %self.request.request_id(),
            method = %self.request.method(),
            http_version = %self.request.request_version_num(),
            path = %self.request.original_path(),
            status = %String::from_utf8_lossy(&self.response.status),
        );
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
