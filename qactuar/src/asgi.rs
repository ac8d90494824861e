//! The ASGI application contract, expressed as Rust seams.
//!
//! A server drives an application by handing it a connection [`Scope`]
//! plus a receive/send pair. The original contract's string-typed event
//! dictionaries become the [`Event`] tagged union; the receive/send pair
//! becomes the object-safe [`AsgiChannel`] trait so one handler object
//! can serve both directions.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::QactuarResult;

pub const ASGI_VERSION: &str = "2.0";
pub const ASGI_SPEC_VERSION: &str = "2.0";

/// URL scheme the server is speaking, derived from TLS configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable per-connection descriptor for an HTTP lifecycle.
#[derive(Debug, Clone)]
pub struct HttpScope {
    /// Version token without the `HTTP/` prefix, e.g. `"1.1"`.
    pub http_version: String,
    pub method: String,
    pub scheme: Scheme,
    /// Percent-decoded path, after route-prefix stripping.
    pub path: String,
    /// Undecoded path bytes as requested.
    pub raw_path: Vec<u8>,
    /// Raw bytes after `?`, or empty.
    pub query_string: Vec<u8>,
    pub root_path: String,
    /// Ordered `(lowercased name, value)` byte pairs.
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub client: (String, u16),
    pub server: (String, u16),
}

/// Immutable per-connection descriptor for a WebSocket lifecycle.
#[derive(Debug, Clone)]
pub struct WebSocketScope {
    pub http_version: String,
    pub scheme: Scheme,
    pub path: String,
    pub raw_path: Vec<u8>,
    pub query_string: Vec<u8>,
    pub root_path: String,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub client: (String, u16),
    pub server: (String, u16),
    /// Subprotocols offered by the client.
    pub subprotocols: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LifespanScope;

#[derive(Debug, Clone)]
pub enum Scope {
    Http(HttpScope),
    WebSocket(WebSocketScope),
    Lifespan(LifespanScope),
}

impl Scope {
    /// The wire-level `type` field of the scope.
    pub fn kind(&self) -> &'static str {
        match self {
            Scope::Http(_) => "http",
            Scope::WebSocket(_) => "websocket",
            Scope::Lifespan(_) => "lifespan",
        }
    }
}

/// Every message that crosses the receive/send seam, in both directions.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    HttpRequest { body: Vec<u8>, more_body: bool },
    HttpDisconnect,
    HttpResponseStart {
        status: u16,
        headers: Vec<(Vec<u8>, Vec<u8>)>,
    },
    HttpResponseBody { body: Vec<u8>, more_body: bool },
    WebSocketConnect,
    WebSocketAccept {
        subprotocol: Option<String>,
        headers: Vec<(Vec<u8>, Vec<u8>)>,
    },
    WebSocketReceive {
        text: Option<String>,
        bytes: Option<Vec<u8>>,
    },
    WebSocketSend {
        text: Option<String>,
        bytes: Option<Vec<u8>>,
    },
    WebSocketClose { code: u16 },
    WebSocketDisconnect { code: u16 },
    LifespanStartup,
    LifespanShutdown,
    LifespanStartupComplete,
    LifespanStartupFailed { message: String },
    LifespanShutdownComplete,
    LifespanShutdownFailed { message: String },
}

impl Event {
    /// The wire-level `type` field of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::HttpRequest { .. } => "http.request",
            Event::HttpDisconnect => "http.disconnect",
            Event::HttpResponseStart { .. } => "http.response.start",
            Event::HttpResponseBody { .. } => "http.response.body",
            Event::WebSocketConnect => "websocket.connect",
            Event::WebSocketAccept { .. } => "websocket.accept",
            Event::WebSocketReceive { .. } => "websocket.receive",
            Event::WebSocketSend { .. } => "websocket.send",
            Event::WebSocketClose { .. } => "websocket.close",
            Event::WebSocketDisconnect { .. } => "websocket.disconnect",
            Event::LifespanStartup => "lifespan.startup",
            Event::LifespanShutdown => "lifespan.shutdown",
            Event::LifespanStartupComplete => "lifespan.startup.complete",
            Event::LifespanStartupFailed { .. } => "lifespan.startup.failed",
            Event::LifespanShutdownComplete => "lifespan.shutdown.complete",
            Event::LifespanShutdownFailed { .. } => "lifespan.shutdown.failed",
        }
    }
}

/// The receive/send pair a server hands to an application.
#[async_trait]
pub trait AsgiChannel: Send {
    /// Next inbound event for the application.
    async fn receive(&mut self) -> QactuarResult<Event>;
    /// Outbound event emitted by the application.
    async fn send(&mut self, event: Event) -> QactuarResult<()>;
}

/// An application satisfying the ASGI contract: given a scope and a
/// channel it runs one lifecycle to completion.
///
/// Returning `QactuarError::Http(code)` produces a response with that
/// status; any other error becomes a 500.
#[async_trait]
pub trait AsgiApp: Send + Sync {
    async fn call(&self, scope: Scope, channel: &mut dyn AsgiChannel) -> QactuarResult<()>;
}

impl std::fmt::Debug for dyn AsgiApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn AsgiApp")
    }
}

/// External-importer collaborator resolving `"module:symbol"` references
/// from configuration into application handles at startup.
pub trait AppLoader {
    fn load(&self, spec: &str) -> QactuarResult<Arc<dyn AsgiApp>>;
}
