//! Central error type for the Qactuar engine.
//!
//! Every failure inside the connection pipeline is converted into an HTTP
//! response at the pipeline boundary; errors never escape into the accept
//! loops, which must stay live.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QactuarError {
    /// Malformed request line or header block. The request state is reset
    /// and the pipeline keeps reading until the request timeout.
    #[error("malformed request")]
    Parse,

    /// No mounted application matched the request path.
    #[error("no application mounted for {0}")]
    RouteNotFound(String),

    /// An HTTP error response with the given status code.
    #[error("http error {0}")]
    Http(u16),

    /// Non-benign TLS handshake failure.
    #[error("tls handshake failed: {0}")]
    Tls(String),

    /// WebSocket protocol violation (unmasked client frame, malformed
    /// frame, bad `websocket.send` payload, failed handshake).
    #[error("websocket protocol violation: {0}")]
    WebSocket(String),

    /// An application failed while being driven over the ASGI contract.
    #[error("application failure: {0}")]
    Application(String),

    /// Socket-level failure while sending; logged, never retried.
    #[error("socket failure: {0}")]
    Socket(#[source] io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type QactuarResult<T> = Result<T, QactuarError>;
