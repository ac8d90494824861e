//! Qactuar: an HTTP/1.1 and WebSocket server front-ending applications
//! written against an ASGI-style contract.
//!
//! One listen socket, one route-prefix application table, and three
//! interchangeable execution models:
//!
//! - **simple-fork** — a child process per accepted connection, capped
//!   at `MAX_PROCESSES` (excess load gets an immediate 503)
//! - **prefork** — a fixed pool of long-lived workers woken through
//!   per-worker token pipes
//! - **async-only** — a single process running every connection as a
//!   cooperative task
//!
//! All three feed the same per-connection [`pipeline::Pipeline`]: read
//! and parse one request, route it by longest prefix, drive the
//! application over the ASGI contract, serialize the response, log the
//! access record, close. Upgrade requests switch into an RFC 6455 frame
//! loop instead.

pub mod asgi;
pub mod config;
pub mod error;
pub mod handlers;
pub mod headers;
pub mod logging;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod servers;
pub mod sys;
pub mod tls;
pub mod util;
pub mod websocket;
pub mod workers;

pub use asgi::{AppLoader, AsgiApp, AsgiChannel, Event, Scheme, Scope};
pub use config::{Config, ServerType, config_init};
pub use error::{QactuarError, QactuarResult};
pub use logging::init_logging;
pub use router::AppTable;
pub use server::Server;
pub use servers::{AsyncOnlyServer, PreForkServer, SimpleForkServer};

/// Build a server from the config and run the configured execution
/// model until shutdown.
pub fn run(config: Config, loader: &dyn AppLoader) -> QactuarResult<()> {
    let server_type = config.server_type;
    let server = Server::new(config, loader)?;
    match server_type {
        ServerType::SimpleFork => SimpleForkServer::new(server).serve_forever(),
        ServerType::Prefork => PreForkServer::new(server).serve_forever(),
        ServerType::AsyncOnly => AsyncOnlyServer::new(server).serve_forever(),
    }
}
