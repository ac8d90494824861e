//! Execution models: three interchangeable accept loops over one
//! listen socket and one application table.
//!
//! Fork models run each connection's pipeline inside a child process on
//! a fresh current-thread runtime; the async model runs every pipeline
//! as a cooperative task in a single process. All three feed the same
//! [`Pipeline`](crate::pipeline::Pipeline).

pub mod async_only;
pub mod prefork;
pub mod simple_fork;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::asgi::Scheme;
use crate::config::Config;
use crate::error::{QactuarError, QactuarResult};
use crate::pipeline::Pipeline;
use crate::router::AppTable;
use crate::server::Server;
use crate::{sys, tls};

pub use async_only::AsyncOnlyServer;
pub use prefork::PreForkServer;
pub use simple_fork::SimpleForkServer;

/// Everything a pipeline needs from the server, cheap to clone per
/// connection and across forks.
#[derive(Clone)]
pub struct ConnectionContext {
    pub config: Arc<Config>,
    pub apps: Arc<AppTable>,
    pub scheme: Scheme,
    pub server_info: (String, u16),
    pub tls: Option<TlsAcceptor>,
}

impl ConnectionContext {
    pub fn from_server(server: &Server) -> Self {
        Self {
            config: Arc::clone(&server.config),
            apps: Arc::clone(&server.apps),
            scheme: server.scheme,
            server_info: server.server_info(),
            tls: server.tls.clone(),
        }
    }
}

/// Run one accepted tokio stream through the pipeline, performing the
/// TLS handshake first when configured.
pub async fn serve_stream(stream: tokio::net::TcpStream, peer: SocketAddr, ctx: ConnectionContext) {
    let client_info = (peer.ip().to_string(), peer.port());
    match ctx.tls.clone() {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                Pipeline::new(
                    tls_stream,
                    ctx.config,
                    ctx.apps,
                    ctx.scheme,
                    ctx.server_info,
                    client_info,
                )
                .run()
                .await;
            }
            Err(err) if tls::is_benign_handshake_error(&err) => {
                debug!(target: "qactuar::child", "benign tls alert from {peer}: {err}");
            }
            Err(err) => {
                // The handshake consumed the stream; the 403 disposition
                // can only be logged.
                warn!(target: "qactuar::child", "tls handshake refused for {peer}: {err}");
            }
        },
        None => {
            Pipeline::new(
                stream,
                ctx.config,
                ctx.apps,
                ctx.scheme,
                ctx.server_info,
                client_info,
            )
            .run()
            .await;
        }
    }
}

/// Run one accepted std stream through the pipeline on an existing
/// current-thread runtime. Used by the fork models.
pub fn serve_std_stream(
    runtime: &tokio::runtime::Runtime,
    stream: std::net::TcpStream,
    peer: SocketAddr,
    ctx: ConnectionContext,
) -> QactuarResult<()> {
    stream.set_nonblocking(true)?;
    let gather_stats = ctx.config.gather_proc_stats;
    runtime.block_on(async move {
        let stream = match tokio::net::TcpStream::from_std(stream) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(target: "qactuar::child", "cannot register socket: {err}");
                return;
            }
        };
        serve_stream(stream, peer, ctx).await;
    });
    if gather_stats {
        log_proc_stats();
    }
    Ok(())
}

/// Build the per-worker current-thread runtime the fork models use.
pub fn worker_runtime() -> QactuarResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(QactuarError::from)
}

/// Log this process's resource usage, the fork-model stand-in for the
/// per-worker process stats gathering flag.
pub fn log_proc_stats() {
    match sys::resource_usage() {
        Ok(usage) => {
            info!(
                target: "qactuar::stats",
                pid = std::process::id(),
                max_rss = usage.max_rss,
                user_time_us = usage.user_time.as_micros() as u64,
                system_time_us = usage.system_time.as_micros() as u64,
            );
        }
        Err(err) => debug!(target: "qactuar::stats", "resource usage unavailable: {err}"),
    }
}
