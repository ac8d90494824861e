//! Async-only execution model: a single process where every connection
//! is a cooperative task on one event loop.

use tokio::time::timeout;
use tracing::{error, warn};

use crate::error::QactuarResult;
use crate::server::Server;
use crate::servers::{self, ConnectionContext};

pub struct AsyncOnlyServer {
    server: Server,
}

impl AsyncOnlyServer {
    pub fn new(server: Server) -> Self {
        Self { server }
    }

    pub fn serve_forever(self) -> QactuarResult<()> {
        self.server.install_signal_handler()?;
        self.server.start_up()?;
        let runtime = servers::worker_runtime()?;
        runtime.block_on(async {
            if let Err(err) = self.run_loop().await {
                error!(target: "qactuar::server", "accept loop failed: {err}");
            }
            self.server.shut_down_async().await;
        });
        Ok(())
    }

    async fn run_loop(&self) -> QactuarResult<()> {
        let listener = tokio::net::TcpListener::from_std(self.server.listener.try_clone()?)?;
        let select_sleep = self.server.config.select_sleep();
        loop {
            if self
                .server
                .shutting_down
                .load(std::sync::atomic::Ordering::Acquire)
            {
                return Ok(());
            }
            // Bounded wait so the shutdown flag is observed promptly.
            match timeout(select_sleep, listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    let ctx = ConnectionContext::from_server(&self.server);
                    tokio::spawn(async move {
                        servers::serve_stream(stream, peer, ctx).await;
                    });
                }
                Ok(Err(err)) if err.raw_os_error() == Some(libc::EINTR) => {}
                Ok(Err(err)) => {
                    warn!(target: "qactuar::server", "accept failed: {err}");
                }
                Err(_elapsed) => {}
            }
        }
    }
}
