//! Simple-fork execution model: one short-lived child process per
//! accepted connection, bounded by `MAX_PROCESSES`.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;

use tracing::{error, warn};

use crate::error::QactuarResult;
use crate::response::Response;
use crate::server::Server;
use crate::servers::{self, ConnectionContext};
use crate::sys::{self, Fork};
use crate::workers::WorkerTable;

pub struct SimpleForkServer {
    server: Server,
    workers: WorkerTable,
}

impl SimpleForkServer {
    pub fn new(server: Server) -> Self {
        Self {
            server,
            workers: WorkerTable::new(),
        }
    }

    /// Poll, accept, fork, reap, forever. Fatal accept-loop errors are
    /// logged and the process exits through lifespan shutdown.
    pub fn serve_forever(mut self) -> QactuarResult<()> {
        self.server.install_signal_handler()?;
        self.server.start_up()?;
        if let Err(err) = self.run_loop() {
            error!(target: "qactuar::server", "accept loop failed: {err}");
        }
        self.server.shut_down();
    }

    fn run_loop(&mut self) -> QactuarResult<()> {
        let select_sleep = self.server.config.select_sleep();
        let reap_interval = self.server.config.check_process_interval();
        loop {
            if self
                .server
                .shutting_down
                .load(std::sync::atomic::Ordering::Acquire)
            {
                return Ok(());
            }
            if sys::poll_readable(self.server.listener.as_raw_fd(), select_sleep)?
                && let Some((stream, peer)) = sys::accept_nonblocking(&self.server.listener)?
            {
                self.dispatch(stream, peer)?;
            }
            self.workers.reap_if_due(reap_interval);
        }
    }

    fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) -> QactuarResult<()> {
        if self.workers.at_capacity(self.server.config.max_processes) {
            warn!(
                target: "qactuar::server",
                "worker cap {} reached, refusing {peer}",
                self.server.config.max_processes
            );
            refuse_overloaded(stream);
            return Ok(());
        }
        let ctx = ConnectionContext::from_server(&self.server);
        match sys::fork()? {
            Fork::Child => {
                // The child owns only the accepted socket. Destructors
                // never run here; the child leaves through process::exit.
                sys::close_fd(self.server.listener.as_raw_fd());
                match servers::worker_runtime() {
                    Ok(runtime) => {
                        let _ = servers::serve_std_stream(&runtime, stream, peer, ctx);
                    }
                    Err(err) => {
                        error!(target: "qactuar::child", "cannot build worker runtime: {err}");
                    }
                }
                std::process::exit(0);
            }
            Fork::Parent(pid) => {
                drop(stream);
                self.workers.insert(pid);
                Ok(())
            }
        }
    }
}

/// Immediate 503 when the worker table is full; no fork happens.
fn refuse_overloaded(mut stream: TcpStream) {
    let mut response = Response::new();
    response.set_status(503);
    response.body.write(&b"503"[..]);
    let _ = stream.write_all(&response.to_http());
    let _ = stream.shutdown(std::net::Shutdown::Both);
}
