//! Pre-fork execution model: a fixed pool of long-lived workers, each
//! woken through its own single-producer/single-consumer token pipe.
//!
//! The parent polls the listen socket and round-robins wake tokens; a
//! woken worker accepts one connection from the shared socket and runs
//! the pipeline. Workers exit when their pipe reaches EOF, which the
//! parent arranges by closing the write ends at shutdown.

use std::os::fd::{AsRawFd, RawFd};

use tracing::{debug, error, info, warn};

use crate::error::QactuarResult;
use crate::server::Server;
use crate::servers::{self, ConnectionContext};
use crate::sys::{self, Fork};
use crate::workers::WorkerTable;

pub struct PreForkServer {
    server: Server,
    workers: WorkerTable,
    /// Write ends of the per-worker wake-token pipes, in worker order.
    queues: Vec<RawFd>,
    current: usize,
}

impl PreForkServer {
    pub fn new(server: Server) -> Self {
        Self {
            server,
            workers: WorkerTable::new(),
            queues: Vec::new(),
            current: 0,
        }
    }

    pub fn serve_forever(mut self) -> QactuarResult<()> {
        self.server.install_signal_handler()?;
        self.server.start_up()?;
        self.spawn_pool()?;
        if let Err(err) = self.run_loop() {
            error!(target: "qactuar::server", "accept loop failed: {err}");
        }
        self.close_queues();
        self.server.shut_down();
    }

    fn spawn_pool(&mut self) -> QactuarResult<()> {
        let pool_size = self.server.config.pool_size();
        info!(target: "qactuar::server", "starting {pool_size} pre-forked workers");
        for index in 0..pool_size {
            let (read_fd, write_fd) = sys::create_pipe()?;
            match sys::fork()? {
                Fork::Child => {
                    // The worker keeps only its own read end.
                    sys::close_fd(write_fd);
                    for &fd in &self.queues {
                        sys::close_fd(fd);
                    }
                    let ctx = ConnectionContext::from_server(&self.server);
                    worker_loop(index, read_fd, &self.server, ctx);
                    std::process::exit(0);
                }
                Fork::Parent(pid) => {
                    sys::close_fd(read_fd);
                    self.queues.push(write_fd);
                    self.workers.insert(pid);
                }
            }
        }
        Ok(())
    }

    fn run_loop(&mut self) -> QactuarResult<()> {
        let select_sleep = self.server.config.select_sleep();
        loop {
            if self
                .server
                .shutting_down
                .load(std::sync::atomic::Ordering::Acquire)
            {
                return Ok(());
            }
            if sys::poll_readable(self.server.listener.as_raw_fd(), select_sleep)? {
                // Wake the next worker; it performs the accept itself.
                if let Err(err) = sys::send_wake_token(self.queues[self.current]) {
                    warn!(
                        target: "qactuar::server",
                        "cannot wake worker {}: {err}", self.current
                    );
                }
                self.current = (self.current + 1) % self.queues.len();
            }
        }
    }

    fn close_queues(&mut self) {
        for fd in self.queues.drain(..) {
            sys::close_fd(fd);
        }
    }
}

/// Body of one pre-forked worker: block on the wake pipe, accept, serve.
fn worker_loop(index: usize, read_fd: RawFd, server: &Server, ctx: ConnectionContext) {
    let runtime = match servers::worker_runtime() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(target: "qactuar::child", "worker {index}: cannot build runtime: {err}");
            return;
        }
    };
    debug!(target: "qactuar::child", "worker {index} ready");
    loop {
        match sys::recv_wake_token(read_fd) {
            Ok(true) => {
                match sys::accept_nonblocking(&server.listener) {
                    Ok(Some((stream, peer))) => {
                        let _ =
                            servers::serve_std_stream(&runtime, stream, peer, ctx.clone());
                    }
                    // Another worker won the race; go back to sleep.
                    Ok(None) => {}
                    Err(err) => {
                        warn!(target: "qactuar::child", "worker {index}: accept failed: {err}");
                    }
                }
            }
            Ok(false) => {
                debug!(target: "qactuar::child", "worker {index} exiting on shutdown");
                return;
            }
            Err(err) => {
                error!(target: "qactuar::child", "worker {index}: wake pipe failed: {err}");
                return;
            }
        }
    }
}
