//! POSIX seam: listener construction, bounded polling, forking, worker
//! reaping, and the wake-token pipes used by the pre-fork pool.
//!
//! Everything here is a thin wrapper so the execution models stay free of
//! `unsafe` blocks.

use std::io;
use std::net::{TcpListener, TcpStream, SocketAddr, ToSocketAddrs};
use std::os::fd::RawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{QactuarError, QactuarResult};

/// Listen backlog; the kernel clamps this to its own maximum.
const REQUEST_QUEUE_SIZE: i32 = 65536;

/// Create the nonblocking listen socket with SO_REUSEADDR. The socket is
/// shared with forked workers through fd inheritance.
pub fn create_listen_socket(host: &str, port: u16) -> QactuarResult<TcpListener> {
    let addr: SocketAddr = (host, port)
        .to_socket_addrs()
        .map_err(|err| QactuarError::Config(format!("cannot resolve {host}:{port}: {err}")))?
        .next()
        .ok_or_else(|| QactuarError::Config(format!("cannot resolve {host}:{port}")))?;

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(REQUEST_QUEUE_SIZE)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Wait up to `interval` for the fd to become readable.
pub fn poll_readable(fd: RawFd, interval: Duration) -> QactuarResult<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = interval.as_millis().min(i32::MAX as u128) as libc::c_int;
    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if result < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(false);
        }
        return Err(err.into());
    }
    Ok(result > 0 && pollfd.revents & libc::POLLIN != 0)
}

/// Accept one connection from the nonblocking listener; `None` when the
/// accept queue is empty (or another worker won the race).
pub fn accept_nonblocking(
    listener: &TcpListener,
) -> QactuarResult<Option<(TcpStream, SocketAddr)>> {
    match listener.accept() {
        Ok((stream, peer)) => Ok(Some((stream, peer))),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(err) if err.raw_os_error() == Some(libc::EINTR) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub enum Fork {
    Child,
    Parent(libc::pid_t),
}

/// `fork(2)`. The child inherits the listen socket and any accepted
/// sockets; each side must close what it does not own.
pub fn fork() -> QactuarResult<Fork> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        Err(io::Error::last_os_error().into())
    } else if pid == 0 {
        Ok(Fork::Child)
    } else {
        Ok(Fork::Parent(pid))
    }
}

/// Collect every terminated child without blocking.
pub fn reap_children() -> Vec<libc::pid_t> {
    let mut reaped = Vec::new();
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        reaped.push(pid);
    }
    reaped
}

/// Blocking pipe pair for the pre-fork wake-token queues. The parent
/// keeps the write end, the worker the read end.
pub fn create_pipe() -> QactuarResult<(RawFd, RawFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok((fds[0], fds[1]))
}

/// Enqueue one wake token.
pub fn send_wake_token(write_fd: RawFd) -> QactuarResult<()> {
    let token = [1u8];
    loop {
        let written = unsafe { libc::write(write_fd, token.as_ptr() as *const libc::c_void, 1) };
        if written >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err.into());
        }
    }
}

/// Block until a wake token arrives. `Ok(false)` means the write end was
/// closed: the parent is shutting down.
pub fn recv_wake_token(read_fd: RawFd) -> QactuarResult<bool> {
    let mut token = [0u8];
    loop {
        let read = unsafe { libc::read(read_fd, token.as_mut_ptr() as *mut libc::c_void, 1) };
        if read > 0 {
            return Ok(true);
        }
        if read == 0 {
            return Ok(false);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err.into());
        }
    }
}

pub fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Hostname of this machine, used as the server name in scopes.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    let result = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if result != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Point-in-time resource usage of this process, from `getrusage(2)`.
#[derive(Debug, Clone, Copy)]
pub struct ResourceUsage {
    /// Maximum resident set size, in kilobytes on Linux.
    pub max_rss: i64,
    pub user_time: Duration,
    pub system_time: Duration,
}

pub fn resource_usage() -> QactuarResult<ResourceUsage> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(ResourceUsage {
        max_rss: usage.ru_maxrss,
        user_time: timeval_to_duration(usage.ru_utime),
        system_time: timeval_to_duration(usage.ru_stime),
    })
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    Duration::new(tv.tv_sec.max(0) as u64, (tv.tv_usec.max(0) as u32) * 1000)
}
