//! Listener kinds that can be acquired, handed off, and closed.

use std::fmt;
use std::io;
use std::net::{TcpListener, UdpSocket};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, RawFd};
use std::os::unix::net::UnixListener;

use crate::address::ListenAddr;
use crate::fd;

/// The kind of socket behind a [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Tcp,
    Unix,
    Udp,
}

impl ListenerKind {
    /// Only stream listeners can be handed to a child.
    pub fn is_stream(&self) -> bool {
        matches!(self, ListenerKind::Tcp | ListenerKind::Unix)
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Tcp => write!(f, "tcp"),
            ListenerKind::Unix => write!(f, "unix"),
            ListenerKind::Udp => write!(f, "udp"),
        }
    }
}

/// A live socket owned by this process.
///
/// Ownership is released only through [`Listener::close`] or drop; the
/// coordinator always uses `close` so the result can be reported.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
    /// Bound datagram socket. Has no accept queue, so it cannot be handed off.
    Udp(UdpSocket),
}

impl Listener {
    /// Bind `addr` fresh.
    pub fn bind(addr: &ListenAddr) -> io::Result<Self> {
        match addr {
            ListenAddr::Tcp(host_port) => TcpListener::bind(host_port.as_str()).map(Listener::Tcp),
            ListenAddr::Unix(path) => UnixListener::bind(path).map(Listener::Unix),
        }
    }

    pub fn kind(&self) -> ListenerKind {
        match self {
            Listener::Tcp(_) => ListenerKind::Tcp,
            Listener::Unix(_) => ListenerKind::Unix,
            Listener::Udp(_) => ListenerKind::Udp,
        }
    }

    /// Human-readable `<kind>:<local address>` name.
    pub fn debug_name(&self) -> String {
        let local = match self {
            Listener::Tcp(l) => l.local_addr().map(|a| a.to_string()),
            Listener::Unix(l) => l.local_addr().map(|a| match a.as_pathname() {
                Some(path) => path.display().to_string(),
                None => "(unnamed)".to_string(),
            }),
            Listener::Udp(s) => s.local_addr().map(|a| a.to_string()),
        };
        format!("{}:{}", self.kind(), local.unwrap_or_else(|_| "?".to_string()))
    }

    /// Borrow the underlying fd, for stream listeners only.
    pub fn stream_fd(&self) -> Option<BorrowedFd<'_>> {
        match self {
            Listener::Tcp(l) => Some(l.as_fd()),
            Listener::Unix(l) => Some(l.as_fd()),
            Listener::Udp(_) => None,
        }
    }

    /// Duplicate the handle. Both copies refer to the same kernel socket.
    pub fn try_clone(&self) -> io::Result<Self> {
        match self {
            Listener::Tcp(l) => l.try_clone().map(Listener::Tcp),
            Listener::Unix(l) => l.try_clone().map(Listener::Unix),
            Listener::Udp(s) => s.try_clone().map(Listener::Udp),
        }
    }

    /// Release this process's handle, reporting the result of close(2).
    ///
    /// Other duplicates, including a child's inherited copy, stay open.
    pub fn close(self) -> io::Result<()> {
        let raw = match self {
            Listener::Tcp(l) => l.into_raw_fd(),
            Listener::Unix(l) => l.into_raw_fd(),
            Listener::Udp(s) => s.into_raw_fd(),
        };
        fd::close(raw)
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Listener::Tcp(l) => l.as_raw_fd(),
            Listener::Unix(l) => l.as_raw_fd(),
            Listener::Udp(s) => s.as_raw_fd(),
        }
    }
}

impl From<TcpListener> for Listener {
    fn from(listener: TcpListener) -> Self {
        Listener::Tcp(listener)
    }
}

impl From<UnixListener> for Listener {
    fn from(listener: UnixListener) -> Self {
        Listener::Unix(listener)
    }
}

impl From<UdpSocket> for Listener {
    fn from(socket: UdpSocket) -> Self {
        Listener::Udp(socket)
    }
}
