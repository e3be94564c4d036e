//! Pre-bound listeners the worker serves on.
//!
//! The worker never binds sockets itself. Callers bind a TCP listener (or, on
//! unix, a Unix domain socket) and hand it over; the worker only reports its
//! address and turns it into an incoming connection stream when `run` starts.

use core::fmt;
use std::{io, net::SocketAddr};
use tokio::net::TcpListener;
#[cfg(unix)]
use {std::path::PathBuf, tokio::net::UnixListener};

/// A bound listener owned exclusively by one worker.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<ListenAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().map(ListenAddr::Tcp),
            #[cfg(unix)]
            Self::Unix(listener) => listener
                .local_addr()
                .map(|addr| ListenAddr::Unix(addr.as_pathname().map(ToOwned::to_owned))),
        }
    }
}

impl From<TcpListener> for Listener {
    fn from(listener: TcpListener) -> Self {
        Self::Tcp(listener)
    }
}

#[cfg(unix)]
impl From<UnixListener> for Listener {
    fn from(listener: UnixListener) -> Self {
        Self::Unix(listener)
    }
}

/// Address of a [`Listener`], printable for logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    /// Unnamed sockets have no path.
    #[cfg(unix)]
    Unix(Option<PathBuf>),
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            #[cfg(unix)]
            Self::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            #[cfg(unix)]
            Self::Unix(None) => f.write_str("unix:(unnamed)"),
        }
    }
}
