//! Bind address parsing.
//!
//! A handoff address is the identity key of a listener. The text is kept as
//! written so that parent and child compare exactly what the operator supplied.

use std::fmt;
use std::path::PathBuf;

/// Where a listener is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// TCP `host:port`, resolved at bind time.
    Tcp(String),
    /// Unix-domain socket path.
    Unix(PathBuf),
}

impl ListenAddr {
    /// Parse an address string.
    ///
    /// - `unix:<path>` → Unix
    /// - a string starting with `/`, `./` or `../` → Unix
    /// - anything else → TCP
    pub fn parse(address: &str) -> Self {
        if let Some(path) = address.strip_prefix("unix:") {
            return ListenAddr::Unix(PathBuf::from(path));
        }

        if address.starts_with('/') || address.starts_with("./") || address.starts_with("../") {
            return ListenAddr::Unix(PathBuf::from(address));
        }

        ListenAddr::Tcp(address.to_string())
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "tcp:{}", addr),
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}
