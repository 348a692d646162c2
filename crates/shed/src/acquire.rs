//! Listener acquisition: inherit from the parent or bind fresh.
//!
//! A descriptor that is missing, malformed, or made for another address is
//! ignored and the address is bound directly. A descriptor that matches but
//! whose fd cannot be used is a hard error: silently binding again would hide
//! a broken handoff behind a second socket.

use std::io;
use std::net::TcpListener;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::net::UnixListener;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::address::ListenAddr;
use crate::descriptor::{HandoffDescriptor, LISTENER_ENV};
use crate::fd;
use crate::listener::Listener;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("inherited listener for {address} at fd {slot} is unusable: {source}")]
    Inherit {
        address: String,
        slot: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Acquire a listener for `address`, reading the handoff descriptor from the
/// `LISTENER` environment variable.
///
/// The variable is removed afterwards so the descriptor is consumed once.
/// Changing the environment is only sound while the process is still single
/// threaded, so call this before starting an async runtime. Otherwise use
/// [`acquire_from`] and leave the environment alone.
pub fn acquire(address: &str) -> Result<Listener, AcquireError> {
    let metadata = std::env::var(LISTENER_ENV).ok();
    let listener = acquire_from(address, metadata.as_deref())?;

    if metadata.is_some() {
        std::env::remove_var(LISTENER_ENV);
    }

    Ok(listener)
}

/// Acquire a listener for `address` given the raw metadata channel value.
pub fn acquire_from(address: &str, metadata: Option<&str>) -> Result<Listener, AcquireError> {
    let addr = ListenAddr::parse(address);

    if let Some(descriptor) = usable_descriptor(address, metadata) {
        let listener = inherit(&addr, &descriptor)?;
        info!(
            address,
            fd = descriptor.slot,
            name = %descriptor.debug_name,
            "Imported listener from parent process"
        );
        return Ok(listener);
    }

    let listener = Listener::bind(&addr).map_err(|source| AcquireError::Bind {
        address: address.to_string(),
        source,
    })?;
    info!(address, name = %listener.debug_name(), "Created listener");

    Ok(listener)
}

fn usable_descriptor(address: &str, metadata: Option<&str>) -> Option<HandoffDescriptor> {
    let Some(raw) = metadata else {
        debug!("No handoff descriptor present, cold start");
        return None;
    };

    match HandoffDescriptor::decode(raw) {
        Err(e) => {
            warn!(error = %e, "Ignoring handoff descriptor, binding fresh");
            None
        }
        Ok(descriptor) if !descriptor.matches(address) => {
            warn!(
                requested = address,
                inherited = %descriptor.address,
                "Handoff descriptor is for a different address, binding fresh"
            );
            None
        }
        Ok(descriptor) => Some(descriptor),
    }
}

/// Rebuild a listener from the inherited slot named by `descriptor`.
///
/// Every check runs on the raw slot. The slot is only wrapped, and so owned,
/// once it is known to be a listening socket of the right family; a rejected
/// slot is left open as found.
fn inherit(addr: &ListenAddr, descriptor: &HandoffDescriptor) -> Result<Listener, AcquireError> {
    let slot = descriptor.slot;
    let fail = |source: io::Error| AcquireError::Inherit {
        address: descriptor.address.clone(),
        slot,
        source,
    };
    let reject = |reason: &str| fail(io::Error::new(io::ErrorKind::InvalidInput, reason.to_string()));

    if !fd::is_socket(slot) {
        return Err(reject("not an open socket"));
    }
    if !fd::is_stream_socket(slot).map_err(fail)? {
        return Err(reject("not a stream socket"));
    }
    if !fd::is_listening(slot).map_err(fail)? {
        return Err(reject("socket is not listening"));
    }

    let family = fd::socket_family(slot).map_err(fail)?;
    let listener = match addr {
        ListenAddr::Tcp(_) if family == libc::AF_INET || family == libc::AF_INET6 => {
            // SAFETY: a listening TCP socket handed over by the parent that
            // nothing else in this process has claimed.
            Listener::Tcp(unsafe { TcpListener::from_raw_fd(slot) })
        }
        ListenAddr::Unix(_) if family == libc::AF_UNIX => {
            // SAFETY: as above, for a Unix-domain socket.
            Listener::Unix(unsafe { UnixListener::from_raw_fd(slot) })
        }
        _ => return Err(reject("socket family does not match the address")),
    };

    Ok(listener)
}
