//! Listener export: the descriptor and the fd a child will inherit.

use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd};
use thiserror::Error;

use crate::descriptor::HandoffDescriptor;
use crate::fd;
use crate::listener::{Listener, ListenerKind};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported listener type: {0}")]
    Unsupported(ListenerKind),

    #[error("failed to duplicate listener fd: {0}")]
    Duplicate(#[source] io::Error),
}

/// Build the handoff descriptor for `listener` and a duplicate of its fd.
///
/// The descriptor always names [`crate::LISTENER_SLOT`]. The returned fd is a
/// CLOEXEC duplicate above the stdio range; dropping it closes this copy, so
/// callers keep it alive for exactly the duration of the spawn.
pub fn export(address: &str, listener: &Listener) -> Result<(HandoffDescriptor, OwnedFd), ExportError> {
    let Some(source) = listener.stream_fd() else {
        return Err(ExportError::Unsupported(listener.kind()));
    };

    let handle = fd::dup_above(source.as_raw_fd(), fd::EXPORT_FD_FLOOR).map_err(ExportError::Duplicate)?;
    let descriptor = HandoffDescriptor::new(address, listener.debug_name());

    Ok((descriptor, handle))
}
