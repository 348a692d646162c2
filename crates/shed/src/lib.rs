//! # shed
//!
//! Zero-downtime restarts by handing an already-bound listening socket from a
//! running process to a freshly executed copy of itself.
//!
//! ## Overview
//!
//! 1. At startup [`acquire`] looks for a handoff descriptor in the `LISTENER`
//!    environment variable. A matching descriptor means the socket was
//!    inherited at fd 3; otherwise the address is bound fresh.
//! 2. A [`Coordinator`] owns the listener and waits for signals.
//! 3. On reload it re-executes the current binary through the
//!    [`ProcessSpawner`], passing stdin, stdout, stderr and the listener
//!    (slot 3) plus a serialized [`HandoffDescriptor`].
//! 4. Depending on the signal the old process either releases its listener
//!    (retire) or keeps accepting next to the child (coexist).
//!
//! ## Signal Conventions
//!
//! - `SIGHUP` — spawn a replacement, then close the local listener
//! - `SIGUSR2` — spawn an additional acceptor, keep serving
//! - `SIGINT` / `SIGQUIT` — close the listener and leave the control loop
//!
//! ## Environment Variables
//!
//! - `LISTENER` — JSON handoff descriptor `{"addr", "fd", "filename"}`
//!
//! ## Platform
//!
//! This crate requires Unix (Linux / macOS). It will not compile on other platforms.

#[cfg(not(unix))]
compile_error!("shed requires a Unix platform (Linux or macOS)");

mod acquire;
mod address;
mod coordinator;
mod descriptor;
mod drain;
mod export;
mod fd;
mod listener;
mod signals;
mod spawn;

pub use acquire::{acquire, acquire_from, AcquireError};
pub use address::ListenAddr;
pub use coordinator::{Coordinator, State, REAP_INTERVAL};
pub use descriptor::{DescriptorError, HandoffDescriptor, LISTENER_ENV, LISTENER_SLOT};
pub use drain::{ConnectionGuard, ConnectionTracker};
pub use export::{export, ExportError};
pub use listener::{Listener, ListenerKind};
pub use signals::{install as install_signals, Signal};
pub use spawn::{ChildProcess, InheritedHandle, ProcessSpawner, Spawn, SpawnError, SpawnPlan};
