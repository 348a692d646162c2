//! OS signal source for the coordinator.
//!
//! - `SIGHUP` → [`Signal::ReloadRetire`]
//! - `SIGUSR2` → [`Signal::ReloadCoexist`]
//! - `SIGINT`, `SIGQUIT` → [`Signal::Shutdown`]
//!
//! Signals are forwarded into a channel of capacity one. A repeat of the
//! signal that is still pending is dropped. A different signal waits until
//! the pending one has been taken, so a shutdown is never lost behind a
//! reload.

use std::fmt;
use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Operator request understood by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Spawn a replacement, then stop accepting here.
    ReloadRetire,
    /// Spawn an additional acceptor and keep serving.
    ReloadCoexist,
    /// Close the listener and leave the control loop.
    Shutdown,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::ReloadRetire => write!(f, "reload-and-retire"),
            Signal::ReloadCoexist => write!(f, "reload-and-coexist"),
            Signal::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Register the signal handlers and start forwarding.
///
/// Must be called from within a Tokio runtime. The forwarding task ends once
/// the returned receiver is dropped.
pub fn install() -> io::Result<mpsc::Receiver<Signal>> {
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr2 = signal(SignalKind::user_defined2())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut forwarder = Forwarder::new(tx);
        loop {
            let (name, event) = tokio::select! {
                Some(()) = sighup.recv() => ("SIGHUP", Signal::ReloadRetire),
                Some(()) = sigusr2.recv() => ("SIGUSR2", Signal::ReloadCoexist),
                Some(()) = sigint.recv() => ("SIGINT", Signal::Shutdown),
                Some(()) = sigquit.recv() => ("SIGQUIT", Signal::Shutdown),
                else => break,
            };

            if !forwarder.forward(name, event).await {
                break;
            }
        }
        debug!("Signal forwarding stopped");
    });

    Ok(rx)
}

/// Sending half that remembers which signal it queued last.
struct Forwarder {
    tx: mpsc::Sender<Signal>,
    last: Option<Signal>,
}

impl Forwarder {
    fn new(tx: mpsc::Sender<Signal>) -> Self {
        Self { tx, last: None }
    }

    /// Returns `false` once the receiver is gone.
    async fn forward(&mut self, name: &str, event: Signal) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                debug!(signal = name, event = %event, "Signal forwarded");
                self.last = Some(event);
                true
            }
            // With capacity one the queued value is the last one sent.
            Err(TrySendError::Full(_)) if self.last == Some(event) => {
                debug!(signal = name, event = %event, "Signal already pending, coalesced");
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(signal = name, event = %event, "Another signal pending, queueing behind it");
                if self.tx.send(event).await.is_err() {
                    return false;
                }
                self.last = Some(event);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
