//! Signal-driven handoff coordinator.
//!
//! Owns the listener for its whole life in this process and maps each
//! [`Signal`] to a transition:
//!
//! ```text
//! Serving --ReloadRetire-->  spawn child; on success close listener
//! Serving --ReloadCoexist--> spawn child; keep listener
//! Serving --Shutdown-->      close listener --> Terminated
//! ```
//!
//! A failed spawn never touches the listener. The listener is only closed
//! after the child has been launched.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::listener::Listener;
use crate::signals::Signal;
use crate::spawn::{ChildProcess, ProcessSpawner, Spawn};

/// How often exited children are collected while the loop waits for signals.
pub const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The control loop is running. The listener may already have been handed
    /// off by a retire.
    Serving,
    /// Shutdown handled, loop exited.
    Terminated,
}

/// Single-owner state machine driving handoff and shutdown.
pub struct Coordinator<S = ProcessSpawner> {
    address: String,
    listener: Option<Listener>,
    spawner: S,
    children: Vec<ChildProcess>,
    state: State,
    /// Cancelled when the listener is released, so accept loops holding
    /// duplicates stop too.
    stop_accepting: CancellationToken,
}

impl Coordinator<ProcessSpawner> {
    /// Coordinator that re-executes the current binary on reload.
    pub fn new(address: impl Into<String>, listener: Listener) -> Self {
        Self::with_spawner(address, listener, ProcessSpawner::new())
    }
}

impl<S: Spawn> Coordinator<S> {
    pub fn with_spawner(address: impl Into<String>, listener: Listener, spawner: S) -> Self {
        Self {
            address: address.into(),
            listener: Some(listener),
            spawner,
            children: Vec::new(),
            state: State::Serving,
            stop_accepting: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The owned listener, `None` once it has been released.
    pub fn listener(&self) -> Option<&Listener> {
        self.listener.as_ref()
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    /// Token cancelled when this process stops accepting.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    /// Pids of spawned children not yet reaped.
    pub fn children(&self) -> Vec<u32> {
        self.children.iter().map(ChildProcess::pid).collect()
    }

    /// Drive the control loop until shutdown.
    ///
    /// Spawning blocks this task; no timeout is applied. A closed channel is
    /// handled as a shutdown. Exited children are reaped on every signal and
    /// every [`REAP_INTERVAL`] while any are outstanding.
    pub async fn run(&mut self, signals: &mut mpsc::Receiver<Signal>) -> State {
        info!(address = %self.address, "Waiting for signals");

        let mut reap = tokio::time::interval(REAP_INTERVAL);
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.state == State::Serving {
            tokio::select! {
                signal = signals.recv() => {
                    let Some(signal) = signal else {
                        warn!("Signal channel closed, shutting down");
                        self.handle(Signal::Shutdown);
                        break;
                    };
                    self.reap_children();
                    self.handle(signal);
                }
                _ = reap.tick(), if !self.children.is_empty() => self.reap_children(),
            }
        }

        self.state
    }

    /// Apply one signal. Signals after termination are ignored.
    pub fn handle(&mut self, signal: Signal) -> State {
        if self.state == State::Terminated {
            debug!(signal = %signal, "Already terminated, ignoring signal");
            return self.state;
        }

        info!(signal = %signal, "Signal received");

        match signal {
            Signal::ReloadRetire => self.reload(true),
            Signal::ReloadCoexist => self.reload(false),
            Signal::Shutdown => {
                self.release("shutdown");
                self.state = State::Terminated;
            }
        }

        self.state
    }

    fn reload(&mut self, retire: bool) {
        let Some(listener) = self.listener.as_ref() else {
            warn!(address = %self.address, "No listener to hand off, reload ignored");
            return;
        };

        match self.spawner.spawn(&self.address, listener) {
            Ok(child) => {
                info!(pid = child.pid(), retire, "Forked child process");
                self.children.push(child);
                if retire {
                    self.release("retire");
                }
            }
            Err(e) => {
                error!(
                    address = %self.address,
                    error = %e,
                    "Reload failed, keeping current listener"
                );
            }
        }
    }

    /// Stop accepting in this process. Close errors are reported only.
    fn release(&mut self, reason: &'static str) {
        self.stop_accepting.cancel();

        let Some(listener) = self.listener.take() else {
            debug!(reason, "Listener already released");
            return;
        };

        let name = listener.debug_name();
        match listener.close() {
            Ok(()) => info!(reason, name = %name, "Closed listener"),
            Err(e) => error!(reason, name = %name, error = %e, "Failed to close listener"),
        }
    }

    /// Forget children that have exited, logging their status.
    pub fn reap_children(&mut self) {
        self.children.retain_mut(|child| match child.try_reap() {
            Some(status) => {
                info!(pid = child.pid(), status = %status, "Child process exited");
                false
            }
            None => true,
        });
    }
}
