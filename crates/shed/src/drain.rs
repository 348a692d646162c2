//! In-flight connection tracking for the serving side.
//!
//! After a retire or shutdown the old process stops accepting but keeps
//! serving what it already accepted. Accept loops take a [`ConnectionGuard`]
//! per connection; [`ConnectionTracker::drain`] waits for the guards to drop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Held for the lifetime of one accepted connection.
#[must_use = "the connection is untracked once the guard is dropped"]
pub struct ConnectionGuard {
    inner: Arc<Inner>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

struct Inner {
    active: AtomicUsize,
    idle: Notify,
}

/// Counts live connections.
#[derive(Clone)]
pub struct ConnectionTracker {
    inner: Arc<Inner>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                active: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn guard(&self) -> ConnectionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait for every guard to drop, up to `timeout`.
    ///
    /// Returns `true` if all connections finished, `false` on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        if self.active() == 0 {
            return true;
        }

        debug!(active = self.active(), ?timeout, "Waiting for in-flight connections");

        match tokio::time::timeout(timeout, self.idle()).await {
            Ok(()) => {
                info!("In-flight connections finished");
                true
            }
            Err(_) => {
                warn!(still_open = self.active(), "Gave up waiting for connections");
                false
            }
        }
    }

    async fn idle(&self) {
        while self.active() > 0 {
            // Registered before the re-check so a guard dropped in between
            // still wakes us.
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active() == 0 {
                break;
            }
            notified.await;
        }
    }
}
