//! Graceful shutdown coordination.
//!
//! A [`ShutdownCoordinator`] pairs a cancellation token with a
//! `tokio::sync::watch` channel counting live background work. Listeners
//! clone the token and exit when it fires; background tasks hold a
//! [`WorkGuard`] whose drop decrements the counter. Draining is
//! event-driven: [`ShutdownCoordinator::drain`] sleeps on the watch channel
//! until the count reaches zero or the drain window elapses, rather than
//! polling.

use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Coordinates graceful shutdown across listeners and background tasks.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    work: watch::Sender<usize>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            work: watch::Sender::new(0),
            drain_timeout,
        }
    }

    /// A token that fires once shutdown begins. Cheap to clone; hand one to
    /// every listener and background loop.
    pub fn signal(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Begin shutdown: every held [`signal`](Self::signal) token fires.
    pub fn begin_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Register a unit of background work. Dropping the guard marks it
    /// finished.
    pub fn guard(&self) -> WorkGuard {
        self.work.send_modify(|active| *active += 1);
        WorkGuard {
            work: self.work.clone(),
        }
    }

    /// Units of background work currently running.
    pub fn active(&self) -> usize {
        *self.work.borrow()
    }

    /// Block until all registered work finishes, bounded by the drain
    /// window. Returns `false` when the window elapsed with work still
    /// running.
    pub async fn drain(&self) -> bool {
        let mut activity = self.work.subscribe();
        let settled = tokio::time::timeout(
            self.drain_timeout,
            activity.wait_for(|active| *active == 0),
        )
        .await;
        match settled {
            Ok(_) => {
                info!("background work drained");
                true
            }
            Err(_) => {
                warn!(
                    still_running = self.active(),
                    drain_seconds = self.drain_timeout.as_secs(),
                    "drain window elapsed with background work still running"
                );
                false
            }
        }
    }
}

/// Marks one unit of in-flight background work; finished on drop.
pub struct WorkGuard {
    work: watch::Sender<usize>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.work.send_modify(|active| *active = active.saturating_sub(1));
    }
}
