//! Shutdown coordination.
//!
//! Every command run registers with the [`Drainer`] before it starts. Once
//! shutdown begins, new registrations are refused and shutdown waits for the
//! registered ones to finish. Nothing in flight is cancelled.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct DrainState {
    shutting_down: bool,
    in_progress: usize,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<DrainState>,
    idle: Notify,
}

/// Tracks in-flight operations. Cheap to clone; clones share state.
#[derive(Debug, Default, Clone)]
pub struct Drainer {
    inner: Arc<Inner>,
}

/// A snapshot of the drainer, as served by `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainStatus {
    pub shutting_down: bool,
    pub in_progress_operations: usize,
}

impl Drainer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DrainState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a new operation, or returns `None` once shutdown has begun.
    ///
    /// The operation counts as in progress until the guard is dropped.
    pub fn try_add_new_ongoing_operation(&self) -> Option<OperationGuard> {
        let mut state = self.state();
        if state.shutting_down {
            return None;
        }
        state.in_progress += 1;
        Some(OperationGuard {
            drainer: self.clone(),
        })
    }

    /// Refuses new operations and waits for in-flight ones to finish.
    pub async fn shutdown_blocking(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            info!(in_progress = state.in_progress, "Draining in-progress operations");
        }

        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state().in_progress == 0 {
                break;
            }
            notified.await;
        }
        info!("All in-progress operations complete, shutting down");
    }

    pub fn status(&self) -> DrainStatus {
        let state = self.state();
        DrainStatus {
            shutting_down: state.shutting_down,
            in_progress_operations: state.in_progress,
        }
    }
}

/// An in-flight operation registered with a [`Drainer`].
#[derive(Debug)]
#[must_use = "the operation is marked complete as soon as the guard is dropped"]
pub struct OperationGuard {
    drainer: Drainer,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let remaining = {
            let mut state = self.drainer.state();
            state.in_progress = state.in_progress.saturating_sub(1);
            state.in_progress
        };
        if remaining == 0 {
            debug!("No operations in progress");
            self.drainer.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counts_operations() {
        let drainer = Drainer::new();
        let a = drainer.try_add_new_ongoing_operation().unwrap();
        let b = drainer.try_add_new_ongoing_operation().unwrap();
        assert_eq!(drainer.status().in_progress_operations, 2);
        drop(a);
        drop(b);
        assert_eq!(
            drainer.status(),
            DrainStatus {
                shutting_down: false,
                in_progress_operations: 0
            }
        );
    }

    #[tokio::test]
    async fn shutdown_with_nothing_in_flight_returns() {
        let drainer = Drainer::new();
        drainer.shutdown_blocking().await;
        assert!(drainer.status().shutting_down);
        assert!(drainer.try_add_new_ongoing_operation().is_none());
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_operations() {
        let drainer = Drainer::new();
        let guard = drainer.try_add_new_ongoing_operation().unwrap();

        let waiter = {
            let drainer = drainer.clone();
            tokio::spawn(async move { drainer.shutdown_blocking().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert!(drainer.status().shutting_down);
        assert!(drainer.try_add_new_ongoing_operation().is_none());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("shutdown should finish once the operation completes")
            .unwrap();
    }
}
