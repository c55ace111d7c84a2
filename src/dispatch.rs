//! Background execution of command runs.
//!
//! Webhook handlers answer immediately and hand the command to the
//! [`Dispatcher`]. At most `limit` commands run at once; the rest wait for
//! a slot. In testing mode the dispatcher awaits the work before the handler
//! returns, so assertions run against a finished command.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    testing: bool,
    slots: Arc<Semaphore>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(limit: usize) -> Self {
        Dispatcher {
            testing: false,
            slots: Arc::new(Semaphore::new(limit.max(1))),
            tasks: TaskTracker::new(),
        }
    }

    /// Runs dispatched work inline instead of spawning it.
    pub fn testing() -> Self {
        Dispatcher {
            testing: true,
            ..Dispatcher::new(1)
        }
    }

    /// Runs `work` in the background, or to completion in testing mode.
    pub async fn dispatch<F>(&self, name: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.testing {
            work.await;
            return;
        }
        debug!(task = name, "Spawning background task");
        let slots = self.slots.clone();
        self.tasks.spawn(async move {
            let Ok(_slot) = slots.acquire_owned().await else {
                warn!(task = name, "Dispatcher closed, dropping task");
                return;
            };
            work.await;
        });
    }

    /// Stops accepting work and waits for spawned work to finish.
    pub async fn wait(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Spawned tasks that haven't finished yet, running or waiting.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn testing_mode_runs_inline() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        Dispatcher::testing()
            .dispatch("test", async move { flag.store(true, Ordering::SeqCst) })
            .await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn spawned_work_is_awaited_by_wait() {
        let dispatcher = Dispatcher::new(4);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        dispatcher
            .dispatch("test", async move {
                let _ = rx.await;
                flag.store(true, Ordering::SeqCst);
            })
            .await;
        assert_eq!(dispatcher.in_flight(), 1);

        tx.send(()).unwrap();
        dispatcher.wait().await;
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn running_work_never_exceeds_the_limit() {
        let dispatcher = Dispatcher::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            dispatcher
                .dispatch("test", async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
        }
        assert_eq!(dispatcher.in_flight(), 6);

        dispatcher.wait().await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }
}
