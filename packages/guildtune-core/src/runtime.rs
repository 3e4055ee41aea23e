//! Task spawning for background room work.
//!
//! Every task the orchestrator starts (playback cycles, completion waiters,
//! watchdogs, idle timers, maintenance) goes through a [`TaskSpawner`]. The
//! spawner tracks its tasks so shutdown can wait for them to finish.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

/// Spawns and tracks background tasks on a Tokio runtime.
///
/// Cloning is cheap; clones share the same tracker.
///
/// # Example
///
/// ```ignore
/// let spawner = TaskSpawner::current();
/// spawner.spawn(async {
///     // Background work here
/// });
/// spawner.drain(Duration::from_secs(5)).await;
/// ```
#[derive(Clone)]
pub struct TaskSpawner {
    handle: Handle,
    tracker: TaskTracker,
}

impl TaskSpawner {
    /// Creates a new `TaskSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tracker: TaskTracker::new(),
        }
    }

    /// Creates a new `TaskSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Spawns a future as a tracked background task.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn_on(future, &self.handle);
    }

    /// Number of tracked tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Waits up to `timeout` for every tracked task to finish.
    ///
    /// Returns `true` if all tasks completed in time. Tasks spawned after the
    /// drain started are still tracked and waited for.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            log::warn!(
                "[Runtime] {} task(s) still running after {}s drain",
                self.tracker.len(),
                timeout.as_secs()
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn spawner_executes_task() {
        let spawner = TaskSpawner::current();
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        spawner.spawn(async move {
            executed_clone.store(true, Ordering::SeqCst);
        });

        assert!(spawner.drain(Duration::from_secs(1)).await);
        assert!(executed.load(Ordering::SeqCst));
        assert_eq!(spawner.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_on_stuck_task() {
        let spawner = TaskSpawner::current();
        spawner.spawn(std::future::pending());

        assert!(!spawner.drain(Duration::from_secs(5)).await);
        assert_eq!(spawner.active_tasks(), 1);
    }
}
