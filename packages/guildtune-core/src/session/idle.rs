//! Per-room idle-disconnect timer.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::runtime::TaskSpawner;

struct Armed {
    generation: u64,
    cancel: CancellationToken,
}

/// At most one armed timer per room.
///
/// Starting a timer cancels the previous one. A fired callback receives its
/// generation and must call [`IdleTimer::claim`] under the session lock before
/// acting, so a timer superseded or cancelled after it fired does nothing.
#[derive(Default)]
pub struct IdleTimer {
    generation: AtomicU64,
    armed: Mutex<Option<Armed>>,
}

impl IdleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer; `on_fire` runs after `delay` unless cancelled first.
    ///
    /// Returns the generation of the new timer.
    pub fn start<F, Fut>(&self, spawner: &TaskSpawner, delay: Duration, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        let previous = self.armed.lock().replace(Armed {
            generation,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        spawner.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_fire(generation).await,
            }
        });
        generation
    }

    /// Cancels the armed timer. Returns `false` if none was armed.
    pub fn cancel(&self) -> bool {
        match self.armed.lock().take() {
            Some(armed) => {
                armed.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Consumes the timer if `generation` is still the armed one.
    pub fn claim(&self, generation: u64) -> bool {
        let mut armed = self.armed.lock();
        if armed.as_ref().is_some_and(|a| a.generation == generation) {
            *armed = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.lock().is_some()
    }
}
