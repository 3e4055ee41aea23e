//! Named retry policy shared by voice connects, audio process startup and
//! playlist-entry resolution.
//!
//! A [`RetryPolicy`] is a plain value: a number of attempts, a flat delay
//! between them, and an optional per-attempt timeout. Call sites apply the
//! timeout themselves through [`RetryPolicy::timed`] so that a timed-out attempt
//! can still clean up whatever it partially created.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Attempts, flat delay and optional per-attempt timeout for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Sleep between a failed attempt and the next one.
    pub delay: Duration,
    /// Upper bound on a single attempt, applied via [`RetryPolicy::timed`].
    pub attempt_timeout: Option<Duration>,
}

/// The last failure of a retried operation once all attempts are used up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    /// Number of attempts actually made.
    pub attempts: u32,
    /// Error returned by the final attempt.
    pub last: E,
}

/// Outcome of a single attempt bounded by [`RetryPolicy::timed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    /// The attempt completed with an error.
    Failed(E),
    /// The attempt did not complete within the per-attempt timeout.
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{}", e),
            Self::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs_f32()),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy without a per-attempt timeout.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            attempt_timeout: None,
        }
    }

    /// Returns a copy of the policy with a per-attempt timeout.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Runs `operation` until it succeeds or the attempts are exhausted.
    ///
    /// Every error is treated as retryable. The closure receives the 1-based
    /// attempt number.
    pub async fn run<T, E, F, Fut>(&self, action: &str, operation: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run_while(action, operation, |_| true).await
    }

    /// Runs `operation` until it succeeds, the attempts are exhausted, or it
    /// returns an error for which `retryable` is false.
    pub async fn run_while<T, E, F, Fut, P>(
        &self,
        action: &str,
        mut operation: F,
        retryable: P,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let total = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= total || !retryable(&e) => {
                    log::warn!(
                        "[Retry] {} failed on attempt {}/{}: {}",
                        action,
                        attempt,
                        total,
                        e
                    );
                    return Err(Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "[Retry] {} attempt {}/{} failed: {}",
                        action,
                        attempt,
                        total,
                        e
                    );
                }
            }

            attempt += 1;
            log::info!(
                "[Retry] Retrying {} (attempt {}/{}) after {}ms",
                action,
                attempt,
                total,
                self.delay.as_millis()
            );
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Awaits `attempt`, bounded by the policy's per-attempt timeout if any.
    pub async fn timed<T, E, Fut>(&self, attempt: Fut) -> Result<T, AttemptError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        match self.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result.map_err(AttemptError::Failed),
                Err(_) => Err(AttemptError::TimedOut(limit)),
            },
            None => attempt.await.map_err(AttemptError::Failed),
        }
    }

    /// Like [`RetryPolicy::timed`], but measured from `began` so that several
    /// steps of one attempt share a single per-attempt budget.
    pub async fn timed_since<T, E, Fut>(
        &self,
        began: Instant,
        step: Fut,
    ) -> Result<T, AttemptError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        match self.attempt_timeout {
            Some(limit) => match tokio::time::timeout_at(began + limit, step).await {
                Ok(result) => result.map_err(AttemptError::Failed),
                Err(_) => Err(AttemptError::TimedOut(limit)),
            },
            None => step.await.map_err(AttemptError::Failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn returns_first_success_without_sleeping() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        let start = Instant::now();

        let result: Result<u32, Exhausted<String>> =
            policy.run("probe", |attempt| async move { Ok(attempt) }).await;

        assert_eq!(result, Ok(1));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_a_later_attempt_after_flat_delays() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = policy
            .run("probe", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {} failed", attempt))
                    } else {
                        Ok("connected")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_carries_the_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result: Result<(), _> = policy
            .run("probe", |attempt| async move { Err(format!("boom {}", attempt)) })
            .await;

        assert_eq!(
            result,
            Err(Exhausted {
                attempts: 3,
                last: "boom 3".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run_while(
                "probe",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("private") }
                },
                |e| *e != "private",
            )
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let result: Result<(), _> = policy.run("probe", |_| async { Err("nope") }).await;
        assert_eq!(result.unwrap_err().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_reports_timeout() {
        let policy =
            RetryPolicy::new(1, Duration::ZERO).with_attempt_timeout(Duration::from_secs(20));

        let result: Result<(), AttemptError<String>> = policy
            .timed(std::future::pending::<Result<(), String>>())
            .await;

        assert_eq!(result, Err(AttemptError::TimedOut(Duration::from_secs(20))));
        assert_eq!(
            AttemptError::<String>::TimedOut(Duration::from_secs(20)).to_string(),
            "timed out after 20s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timed_since_shares_one_budget_across_steps() {
        let policy =
            RetryPolicy::new(1, Duration::ZERO).with_attempt_timeout(Duration::from_secs(30));
        let began = Instant::now();

        let first: Result<(), AttemptError<String>> = policy
            .timed_since(began, async {
                tokio::time::sleep(Duration::from_secs(20)).await;
                Ok(())
            })
            .await;
        assert_eq!(first, Ok(()));

        let second: Result<(), AttemptError<String>> = policy
            .timed_since(began, std::future::pending::<Result<(), String>>())
            .await;
        assert_eq!(second, Err(AttemptError::TimedOut(Duration::from_secs(30))));
        assert_eq!(began.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn timed_without_limit_passes_errors_through() {
        let policy = RetryPolicy::new(1, Duration::ZERO);
        let result: Result<(), _> = policy.timed(async { Err("refused") }).await;
        assert_eq!(result, Err(AttemptError::Failed("refused")));
    }
}
