//! Retry with exponential backoff for notification delivery.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::NotifyError;

/// Backoff policy for delivery attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to each subsequent wait.
    pub backoff_multiplier: f64,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 1.5,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and default delays.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_millis = (self.initial_delay.as_millis() as f64 * multiplier) as u64;
        Duration::from_millis(delay_millis).min(self.max_delay)
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Runs `attempt_fn` until it succeeds, fails permanently, runs out of attempts,
/// or `cancel` fires.
///
/// Only [`NotifyError::Transport`] failures are retried. Waits between attempts
/// and the attempts themselves are abandoned as soon as `cancel` fires. There is
/// no wait after the final attempt.
pub async fn retry_with_backoff<F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    channel: &'static str,
    mut attempt_fn: F,
) -> Result<(), NotifyError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), NotifyError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(NotifyError::Cancelled {
                channel,
                attempts: attempt,
            });
        }
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(NotifyError::Cancelled { channel, attempts: attempt });
            }
            outcome = attempt_fn(attempt) => outcome,
        };

        let err = match outcome {
            Ok(()) => {
                debug!(channel, attempt, "delivery succeeded");
                return Ok(());
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        if attempt >= max_attempts {
            return Err(NotifyError::Delivery {
                channel,
                attempts: attempt,
                reason: err.to_string(),
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            channel,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "delivery attempt failed, retrying"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(NotifyError::Cancelled { channel, attempts: attempt });
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert!((policy.backoff_multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn delay_for_attempt_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(150));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(225));
    }

    #[test]
    fn delay_capped() {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_secs(10))
            .with_backoff_multiplier(10.0)
            .with_max_delay(Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_backoff() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let start = Instant::now();

        let result = retry_with_backoff(&policy, &cancel, "webhook", |_| {
            let calls = calls.clone();
            async move {
                calls.lock().push(start.elapsed());
                Err(NotifyError::transport("503"))
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(NotifyError::Delivery { attempts: 3, .. })
        ));
        let calls = calls.lock().clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], Duration::ZERO);
        assert!(calls[1] >= Duration::from_millis(100) && calls[1] < Duration::from_millis(110));
        let second_wait = calls[2] - calls[1];
        assert!(
            second_wait >= Duration::from_millis(150) && second_wait < Duration::from_millis(160)
        );
        // No wait after the last attempt.
        assert!(start.elapsed() - calls[2] < Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&policy, &cancel, "email", |_| {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(NotifyError::transport("timeout"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn config_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&policy, &cancel, "webhook", |_| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(NotifyError::InvalidUrl {
                    url: "nope".to_string(),
                    reason: "relative URL without a base".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(NotifyError::InvalidUrl { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy::default().with_initial_delay(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = retry_with_backoff(&policy, &cancel, "webhook", |_| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(NotifyError::transport("down"))
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(NotifyError::Cancelled { attempts: 1, .. })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn already_cancelled_makes_no_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&RetryPolicy::default(), &cancel, "email", |_| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(NotifyError::Cancelled { attempts: 0, .. })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
