//! Retry policy shared by the writers and connection setup
//!
//! Provides capped exponential backoff, a retry decision derived from the error class,
//! and a cancellable sleep.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

/// Action to take after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction {
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if another attempt is allowed after `failed_attempts` failures
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }

    /// Decide what to do after the `failed_attempts`-th failure with `error`
    pub fn decide(&self, failed_attempts: u32, error: &RelayError) -> RetryAction {
        if !error.is_retryable() || !self.should_retry(failed_attempts) {
            return RetryAction::GiveUp;
        }
        RetryAction::RetryAfter(self.backoff_for_attempt(failed_attempts.saturating_sub(1)))
    }

    /// Wraps the final error of an operation once retries are spent
    pub fn exhausted(&self, operation: &'static str, attempts: u32, error: RelayError) -> RelayError {
        if error.is_retryable() {
            RelayError::RetriesExhausted {
                operation,
                attempts,
                source: Box::new(error),
            }
        } else {
            error
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the attempts run out.
    ///
    /// Returns `Ok(None)` if `cancel` fires while waiting between attempts.
    pub async fn run<F, Fut, T>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    failures += 1;
                    match self.decide(failures, &e) {
                        RetryAction::RetryAfter(backoff) => {
                            warn!(
                                operation,
                                attempt = failures,
                                max = self.max_attempts,
                                ?backoff,
                                error = %e,
                                "Retrying after backoff"
                            );
                            crate::metrics::record_retry(operation);
                            if !sleep_or_cancel(backoff, cancel).await {
                                debug!(operation, "Cancelled during retry backoff");
                                return Ok(None);
                            }
                        }
                        RetryAction::GiveUp => return Err(self.exhausted(operation, failures, e)),
                    }
                }
            }
        }
    }
}

/// Sleeps for `duration`; returns false if `cancel` fired first
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(16));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_secs(32));
        assert_eq!(policy.backoff_for_attempt(5), Duration::from_secs(60)); // capped
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::default();
        let transport = RelayError::transport("rpc", "connection refused");

        assert_eq!(
            policy.decide(1, &transport),
            RetryAction::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            policy.decide(3, &transport),
            RetryAction::RetryAfter(Duration::from_secs(8))
        );
        assert_eq!(policy.decide(5, &transport), RetryAction::GiveUp);
        assert_eq!(
            policy.decide(1, &RelayError::verification("bad proof")),
            RetryAction::GiveUp
        );
    }

    #[tokio::test]
    async fn test_run_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let result = fast_policy()
            .run("test_op", &cancel, move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(RelayError::transport("rpc", "timeout"))
                } else {
                    Ok(42u32)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let err = fast_policy()
            .run("test_op", &cancel, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RelayError::transport("rpc", "timeout"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(
            err,
            RelayError::RetriesExhausted { attempts: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_run_does_not_retry_fatal_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let err = fast_policy()
            .run("test_op", &cancel, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RelayError::verification("bad branch"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RelayError::Verification(_)));
    }

    #[test]
    fn test_sleep_or_cancel() {
        let cancel = CancellationToken::new();
        assert!(tokio_test::block_on(sleep_or_cancel(
            Duration::from_millis(1),
            &cancel
        )));
        cancel.cancel();
        assert!(!tokio_test::block_on(sleep_or_cancel(
            Duration::from_secs(3600),
            &cancel
        )));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(3600),
            max_backoff: Duration::from_secs(3600),
            ..RetryPolicy::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = policy
            .run("test_op", &cancel, || async {
                Err::<(), _>(RelayError::transport("rpc", "timeout"))
            })
            .await
            .unwrap();

        assert_eq!(result, None);
    }
}
