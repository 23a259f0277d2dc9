//! Bounded exponential backoff for model calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use contactscout_shared::{LlmConfig, Result, ScoutError};

use crate::client::CallError;

/// How many times, and how patiently, a model call is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first; at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before retry number `attempt` (1 = the first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

/// Run `call` until it succeeds, fails permanently, or runs out of attempts.
///
/// - transient failures are retried with exponential backoff, then surface
///   as [`ScoutError::ModelCallFailure`]
/// - a rejected request surfaces as `ModelCallFailure` without retrying
/// - a permanent failure surfaces as [`ScoutError::ProviderUnavailable`]
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, CallError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "model call succeeded after retry");
                }
                return Ok(value);
            }
            Err(CallError::Transient(message)) if attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    %message,
                    "transient model failure, will retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(CallError::Transient(message)) | Err(CallError::Rejected(message)) => {
                return Err(ScoutError::ModelCallFailure {
                    operation: operation.to_string(),
                    attempts: attempt,
                    message,
                });
            }
            Err(CallError::Permanent(message)) => {
                return Err(ScoutError::ProviderUnavailable(format!("{operation}: {message}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = with_retry(&fast(3), "extract", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CallError::Transient("429".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = with_retry(&fast(3), "verify", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CallError::Transient("503".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            ScoutError::ModelCallFailure {
                operation,
                attempts,
                ..
            } => {
                assert_eq!(operation, "verify");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rejected_request_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = with_retry(&fast(3), "extract", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CallError::Rejected("400 content filter".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn permanent_failure_escalates() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = with_retry(&fast(3), "extract", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CallError::Permanent("401 invalid api key".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ScoutError::ProviderUnavailable(_)));
        assert!(!err.is_recoverable());
    }
}
