//! Per-call timeouts and bounded exponential backoff for service calls.

use std::{future::Future, time::Duration};

use tokio::time::timeout;
use tracing::{info, warn};

use crate::base::{config::Config, error::DiagnosisError};

/// Timeout and retry settings for one kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on a single attempt.
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each one after.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn storage(config: &Config) -> Self {
        Self {
            timeout: config.storage_timeout(),
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
        }
    }

    pub fn bot(config: &Config) -> Self {
        Self {
            timeout: config.bot_timeout(),
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
        }
    }

    /// The same timeout, but a single attempt.
    pub fn once(self) -> Self {
        Self { max_retries: 0, ..self }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// Run `call` under the policy's timeout, retrying transient failures.
///
/// A timed out attempt becomes the error built by `on_timeout`, and counts as
/// transient. Non-transient errors are returned immediately.
pub async fn call_with_retry<T, F, Fut>(name: &str, policy: RetryPolicy, on_timeout: impl Fn(Duration) -> DiagnosisError, mut call: F) -> Result<T, DiagnosisError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DiagnosisError>>,
{
    let mut retries = 0;

    loop {
        let err = match timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => {
                if retries > 0 {
                    info!("{name} succeeded after {} attempts", retries + 1);
                }
                return Ok(value);
            }
            Ok(Err(err)) => err,
            Err(_) => on_timeout(policy.timeout),
        };

        if !err.is_transient() || retries >= policy.max_retries {
            if retries > 0 {
                warn!("{name} failed after {} attempts: {err}", retries + 1);
            }
            return Err(err);
        }

        retries += 1;
        warn!("{name} failed, retrying {retries}/{}: {err}", policy.max_retries);

        tokio::time::sleep(policy.delay_for(retries)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::base::error::ErrorKind;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    fn timed_out(d: Duration) -> DiagnosisError {
        DiagnosisError::bot(format!("timed out after {d:?}"), true)
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result = call_with_retry("flaky", policy(3), timed_out, || {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DiagnosisError::storage("throttled", true))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = call_with_retry("denied", policy(3), timed_out, || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(DiagnosisError::storage("access denied", false))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Storage);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeouts_become_errors_of_the_call_kind() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = call_with_retry("hang", policy(1), timed_out, || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                std::future::pending().await
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BotInvocation);
        assert!(err.to_string().contains("timed out"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.once().max_retries, 0);
    }
}
