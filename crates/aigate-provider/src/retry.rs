use std::future::Future;
use std::time::Duration;

use aigate_common::Config;
use tracing::warn;

use crate::adapter::{AdapterError, AdapterResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.request_max_retries,
            base_delay: Duration::from_millis(config.request_base_delay_ms),
        }
    }
}

/// Run `op` with exponential backoff: attempts `0..=max_retries`, delay
/// `base_delay * 2^attempt`, retrying recoverable failures only. When the
/// budget runs out the last error propagates wrapped in max-retries context.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> AdapterResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AdapterResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= policy.max_retries {
            return Err(AdapterError::RetriesExhausted {
                retries: policy.max_retries,
                source: Box::new(err),
            });
        }
        let delay = policy.base_delay * 2u32.saturating_pow(attempt);
        warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "request attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_recoverable_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(fast_policy(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AdapterError::Upstream {
                    status: 503,
                    message: "busy".to_string(),
                })
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let result: AdapterResult<()> = with_retry(fast_policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AdapterError::Auth {
                status: 401,
                message: "denied".to_string(),
            })
        })
        .await;
        assert!(matches!(result, Err(AdapterError::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_wraps_the_last_error_with_context() {
        let calls = AtomicU32::new(0);
        let result: AdapterResult<()> = with_retry(fast_policy(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AdapterError::Upstream {
                status: 429,
                message: "rate limited".to_string(),
            })
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(AdapterError::RetriesExhausted { retries, source }) => {
                assert_eq!(retries, 2);
                assert!(matches!(*source, AdapterError::Upstream { status: 429, .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
