// Generic retry-with-timeout wrapper for chain calls
// Each attempt runs under its own timeout; failures are retried with
// linear backoff plus random jitter up to a bounded count, and the last
// error is re-thrown on exhaustion
//
// Numan Thabit 2025 Nov

use crate::errors::BridgeError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub retries: u32,
    pub base_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(300),
            timeout: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn quick() -> Self {
        Self {
            retries: 2,
            base_delay: Duration::from_millis(150),
            timeout: Duration::from_millis(2500),
        }
    }
}

pub async fn with_retries<T, F, Fut>(mut op: F, policy: RetryPolicy) -> Result<T, BridgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BridgeError>>,
{
    let attempts = policy.retries.max(1);
    let mut last_err = BridgeError::Rpc("no attempts executed".into());
    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => last_err = err,
            Err(_) => {
                last_err = BridgeError::Timeout(format!(
                    "attempt {attempt} exceeded {:?}",
                    policy.timeout
                ))
            }
        }
        if attempt < attempts {
            let jitter_ceiling = (policy.base_delay.as_millis() as u64 / 2).max(1);
            let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);
            let delay = policy.base_delay * attempt + Duration::from_millis(jitter);
            debug!(attempt = attempt, error = %last_err, delay_ms = delay.as_millis() as u64, "retrying chain call");
            tokio::time::sleep(delay).await;
        }
    }
    Err(last_err)
}
