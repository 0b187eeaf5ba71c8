/*!
 * Retry controller for provider calls.
 *
 * Wraps a provider call with bounded exponential backoff and a minimum
 * interval between consecutive calls. Whether to retry is decided only by
 * the `ProviderErrorKind` of the failure.
 */

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::{ProviderError, RetryError};

/// Backoff policy for a single unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of calls, including the first one
    pub max_attempts: u32,
    /// Sleep after the first retryable failure; doubled after each retry
    #[serde(with = "millis")]
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

/// Runs provider calls under a `RetryPolicy`.
///
/// One controller is used per job run; the call interval is enforced across
/// every call made through it.
#[derive(Debug)]
pub struct RetryController {
    policy: RetryPolicy,
    min_call_interval: Duration,
    last_call: Option<Instant>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, min_call_interval: Duration) -> Self {
        Self {
            policy,
            min_call_interval,
            last_call: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `operation` until it succeeds, fails non-retryably, or the
    /// attempt budget runs out.
    pub async fn call<T, F, Fut>(&mut self, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut delay = self.policy.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.wait_for_call_slot().await;

            let result = operation().await;
            self.last_call = Some(Instant::now());

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Call succeeded on attempt {}/{}", attempt, max_attempts);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(RetryError::Provider(error));
            }

            if attempt >= max_attempts {
                warn!("Giving up after {} attempts: {}", attempt, error);
                return Err(RetryError::RetriesExhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let wait = match error.retry_after {
                Some(requested) => requested.max(delay),
                None => delay,
            };
            warn!(
                "Attempt {}/{} failed ({}), retrying in {}ms",
                attempt,
                max_attempts,
                error,
                wait.as_millis()
            );
            tokio::time::sleep(wait).await;
            delay = delay.saturating_mul(2);
        }
    }

    async fn wait_for_call_slot(&self) {
        if let Some(last_call) = self.last_call {
            let ready_at = last_call + self.min_call_interval;
            if Instant::now() < ready_at {
                tokio::time::sleep_until(ready_at).await;
            }
        }
    }
}

/// Serialize durations as integer milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
