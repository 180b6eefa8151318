//! Bounded retries, per-call deadlines, and call spacing around any model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use chronicler_shared::{ChroniclerError, ModelConfig, Result};

use crate::model::{LanguageModel, ModelReply, ModelRequest};

/// How hard to try before giving up on a call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Attempt `n` (1-based) waits `n * backoff` before retrying.
    pub backoff: Duration,
    /// Deadline for each attempt.
    pub call_timeout: Duration,
    /// Minimum spacing between the starts of consecutive calls.
    pub min_interval: Duration,
}

impl From<&ModelConfig> for RetryPolicy {
    fn from(config: &ModelConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            call_timeout: Duration::from_secs(config.request_timeout_secs),
            min_interval: Duration::from_millis(config.min_call_interval_ms),
        }
    }
}

/// Wraps a model with [`RetryPolicy`].
///
/// Transient failures (network, rate limits, timeouts) are retried; after the
/// last attempt they become [`ChroniclerError::RetriesExhausted`]. Other
/// errors return immediately.
pub struct RetryingModel {
    inner: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
    last_call: Mutex<Option<Instant>>,
}

impl RetryingModel {
    pub fn new(inner: Arc<dyn LanguageModel>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            last_call: Mutex::new(None),
        }
    }

    /// Sleep until `min_interval` has passed since the previous call started.
    async fn throttle(&self) {
        if self.policy.min_interval.is_zero() {
            return;
        }
        // Held across the sleep so concurrent callers queue up in order.
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.policy.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl LanguageModel for RetryingModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.throttle().await;

            let outcome = match tokio::time::timeout(self.policy.call_timeout, self.inner.invoke(request)).await {
                Ok(result) => result,
                Err(_) => Err(ChroniclerError::Timeout {
                    operation: request.task.as_str().to_string(),
                    elapsed_ms: self.policy.call_timeout.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(reply) => {
                    if attempt > 1 {
                        debug!(task = %request.task, attempt, "model call succeeded after retry");
                    }
                    return Ok(reply);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let wait = self.policy.backoff * attempt;
                    warn!(
                        task = %request.task,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "transient model failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(ChroniclerError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
