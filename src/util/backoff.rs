//! Shared retry policy for upstream I/O.
//!
//! All upstream clients (embedding, LLM, vector store) use the same schedule:
//! exponential backoff with base 100ms, factor 2, ±25% jitter, max 3 attempts.
//! Only errors classified as transient are retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Retry schedule parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_attempts: u32,
    /// Jitter fraction applied symmetrically around each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            factor: 2,
            max_attempts: 3,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry attempt `n` (0-based), jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * (self.factor as f64).powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_millis((base * (1.0 + jitter)).max(0.0) as u64)
    }
}

/// Errors opt into retries by reporting themselves transient.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Run `op` under `policy`, retrying transient failures.
///
/// Permanent errors and exhaustion both surface the last error to the caller.
pub async fn with_retries<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
