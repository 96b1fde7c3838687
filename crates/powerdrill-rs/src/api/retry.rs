//! Automatic retry with exponential backoff.
//!
//! Only idempotent metadata calls (GET, DELETE) are retried, and only on
//! gateway-class statuses (502, 503, 504) or connect/timeout failures. POSTs,
//! the streaming call and part uploads go out exactly once.

use std::future::Future;
use std::time::Duration;

use reqwest::Method;
use tracing::warn;

use crate::error::{PowerdrillError, Result};

/// HTTP statuses that are worth another attempt.
pub const RETRY_STATUSES: [u16; 3] = [502, 503, 504];

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries. Uses sensible defaults.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// No retries at all.
    pub fn disabled() -> Self {
        Self::with_retries(0)
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

/// Whether the method may be replayed without side effects.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::DELETE | Method::HEAD)
}

pub fn is_transient_status(status: u16) -> bool {
    RETRY_STATUSES.contains(&status)
}

/// Whether an error indicates a transient (retryable) failure.
pub fn is_transient_error(error: &PowerdrillError) -> bool {
    match error {
        PowerdrillError::HttpStatus { status, .. } => is_transient_status(*status),
        PowerdrillError::Request(e) => e.is_connect() || e.is_timeout(),
        _ => false,
    }
}

/// Retry an async call with exponential backoff for transient errors.
///
/// `call` is invoked once plus up to `config.max_retries` more times. The last
/// error is returned unchanged once the budget is spent.
pub async fn retry_call<T, F, Fut>(config: &RetryConfig, label: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < config.max_retries && is_transient_error(&e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Transient error on {label} (attempt {}/{}): {e}. Retrying in {delay:?}...",
                    attempt + 1,
                    config.max_retries,
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
