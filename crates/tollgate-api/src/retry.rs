//! Retry with exponential backoff for API requests.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tollgate_types::ApiError;

/// Configuration for retry behavior on transient API errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay, including server-requested ones.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// A config that makes exactly one attempt.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt + 1`.
    ///
    /// A rate-limit error carrying a server delay uses that delay. Otherwise
    /// `initial_delay * backoff_factor^attempt` with ±25% jitter. Both are
    /// clamped to `max_delay`.
    pub fn delay_for(&self, attempt: u32, error: &ApiError) -> Duration {
        if let ApiError::RateLimited {
            retry_after_ms: Some(ms),
        } = error
        {
            return Duration::from_millis(*ms).min(self.max_delay);
        }

        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jittered = capped * rand::rng().random_range(0.75..=1.25);
        Duration::from_secs_f64(jittered).min(self.max_delay)
    }
}

/// Whether a failed request is worth sending again.
pub fn is_transient(error: &ApiError) -> bool {
    matches!(
        error,
        ApiError::RateLimited { .. }
            | ApiError::Overloaded
            | ApiError::Server { .. }
            | ApiError::Network(_)
            | ApiError::Timeout
    )
}

/// Run `attempt_fn` until it succeeds, fails permanently, or runs out of retries.
///
/// The closure receives the zero-based attempt number.
pub async fn with_retries<T, F, Fut>(config: &RetryConfig, mut attempt_fn: F) -> Result<T, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        let err = match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !is_transient(&err) || attempt >= config.max_retries {
            return Err(err);
        }

        let delay = config.delay_for(attempt, &err);
        tracing::warn!(
            "Transient API error (attempt {}/{}): {err}. Retrying in {}ms...",
            attempt + 1,
            config.max_retries + 1,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
