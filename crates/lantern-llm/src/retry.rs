//! Exponential backoff retry policy for provider calls.
//!
//! Classifies [`ProviderError`]s into transient and permanent, and
//! computes backoff delays. The tool loop drives the retry iterations
//! itself so it can emit retry events and honor cancellation between
//! attempts.

use std::time::Duration;

use crate::error::ProviderError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts for one logical call (default: 3).
    pub max_attempts: u32,
    /// Base delay before the first retry (default: 1 second).
    pub base_delay: Duration,
    /// Multiplier applied per attempt (default: 2.0).
    pub factor: f64,
    /// Maximum delay between attempts (default: 30 seconds).
    pub max_delay: Duration,
    /// Jitter: random 0..fraction of the delay is added (default: 0.25).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.25,
        }
    }
}

/// Whether a [`ProviderError`] is transient and worth retrying.
///
/// Rate limits are retryable at the call level; the turn-level policy of
/// surfacing a rate-limit message to the user applies only after the
/// attempts here are exhausted.
pub fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimited { .. } => true,
        ProviderError::Timeout => true,
        ProviderError::Http(_) => true,
        ProviderError::RequestFailed(msg) => {
            msg.starts_with("HTTP 500")
                || msg.starts_with("HTTP 502")
                || msg.starts_with("HTTP 503")
                || msg.starts_with("HTTP 504")
        }
        _ => false,
    }
}

/// Delay before retry attempt `attempt` (0-indexed), with jitter.
///
/// The deterministic part is `min(base_delay * factor^attempt, max_delay)`;
/// jitter adds 0..`jitter_fraction` of that, seeded from the clock.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base_ms = config.base_delay.as_millis() as f64;
    let raw_ms = base_ms * config.factor.powi(attempt as i32);
    let capped_ms = raw_ms.min(config.max_delay.as_millis() as f64) as u64;

    let jitter_max_ms = (capped_ms as f64 * config.jitter_fraction) as u64;
    let jitter_ms = if jitter_max_ms > 0 {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        seed % (jitter_max_ms + 1)
    } else {
        0
    };

    Duration::from_millis(capped_ms + jitter_ms)
}
