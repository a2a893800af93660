//! Retry classification.
//!
//! [`classify`] turns a failed attempt into a [`RetryDecision`]. Transient
//! failures back off exponentially from a per-cause base delay:
//!
//! ```text
//! delay = base * 2^(attempt - 1), capped at max_delay
//! ```
//!
//! Rate limits use the server's `Retry-After` as the base when it sent one.

use std::time::Duration;

use crmsync_core::QueueConfig;

use crate::error::{DirectoryError, SyncError};

/// Retry settings, usually derived from [`QueueConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before a transient failure is given up.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub rate_limit_delay: Duration,
    pub conflict_delay: Duration,
    pub max_delay: Duration,
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(queue: &QueueConfig) -> Self {
        Self {
            retry_attempts: queue.retry_attempts.max(1),
            retry_delay: Duration::from_secs(queue.retry_delay_secs),
            rate_limit_delay: Duration::from_secs(queue.rate_limit_delay_secs),
            conflict_delay: Duration::from_secs(queue.conflict_delay_secs),
            max_delay: Duration::from_secs(queue.max_delay_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

/// What to do with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { after: Duration },
    Fatal { reason: String, exhausted: bool },
}

/// Classify the failure of attempt number `attempt` (1-based).
pub fn classify(err: &SyncError, attempt: u32, policy: &RetryPolicy) -> RetryDecision {
    if !err.is_transient() {
        return RetryDecision::Fatal {
            reason: err.to_string(),
            exhausted: false,
        };
    }
    if attempt >= policy.retry_attempts {
        return RetryDecision::Fatal {
            reason: format!("{err} (gave up after {attempt} attempts)"),
            exhausted: true,
        };
    }
    RetryDecision::Retry {
        after: backoff(base_delay(err, policy), attempt, policy.max_delay),
    }
}

/// Base delay for a transient error before exponential growth.
pub(crate) fn base_delay(err: &SyncError, policy: &RetryPolicy) -> Duration {
    match err {
        SyncError::Directory(DirectoryError::RateLimited { retry_after }) => {
            retry_after.unwrap_or(policy.rate_limit_delay)
        }
        SyncError::Directory(DirectoryError::Conflict { .. })
        | SyncError::UnresolvedConflict { .. } => policy.conflict_delay,
        _ => policy.retry_delay,
    }
}

fn backoff(base: Duration, attempt: u32, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |d| d.min(max))
}
