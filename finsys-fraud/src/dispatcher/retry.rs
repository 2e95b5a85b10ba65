//! Retry policy for remote classification
//!
//! The default is [`RetryPolicy::None`]: one remote attempt, then the
//! heuristic. A transient outage therefore leaves the transaction with a
//! heuristic verdict until it is dispatched again. Exponential backoff is
//! opt-in through `[scoring.retry]`.

use finsys_common::config::RetryConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Single attempt
    #[default]
    None,

    /// Up to `max_retries` further attempts, doubling the pause each time
    ExponentialBackoff {
        max_retries: u32,
        initial: Duration,
        max: Duration,
    },
}

impl RetryPolicy {
    /// `max_retries = 0` selects [`RetryPolicy::None`]
    pub fn from_config(config: &RetryConfig) -> Self {
        if config.max_retries == 0 {
            return RetryPolicy::None;
        }
        RetryPolicy::ExponentialBackoff {
            max_retries: config.max_retries,
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Pause before retry number `retry` (1-based), or `None` when exhausted
    pub fn backoff(&self, retry: u32) -> Option<Duration> {
        match *self {
            RetryPolicy::None => None,
            RetryPolicy::ExponentialBackoff {
                max_retries,
                initial,
                max,
            } => {
                if retry == 0 || retry > max_retries {
                    return None;
                }
                let factor = 2u32.saturating_pow(retry - 1);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match *self {
            RetryPolicy::None => 1,
            RetryPolicy::ExponentialBackoff { max_retries, .. } => max_retries.saturating_add(1),
        }
    }
}
