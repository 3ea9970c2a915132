//! Backoff curves per failure category.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::FailureCategory;

/// One backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: i32,
}

const HOUR: u64 = 60 * 60;

impl RetryConfig {
    /// Session problems clear only after the user re-authenticates
    pub const NO_SESSION: RetryConfig = RetryConfig {
        initial_delay: Duration::from_secs(12 * HOUR),
        multiplier: 2,
        max_delay: Duration::from_secs(48 * HOUR),
        max_attempts: 30,
    };

    pub const FAILED: RetryConfig = RetryConfig {
        initial_delay: Duration::from_secs(3 * HOUR),
        multiplier: 2,
        max_delay: Duration::from_secs(48 * HOUR),
        max_attempts: 30,
    };

    pub const EXECUTION_FAILED: RetryConfig = RetryConfig {
        initial_delay: Duration::from_secs(2 * 60),
        multiplier: 2,
        max_delay: Duration::from_secs(HOUR),
        max_attempts: 50,
    };

    #[must_use]
    pub fn for_category(category: FailureCategory) -> Self {
        match category {
            FailureCategory::NoSession => Self::NO_SESSION,
            FailureCategory::Failed => Self::FAILED,
            FailureCategory::ExecutionFailed => Self::EXECUTION_FAILED,
        }
    }

    /// `min(initial * multiplier^(attempt-1), cap)`, attempts below 1 count as 1
    #[must_use]
    pub fn delay_for(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).max(0) as u32;
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Delay before the `attempt`-th retry of `category`
#[must_use]
pub fn next_retry_delay(category: FailureCategory, attempt: i32) -> Duration {
    RetryConfig::for_category(category).delay_for(attempt)
}

/// Absolute time of the `attempt`-th retry, counted from now
#[must_use]
pub fn calculate_next_retry(category: FailureCategory, attempt: i32) -> DateTime<Utc> {
    let delay = next_retry_delay(category, attempt);
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Budget check; reaching `max_attempts` exactly is still within budget
#[must_use]
pub fn has_exceeded_max(category: FailureCategory, retry_count: i32) -> bool {
    retry_count > RetryConfig::for_category(category).max_attempts
}
