//! Retry policy with exponential backoff.
//!
//! The delay for attempt `n` is `min(base * 2^n, cap)` plus a uniform jitter
//! of up to half that value. Jitter only ever adds, so the longest possible
//! wait is `1.5 * cap`.

pub mod driver;

use std::time::Duration;

use rand::Rng;

use crate::error::{ErrorKind, ErrorRecord};

pub use driver::{with_retry, RetryDriver, RetryOutcome};

/// Base delay used when none is configured.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound on the exponential part of a delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Number of retries allowed when none is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// HTTP statuses the request driver retries.
pub const DEFAULT_RETRY_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Wait before retry number `attempt` (zero-based), capped at
/// [`DEFAULT_MAX_DELAY`] before jitter.
pub fn next_delay(attempt: u32, base_delay: Duration) -> Duration {
    next_delay_with(attempt, base_delay, DEFAULT_MAX_DELAY, &mut rand::thread_rng())
}

/// Like [`next_delay`] with an explicit cap and random source.
pub fn next_delay_with<R: Rng + ?Sized>(
    attempt: u32,
    base_delay: Duration,
    cap: Duration,
    rng: &mut R,
) -> Duration {
    let base_ms = base_delay.as_secs_f64() * 1000.0;
    let cap_ms = cap.as_secs_f64() * 1000.0;

    // 2^64 already exceeds any sane cap
    let exponent = attempt.min(64) as i32;
    let backoff_ms = (base_ms * 2f64.powi(exponent)).min(cap_ms);

    let jitter_ms = 0.5 * backoff_ms * rng.gen::<f64>();
    Duration::from_secs_f64((backoff_ms + jitter_ms) / 1000.0)
}

/// Whether another attempt is allowed for this record.
pub fn is_retryable(record: &ErrorRecord, attempt: u32, max_retries: u32) -> bool {
    record.retryable && attempt < max_retries
}

/// Retry parameters shared by boundaries and the request driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Maximum number of retries.
    pub max_retries: u32,
    /// Statuses that the request driver treats as transient.
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the cap applied before jitter.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Replaces the retryable status set.
    pub fn with_retry_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.retry_statuses = statuses.into();
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_for_attempt_with(attempt, &mut rand::thread_rng())
    }

    /// Delay before retry number `attempt` using the given random source.
    pub fn delay_for_attempt_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        next_delay_with(attempt, self.base_delay, self.max_delay, rng)
    }

    /// Whether `record` may be retried after `attempt` retries.
    pub fn allows(&self, record: &ErrorRecord, attempt: u32) -> bool {
        is_retryable(record, attempt, self.max_retries)
    }

    /// Whether a failed request should be sent again.
    ///
    /// Stricter than [`RetryPolicy::allows`]: the error must also be a
    /// network or timeout failure, or carry one of `retry_statuses`.
    pub fn should_retry_request(&self, record: &ErrorRecord, attempt: u32) -> bool {
        if !self.allows(record, attempt) {
            return false;
        }
        matches!(record.kind, ErrorKind::Network | ErrorKind::Timeout)
            || record
                .status_code
                .is_some_and(|status| self.retry_statuses.contains(&status))
    }
}
