//! Retry policy evaluation for activity attempts.
//!
//! Two mechanisms control retry behavior:
//!
//! 1. RETRY POLICY: controls HOW MANY times and WHEN to retry (backoff
//!    strategy). Every activity carries one, either its own or the engine
//!    default.
//! 2. ERROR CLASSIFICATION: the [`Retryable`](crate::executor::Retryable)
//!    trait controls WHICH errors are worth retrying. A permanent error (an
//!    explicit business rejection, invalid input) short-circuits the policy
//!    regardless of remaining attempts; that is what lets the orchestration
//!    core escalate to a human instead of burning attempts on a request that
//!    cannot succeed.
//!
//! The evaluator itself is [`RetryPolicy::decide`]: given the attempt number
//! and the error, it answers retry-with-delay or permanent failure.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for activity retry behavior.
///
/// Controls how many times an activity should retry on transient errors and
/// the backoff strategy between attempts.
///
/// # Examples
///
/// ```
/// use telos::core::RetryPolicy;
/// use std::time::Duration;
///
/// // Named policy: predefined sensible defaults
/// let policy = RetryPolicy::STANDARD;
/// assert_eq!(policy.max_attempts, 3);
///
/// // Custom policy: full control, reusable
/// const SUBMIT_RETRY: RetryPolicy = RetryPolicy {
///     max_attempts: 5,
///     initial_delay: Duration::from_secs(1),
///     max_delay: Duration::from_secs(30),
///     backoff_multiplier: 2.0,
/// };
/// assert!(SUBMIT_RETRY.delay_for_attempt(1).is_some());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try).
    ///
    /// For example, `max_attempts = 3` means:
    /// - Attempt 1: immediate (first try)
    /// - Attempt 2: after initial_delay
    /// - Attempt 3: after initial_delay * backoff_multiplier
    pub max_attempts: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (caps exponential backoff).
    pub max_delay: Duration,

    /// Multiplier for exponential backoff.
    ///
    /// Each retry delay is calculated as:
    /// `min(initial_delay * backoff_multiplier^(attempt-1), max_delay)`
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// No retries - fail immediately on first error.
    ///
    /// Use this for validation steps and other operations whose failure is
    /// always permanent.
    pub const NONE: Self = Self {
        max_attempts: 1,
        initial_delay: Duration::from_secs(0),
        max_delay: Duration::from_secs(0),
        backoff_multiplier: 1.0,
    };

    /// Standard retry policy - sensible defaults for most activities.
    ///
    /// - Max attempts: 3 (initial try + 2 retries)
    /// - Initial delay: 1 second
    /// - Max delay: 30 seconds
    /// - Backoff: exponential (2x each time)
    ///
    /// Retry schedule: immediate → 1s → 2s
    pub const STANDARD: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
    };

    /// Aggressive retry policy for critical operations.
    ///
    /// - Max attempts: 10
    /// - Initial delay: 100ms
    /// - Max delay: 10 seconds
    /// - Backoff: exponential (1.5x each time)
    pub const AGGRESSIVE: Self = Self {
        max_attempts: 10,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(10),
        backoff_multiplier: 1.5,
    };

    /// Create a policy with custom max_attempts (uses standard delays).
    pub const fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Calculate the delay before the next retry attempt.
    ///
    /// Uses exponential backoff: `initial_delay * backoff_multiplier^(attempt-1)`
    /// capped at `max_delay`.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The current attempt number (1-indexed)
    ///
    /// # Returns
    ///
    /// Duration to wait before the next retry, or None if the attempt budget
    /// is exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None; // No more retries
        }

        // attempt=1 (first retry): multiplier^0 → initial_delay
        // attempt=2 (second retry): multiplier^1 → initial_delay * multiplier
        let exponent = (attempt - 1) as f64;
        let multiplier = self.backoff_multiplier.powf(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;

        // Cap at max_delay
        let delay = Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()));

        Some(delay)
    }

    /// The retry policy evaluator: given the failed attempt number and the
    /// error's classification, decide whether to retry.
    ///
    /// A permanent error short-circuits to [`RetryDecision::Permanent`]
    /// regardless of remaining attempts.
    pub fn decide<E: crate::executor::Retryable>(&self, attempt: u32, error: &E) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Permanent;
        }
        match self.delay_for_attempt(attempt) {
            Some(delay) => RetryDecision::Retry { delay },
            None => RetryDecision::Permanent,
        }
    }
}

impl Default for RetryPolicy {
    /// Default is NONE (no retries): an activity opts into retries by
    /// carrying a policy, never by accident.
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u32> for RetryPolicy {
    /// Convert a number to a RetryPolicy with that many max_attempts,
    /// using standard delays.
    fn from(max_attempts: u32) -> Self {
        Self::with_max_attempts(max_attempts)
    }
}

/// Outcome of evaluating a failed attempt against a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Schedule another attempt after `delay`.
    Retry { delay: Duration },
    /// Stop: either the error is permanent or the attempt budget ran out.
    Permanent,
}
