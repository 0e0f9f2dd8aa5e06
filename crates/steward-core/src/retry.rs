//! Bounded exponential backoff for rate-limited remote calls.
//!
//! Only a rate-limit signal triggers a retry. Every other error, and the
//! final rate-limit error once the budget is spent, is returned unchanged.

use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Errors that can tell whether they mean "slow down".
pub trait RateLimitSignal {
    fn is_rate_limited(&self) -> bool;
}

/// Textual markers used when an error carries no status code.
pub fn text_signals_rate_limit(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["429", "rate limit", "rate-limit", "ratelimit", "too many requests"]
        .iter()
        .any(|marker| lower.contains(marker))
}

impl RateLimitSignal for String {
    fn is_rate_limited(&self) -> bool {
        text_signals_rate_limit(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: base, 2×base, 4×base, …
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `op`, retrying on rate-limit errors with a blocking sleep.
pub fn call_with_backoff<T, E, F>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: RateLimitSignal + fmt::Display,
{
    call_with_backoff_using(policy, std::thread::sleep, op)
}

/// Same as [`call_with_backoff`] with an injectable sleeper.
pub fn call_with_backoff_using<T, E, F, S>(policy: &RetryPolicy, mut sleep: S, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    S: FnMut(Duration),
    E: RateLimitSignal + fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "rate limited, backing off before retry"
                );
                sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
