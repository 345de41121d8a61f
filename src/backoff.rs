//! Backoff strategies.
//!
//! Attempt semantics: attempt `0` is the initial call (no delay); retries start at `attempt = 1`.
//! Computations that would overflow saturate to [`MAX_BACKOFF`].
//!
//! ```rust
//! use std::time::Duration;
//! use scoresaber_gate::Backoff;
//!
//! // 10^attempt seconds: the fallback used when a 429 carries no reset hint.
//! let fallback = Backoff::exponential(Duration::from_secs(10)).with_factor(10);
//! assert_eq!(fallback.delay(1), Duration::from_secs(10));
//! assert_eq!(fallback.delay(2), Duration::from_secs(100));
//!
//! let fixed = Backoff::constant(Duration::from_secs(10));
//! assert_eq!(fixed.delay(3), Duration::from_secs(10));
//! ```

use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
enum BackoffKind {
    Constant { delay: Duration },
    Exponential { base: Duration, factor: u32 },
}

/// Delay schedule for retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant { delay } }
    }

    /// `base * factor^(attempt - 1)`, doubling unless [`Backoff::with_factor`] says otherwise.
    pub fn exponential(base: Duration) -> Self {
        Self { kind: BackoffKind::Exponential { base, factor: 2 } }
    }

    /// Change the growth factor of an exponential backoff. No effect on constant backoff.
    pub fn with_factor(mut self, factor: u32) -> Self {
        if let BackoffKind::Exponential { factor: existing, .. } = &mut self.kind {
            *existing = factor;
        }
        self
    }

    /// Delay before `attempt` (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.kind {
            BackoffKind::Constant { delay } => (*delay).min(MAX_BACKOFF),
            BackoffKind::Exponential { base, factor } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let multiplier = u128::from(*factor).saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(multiplier);
                Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64)
            }
        }
    }
}
