//! Adaptive retry for rate-limited responses.
//!
//! Semantics:
//! - Only a `429 Too Many Requests` response triggers a retry. Other statuses and transport
//!   failures are returned untouched.
//! - The delay comes from the server when it can: a reset instant (seconds since epoch) in the
//!   configured header gives `max(0, reset - now)`. A missing or malformed hint falls back to
//!   the configured backoff, `10^attempt` seconds by default.
//! - At most `max_retries` retries (one by default). When the budget is spent the last response
//!   is returned as is, still rate limited; callers decide what that means.
//! - The wait is a cooperative sleep. Whatever the caller holds while calling `execute` (a gate
//!   ticket, for instance) stays held for the whole cycle.

use crate::backoff::Backoff;
use crate::clock::{EpochClock, SystemClock};
use crate::config::{RateLimitConfig, DEFAULT_RESET_HEADER};
use crate::error::BuildError;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{PolicyEvent, RetryEvent, RetryKind, Telemetry};
use crate::transport::ApiResponse;
use reqwest::header::{HeaderMap, HeaderName};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Server-communicated reset instant parsed from one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitFeedback {
    reset_at: Option<i64>,
}

impl RateLimitFeedback {
    pub fn new(reset_at: Option<i64>) -> Self {
        Self { reset_at }
    }

    /// First value of `header` as an integer epoch second. Anything else counts as absent.
    pub fn from_headers(headers: &HeaderMap, header: &HeaderName) -> Self {
        let reset_at = headers
            .get(header)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok());
        Self { reset_at }
    }

    pub fn reset_at(&self) -> Option<i64> {
        self.reset_at
    }

    /// Time left until the reset instant, clamped at zero.
    pub fn delay_from(&self, now_epoch_secs: i64) -> Option<Duration> {
        self.reset_at.map(|reset| {
            let secs = reset.saturating_sub(now_epoch_secs).max(0);
            Duration::from_secs(secs as u64)
        })
    }
}

/// A response the adaptive policy can inspect for a rate-limit signal.
pub trait RateLimitSignal {
    fn is_rate_limited(&self) -> bool;
    fn headers(&self) -> &HeaderMap;
}

impl RateLimitSignal for ApiResponse {
    fn is_rate_limited(&self) -> bool {
        ApiResponse::is_rate_limited(self)
    }

    fn headers(&self) -> &HeaderMap {
        ApiResponse::headers(self)
    }
}

/// Bookkeeping for one logical call. Dropped with the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Retries performed so far.
    pub attempt: usize,
    pub last_delay: Option<Duration>,
}

/// Retries a call once (by default) when the upstream host says it is rate limited.
#[derive(Clone, Debug)]
pub struct AdaptiveRetryPolicy {
    max_retries: usize,
    fallback: Backoff,
    reset_header: HeaderName,
    clock: Arc<dyn EpochClock>,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Telemetry,
}

impl AdaptiveRetryPolicy {
    pub fn builder() -> AdaptiveRetryPolicyBuilder {
        AdaptiveRetryPolicyBuilder::new()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Delay before retry number `attempt` (1-indexed) given what the response said.
    pub fn delay_for(&self, attempt: usize, feedback: &RateLimitFeedback) -> Duration {
        feedback
            .delay_from(self.clock.now_epoch_secs())
            .unwrap_or_else(|| self.fallback.delay(attempt))
    }

    /// Run `attempt` until it yields a response that is not rate limited or the budget is spent.
    ///
    /// Errors from `attempt` are returned immediately; they are not this policy's concern.
    pub async fn execute<R, E, Op, Fut>(&self, mut attempt: Op) -> Result<R, E>
    where
        R: RateLimitSignal,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut state = RetryState::default();
        loop {
            let response = attempt().await?;
            if !response.is_rate_limited() {
                return Ok(response);
            }
            if state.attempt >= self.max_retries {
                tracing::debug!(attempts = state.attempt + 1, "rate limit retry budget spent");
                self.telemetry
                    .emit(PolicyEvent::Retry(RetryEvent::Exhausted {
                        policy: RetryKind::RateLimit,
                        attempts: state.attempt + 1,
                    }))
                    .await;
                return Ok(response);
            }

            state.attempt += 1;
            let feedback = RateLimitFeedback::from_headers(response.headers(), &self.reset_header);
            let delay = self.delay_for(state.attempt, &feedback);
            state.last_delay = Some(delay);
            drop(response);

            tracing::info!(
                attempt = state.attempt,
                delay = ?delay,
                reset_at = ?feedback.reset_at(),
                "hit upstream rate limit, retrying"
            );
            self.telemetry
                .emit(PolicyEvent::Retry(RetryEvent::RateLimited {
                    attempt: state.attempt,
                    delay,
                    reset_at: feedback.reset_at(),
                }))
                .await;
            self.sleeper.sleep(delay).await;
        }
    }
}

impl Default for AdaptiveRetryPolicy {
    fn default() -> Self {
        AdaptiveRetryPolicyBuilder::new().build_unchecked()
    }
}

/// Builder for [`AdaptiveRetryPolicy`].
pub struct AdaptiveRetryPolicyBuilder {
    max_retries: usize,
    fallback: Backoff,
    reset_header: String,
    clock: Arc<dyn EpochClock>,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Telemetry,
}

impl AdaptiveRetryPolicyBuilder {
    pub fn new() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            max_retries: defaults.max_retries,
            fallback: defaults.fallback_backoff(),
            reset_header: defaults.reset_header,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            telemetry: Telemetry::null(),
        }
    }

    /// Take retry count, header and fallback from configuration.
    pub fn config(mut self, config: &RateLimitConfig) -> Self {
        self.max_retries = config.max_retries;
        self.fallback = config.fallback_backoff();
        self.reset_header = config.reset_header.clone();
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Backoff used when the response carries no usable reset hint.
    pub fn fallback(mut self, backoff: Backoff) -> Self {
        self.fallback = backoff;
        self
    }

    pub fn reset_header(mut self, header: impl Into<String>) -> Self {
        self.reset_header = header.into();
        self
    }

    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: EpochClock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub(crate) fn clock_arc(mut self, clock: Arc<dyn EpochClock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn sleeper_arc(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn build(self) -> Result<AdaptiveRetryPolicy, BuildError> {
        let reset_header = HeaderName::from_bytes(self.reset_header.as_bytes())
            .map_err(|_| BuildError::InvalidHeaderName(self.reset_header.clone()))?;
        Ok(AdaptiveRetryPolicy {
            max_retries: self.max_retries,
            fallback: self.fallback,
            reset_header,
            clock: self.clock,
            sleeper: self.sleeper,
            telemetry: self.telemetry,
        })
    }

    fn build_unchecked(self) -> AdaptiveRetryPolicy {
        AdaptiveRetryPolicy {
            max_retries: self.max_retries,
            fallback: self.fallback,
            reset_header: HeaderName::from_static(DEFAULT_RESET_HEADER),
            clock: self.clock,
            sleeper: self.sleeper,
            telemetry: self.telemetry,
        }
    }
}

impl Default for AdaptiveRetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
