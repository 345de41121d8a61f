//! Fixed-backoff retry for binary asset fetches.
//!
//! Semantics:
//! - Only transport-level failures (`FetchError::Transport` whose error is transient) are
//!   retried. An HTTP error status is an answer, not a failure to get one, and is returned at
//!   once.
//! - `max_retries` retries after the first attempt (three by default, so four attempts), with
//!   the same delay before each (ten seconds by default).
//! - When every attempt failed the last transport error is surfaced as
//!   `FetchError::RetryExhausted`; nothing is downgraded to an empty value.
//! - No gate: asset fetches do not count against the upstream concurrency cap.

use crate::backoff::Backoff;
use crate::config::TransientConfig;
use crate::error::FetchError;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{PolicyEvent, RetryEvent, RetryKind, Telemetry};
use std::future::Future;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct TransientRetryPolicy {
    max_retries: usize,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Telemetry,
}

impl TransientRetryPolicy {
    pub fn new(config: &TransientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff(),
            sleeper: Arc::new(TokioSleeper),
            telemetry: Telemetry::null(),
        }
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
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

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    pub async fn execute<T, Op, Fut>(&self, mut attempt: Op) -> Result<T, FetchError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut retries = 0;
        loop {
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(FetchError::Transport(err)) if err.is_transient() => err,
                Err(other) => return Err(other),
            };

            if retries >= self.max_retries {
                tracing::warn!(attempts = retries + 1, error = %err, "asset fetch retries exhausted");
                self.telemetry
                    .emit(PolicyEvent::Retry(RetryEvent::Exhausted {
                        policy: RetryKind::Transient,
                        attempts: retries + 1,
                    }))
                    .await;
                return Err(FetchError::RetryExhausted { attempts: retries + 1, source: err });
            }

            retries += 1;
            let delay = self.backoff.delay(retries);
            tracing::warn!(attempt = retries, delay = ?delay, error = %err, "transient failure, retrying");
            self.telemetry
                .emit(PolicyEvent::Retry(RetryEvent::Transient {
                    attempt: retries,
                    delay,
                    kind: err.kind(),
                }))
                .await;
            self.sleeper.sleep(delay).await;
        }
    }
}

impl Default for TransientRetryPolicy {
    fn default() -> Self {
        Self::new(&TransientConfig::default())
    }
}
