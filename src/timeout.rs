//! Per-attempt deadline.

use crate::error::TransportError;
use std::future::Future;
use std::time::Duration;

/// Bounds a single attempt; an overrun becomes a [`TransportError`] of kind `Timeout`, which the
/// transient policy treats like any other transport failure.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Returns `None` for a zero duration.
    pub fn new(duration: Duration) -> Option<Self> {
        (!duration.is_zero()).then_some(Self { duration })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn execute<T, E, Fut>(&self, attempt: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<TransportError>,
    {
        match tokio::time::timeout(self.duration, attempt).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timed_out(self.duration).into()),
        }
    }
}
