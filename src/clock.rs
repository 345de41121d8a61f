//! Wall-clock abstraction used to turn rate-limit reset instants into delays.
//!
//! Reset hints arrive as seconds since the Unix epoch, so unlike a monotonic clock this one has
//! to agree with the server's notion of "now".

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of the current time in whole seconds since the Unix epoch.
pub trait EpochClock: Send + Sync + std::fmt::Debug {
    fn now_epoch_secs(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl EpochClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(epoch_secs: i64) -> Self {
        Self { now: Arc::new(AtomicI64::new(epoch_secs)) }
    }

    pub fn set(&self, epoch_secs: i64) {
        self.now.store(epoch_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl EpochClock for ManualClock {
    fn now_epoch_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
