//! Request gate: bounded-concurrency admission control for the upstream host.
//!
//! The gate is a bulkhead with a bounded wait queue, built from two semaphores:
//!
//! - `admission` holds `max_concurrent + queue_capacity` permits and is only ever *tried*, so a
//!   caller arriving at a full queue is turned away on the spot instead of suspending;
//! - `slots` holds `max_concurrent` permits and is awaited. Tokio semaphores are fair, so
//!   waiters are granted slots in the order they started waiting.
//!
//! A [`Ticket`] owns one permit of each and gives both back when dropped, which wakes the next
//! waiter. Dropping a [`Waiting`] (or the future awaiting it) before it is granted removes the
//! caller from the queue without ever touching a slot.

use crate::error::{BuildError, GateRejected};
use crate::telemetry::{GateEvent, PolicyEvent, Telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

/// Shared admission control. Clones refer to the same slots and queue.
#[derive(Clone, Debug)]
pub struct RequestGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    admission: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    /// Permits `admission` was created with.
    admission_total: usize,
    max_concurrent: usize,
    queue_capacity: usize,
    telemetry: Telemetry,
}

impl RequestGate {
    pub fn new(
        max_concurrent: usize,
        queue_capacity: usize,
        telemetry: Telemetry,
    ) -> Result<Self, BuildError> {
        if max_concurrent == 0 {
            return Err(BuildError::ZeroConcurrency);
        }
        let total = max_concurrent.saturating_add(queue_capacity).min(Semaphore::MAX_PERMITS);
        Ok(Self {
            inner: Arc::new(GateInner {
                admission: Arc::new(Semaphore::new(total)),
                slots: Arc::new(Semaphore::new(max_concurrent)),
                admission_total: total,
                max_concurrent,
                queue_capacity,
                telemetry,
            }),
        })
    }

    /// One slot, queue of `queue_capacity`, no telemetry.
    #[cfg(test)]
    pub(crate) fn serial(queue_capacity: usize) -> Self {
        Self::new(1, queue_capacity, Telemetry::null()).unwrap()
    }

    /// Take a queue position without suspending.
    ///
    /// Fails immediately with [`GateRejected::QueueFull`] when every slot is busy and the queue
    /// is at capacity; the caller is never enqueued in that case.
    pub fn try_enqueue(&self) -> Result<Waiting, GateRejected> {
        match self.inner.admission.clone().try_acquire_owned() {
            Ok(admission) => Ok(Waiting {
                admission,
                slots: self.inner.slots.clone(),
                enqueued_at: Instant::now(),
            }),
            Err(TryAcquireError::NoPermits) => {
                let queued = self.queued();
                tracing::warn!(
                    queued,
                    capacity = self.inner.queue_capacity,
                    "request gate rejected execution"
                );
                Err(GateRejected::QueueFull { queued, capacity: self.inner.queue_capacity })
            }
            Err(TryAcquireError::Closed) => Err(GateRejected::Closed),
        }
    }

    /// Wait for a slot, reporting admission and rejection to telemetry.
    ///
    /// Events are handed off without waiting for the sink. Nothing suspends between taking the
    /// queue position and joining the slot wait.
    pub async fn acquire(&self) -> Result<Ticket, GateRejected> {
        let capacity = self.inner.queue_capacity;
        let waiting = match self.try_enqueue() {
            Ok(waiting) => waiting,
            Err(rejected) => {
                if let GateRejected::QueueFull { queued, capacity } = rejected {
                    self.inner
                        .telemetry
                        .emit_detached(PolicyEvent::Gate(GateEvent::Rejected { queued, capacity }));
                }
                return Err(rejected);
            }
        };
        let queued = self.queued();
        self.inner.telemetry.emit_detached(PolicyEvent::Gate(GateEvent::Admitted { queued, capacity }));
        waiting.ticket().await
    }

    /// Stop admitting. Queued waiters and later callers get [`GateRejected::Closed`]; tickets
    /// already granted stay valid until dropped.
    pub fn close(&self) {
        self.inner.admission.close();
        self.inner.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.admission.is_closed()
    }

    /// Calls currently holding a ticket.
    pub fn in_flight(&self) -> usize {
        self.inner.max_concurrent.saturating_sub(self.inner.slots.available_permits())
    }

    /// Calls holding a queue position but no ticket yet.
    pub fn queued(&self) -> usize {
        let held =
            self.inner.admission_total.saturating_sub(self.inner.admission.available_permits());
        held.saturating_sub(self.in_flight())
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue_capacity
    }
}

/// A queue position that has not been granted a slot yet.
#[derive(Debug)]
pub struct Waiting {
    admission: OwnedSemaphorePermit,
    slots: Arc<Semaphore>,
    enqueued_at: Instant,
}

impl Waiting {
    /// Suspend until a slot frees up.
    pub async fn ticket(self) -> Result<Ticket, GateRejected> {
        let slot = self.slots.acquire_owned().await.map_err(|_| GateRejected::Closed)?;
        Ok(Ticket { _slot: slot, _admission: self.admission, waited: self.enqueued_at.elapsed() })
    }
}

/// The right to execute against the upstream host. Released on drop.
#[derive(Debug)]
pub struct Ticket {
    _slot: OwnedSemaphorePermit,
    _admission: OwnedSemaphorePermit,
    waited: Duration,
}

impl Ticket {
    /// Time spent queued before the slot was granted.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Give the slot back, waking the next waiter.
    pub fn release(self) {}
}
