//! Structured observer hooks.
//!
//! Policies emit [`PolicyEvent`]s inline at the boundary where something noteworthy happens: a
//! gate rejection, a rate-limit retry, a decode failure. Events flow into a [`TelemetrySink`],
//! which is just a `tower::Service<PolicyEvent>`, so sinks compose with ordinary tower
//! combinators. Emission is best effort: a sink that is not ready or fails loses the event and
//! never affects the call.
//!
//! - **Gate**: `Admitted`, `Rejected`
//! - **Retry**: `RateLimited`, `Transient`, `Exhausted`
//! - **Decode**: `UnsupportedContent`, `InvalidPayload`
//! - **Request**: terminal outcome of a fetcher call
//!
//! ```rust
//! use scoresaber_gate::telemetry::{MemorySink, PolicyEvent, GateEvent, Telemetry};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = MemorySink::new();
//! let telemetry = Telemetry::new(sink.clone());
//! telemetry.emit(PolicyEvent::Gate(GateEvent::Rejected { queued: 1000, capacity: 1000 })).await;
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

use crate::error::TransportErrorKind;
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A telemetry sink that consumes policy events.
pub trait TelemetrySink:
    tower::Service<PolicyEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: PolicyEvent)
where
    S: tower::Service<PolicyEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Events emitted by the access layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    Gate(GateEvent),
    Retry(RetryEvent),
    Decode(DecodeEvent),
    Request(RequestOutcome),
}

/// Request gate admission decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// A caller took a queue position. `queued` counts waiters including this one.
    Admitted { queued: usize, capacity: usize },
    /// A caller was turned away because the queue was full.
    Rejected { queued: usize, capacity: usize },
}

/// Which retry policy produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    RateLimit,
    Transient,
}

/// Retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// A 429 was received; the call will be retried after `delay`.
    RateLimited {
        /// Retry number (1-indexed).
        attempt: usize,
        delay: Duration,
        /// Reset instant advertised by the server, seconds since epoch.
        reset_at: Option<i64>,
    },
    /// A transport failure on the byte path; retrying after `delay`.
    Transient { attempt: usize, delay: Duration, kind: TransportErrorKind },
    /// The retry budget is spent and the last outcome is final.
    Exhausted { policy: RetryKind, attempts: usize },
}

/// Decode failures on the JSON path. Both end in an absence value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    UnsupportedContent { path: String, content_type: String },
    InvalidPayload { path: String, message: String },
}

/// Terminal outcome of a fetcher call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Decoded { duration: Duration },
    Absent { duration: Duration },
    Bytes { duration: Duration, len: usize },
    Failed { duration: Duration },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Gate(event) => write!(f, "Gate::{}", event),
            PolicyEvent::Retry(event) => write!(f, "Retry::{}", event),
            PolicyEvent::Decode(event) => write!(f, "Decode::{}", event),
            PolicyEvent::Request(event) => write!(f, "Request::{}", event),
        }
    }
}

impl fmt::Display for GateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateEvent::Admitted { queued, capacity } => {
                write!(f, "Admitted({}/{})", queued, capacity)
            }
            GateEvent::Rejected { queued, capacity } => {
                write!(f, "Rejected({}/{})", queued, capacity)
            }
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::RateLimited { attempt, delay, reset_at: Some(reset) } => {
                write!(f, "RateLimited(#{}, delay={:?}, reset_at={})", attempt, delay, reset)
            }
            RetryEvent::RateLimited { attempt, delay, reset_at: None } => {
                write!(f, "RateLimited(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Transient { attempt, delay, kind } => {
                write!(f, "Transient(#{}, delay={:?}, kind={})", attempt, delay, kind)
            }
            RetryEvent::Exhausted { policy, attempts } => {
                write!(f, "Exhausted({:?}, attempts={})", policy, attempts)
            }
        }
    }
}

impl fmt::Display for DecodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeEvent::UnsupportedContent { path, content_type } => {
                write!(f, "UnsupportedContent({}, {})", path, content_type)
            }
            DecodeEvent::InvalidPayload { path, message } => {
                write!(f, "InvalidPayload({}, {})", path, message)
            }
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Decoded { duration } => write!(f, "Decoded(duration={:?})", duration),
            RequestOutcome::Absent { duration } => write!(f, "Absent(duration={:?})", duration),
            RequestOutcome::Bytes { duration, len } => {
                write!(f, "Bytes(len={}, duration={:?})", len, duration)
            }
            RequestOutcome::Failed { duration } => write!(f, "Failed(duration={:?})", duration),
        }
    }
}

type EmitFn = dyn Fn(PolicyEvent) -> BoxFuture<'static, ()> + Send + Sync;

/// Type-erased handle to a sink, shared by every policy of one fetcher.
#[derive(Clone)]
pub struct Telemetry {
    emit: Arc<EmitFn>,
}

impl Telemetry {
    pub fn new<S>(sink: S) -> Self
    where
        S: TelemetrySink + Sync,
        S::Future: Send + 'static,
    {
        let emit = move |event: PolicyEvent| -> BoxFuture<'static, ()> {
            Box::pin(emit_best_effort(sink.clone(), event))
        };
        Self { emit: Arc::new(emit) }
    }

    /// Discards everything.
    pub fn null() -> Self {
        Self::new(NullSink)
    }

    pub async fn emit(&self, event: PolicyEvent) {
        (self.emit)(event).await
    }

    /// Hand the event to the sink on a separate task and return at once.
    ///
    /// Used where the caller must not suspend. Outside a tokio runtime the event is dropped.
    pub fn emit_detached(&self, event: PolicyEvent) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn((self.emit)(event));
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Telemetry(<sink>)")
    }
}

/// A sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<PolicyEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: PolicyEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs every event at INFO through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<PolicyEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        tracing::info!(event = %event, "policy_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps events in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<PolicyEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Bounded at 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of the stored events.
    pub fn events(&self) -> Vec<PolicyEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Stored events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&PolicyEvent) -> bool) -> usize {
        self.events.lock().map(|e| e.iter().filter(|ev| predicate(ev)).count()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<PolicyEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        if let Ok(mut guard) = self.events.lock() {
            if guard.len() >= self.capacity {
                guard.remove(0);
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            guard.push(event);
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_prefixed_by_family() {
        let event = PolicyEvent::Retry(RetryEvent::RateLimited {
            attempt: 1,
            delay: Duration::from_secs(5),
            reset_at: Some(1_700_000_005),
        });
        assert_eq!(event.to_string(), "Retry::RateLimited(#1, delay=5s, reset_at=1700000005)");

        let gate = PolicyEvent::Gate(GateEvent::Rejected { queued: 1000, capacity: 1000 });
        assert_eq!(gate.to_string(), "Gate::Rejected(1000/1000)");
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let sink = MemorySink::with_capacity(2);
        let telemetry = Telemetry::new(sink.clone());
        for queued in 1..=3 {
            telemetry.emit(PolicyEvent::Gate(GateEvent::Admitted { queued, capacity: 10 })).await;
        }

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(
            sink.events()[0],
            PolicyEvent::Gate(GateEvent::Admitted { queued: 2, capacity: 10 })
        );
    }

    #[tokio::test]
    async fn null_telemetry_accepts_events() {
        Telemetry::null()
            .emit(PolicyEvent::Request(RequestOutcome::Absent { duration: Duration::ZERO }))
            .await;
    }

    #[tokio::test]
    async fn count_filters_events() {
        let sink = MemorySink::new();
        let telemetry = Telemetry::new(sink.clone());
        telemetry.emit(PolicyEvent::Gate(GateEvent::Admitted { queued: 1, capacity: 1 })).await;
        telemetry.emit(PolicyEvent::Gate(GateEvent::Rejected { queued: 1, capacity: 1 })).await;

        let rejected =
            sink.count(|e| matches!(e, PolicyEvent::Gate(GateEvent::Rejected { .. })));
        assert_eq!(rejected, 1);
    }

    #[tokio::test]
    async fn detached_emit_returns_before_recording() {
        let sink = MemorySink::new();
        let telemetry = Telemetry::new(sink.clone());

        telemetry.emit_detached(PolicyEvent::Gate(GateEvent::Admitted { queued: 1, capacity: 1 }));
        assert!(sink.is_empty());

        tokio::task::yield_now().await;
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn detached_emit_outside_runtime_is_dropped() {
        let sink = MemorySink::new();
        Telemetry::new(sink.clone())
            .emit_detached(PolicyEvent::Gate(GateEvent::Admitted { queued: 1, capacity: 1 }));
        assert!(sink.is_empty());
    }
}
