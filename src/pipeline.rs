//! Policy pipeline for JSON calls: request gate outside, adaptive rate-limit retry inside.
//!
//! ```text
//! caller ─▶ RequestGate::acquire ─▶ AdaptiveRetryPolicy ─▶ TimeoutPolicy ─▶ Transport::send
//!                 │                        │ 429: sleep, retry once
//!                 └── ticket held ─────────┴──────────────▶ GatedResponse (ticket inside)
//! ```
//!
//! With [`SlotHold::HoldDuringBackoff`] a call takes one ticket up front and keeps it through
//! every attempt and every rate-limit wait, so one throttled caller holds up the whole queue.
//! With [`SlotHold::ReleaseDuringBackoff`] each attempt takes its own ticket and the rate-limited
//! attempt gives it back before the wait; the retry then queues again behind whoever arrived in
//! the meantime.
//!
//! Either way the returned [`GatedResponse`] still owns the ticket of the final attempt, so the
//! body can be read before the next caller is let through.

use crate::config::SlotHold;
use crate::error::FetchError;
use crate::gate::{RequestGate, Ticket};
use crate::rate_limit::{AdaptiveRetryPolicy, RateLimitSignal};
use crate::timeout::TimeoutPolicy;
use crate::transport::{ApiRequest, ApiResponse, Transport};
use reqwest::header::HeaderMap;

/// Final response of a pipeline run together with the slot it was obtained under.
#[derive(Debug)]
pub struct GatedResponse {
    response: ApiResponse,
    ticket: Option<Ticket>,
}

impl GatedResponse {
    pub fn response(&self) -> &ApiResponse {
        &self.response
    }

    /// Split into the response and the ticket. Dropping the ticket lets the next caller in.
    pub fn into_parts(self) -> (ApiResponse, Option<Ticket>) {
        (self.response, self.ticket)
    }
}

impl RateLimitSignal for GatedResponse {
    fn is_rate_limited(&self) -> bool {
        self.response.is_rate_limited()
    }

    fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }
}

/// Gate and adaptive retry composed in a fixed order.
#[derive(Debug, Clone)]
pub struct PolicyPipeline {
    gate: RequestGate,
    retry: AdaptiveRetryPolicy,
    timeout: TimeoutPolicy,
    slot_hold: SlotHold,
}

impl PolicyPipeline {
    pub fn new(
        gate: RequestGate,
        retry: AdaptiveRetryPolicy,
        timeout: TimeoutPolicy,
        slot_hold: SlotHold,
    ) -> Self {
        Self { gate, retry, timeout, slot_hold }
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn slot_hold(&self) -> SlotHold {
        self.slot_hold
    }

    /// Run one logical call through the gate and the retry policy.
    ///
    /// A still-rate-limited final response is returned as `Ok`; interpreting it is up to the
    /// caller. Gate rejection and transport failures come back as errors without retry.
    pub async fn execute<T>(
        &self,
        transport: &T,
        request: &ApiRequest,
    ) -> Result<GatedResponse, FetchError>
    where
        T: Transport + ?Sized,
    {
        match self.slot_hold {
            SlotHold::HoldDuringBackoff => {
                let ticket = self.gate.acquire().await?;
                let gated = self.retry.execute(move || self.attempt(transport, request, None)).await?;
                Ok(GatedResponse { ticket: Some(ticket), ..gated })
            }
            SlotHold::ReleaseDuringBackoff => {
                self.retry
                    .execute(move || async move {
                        let ticket = self.gate.acquire().await?;
                        self.attempt(transport, request, Some(ticket)).await
                    })
                    .await
            }
        }
    }

    async fn attempt<T>(
        &self,
        transport: &T,
        request: &ApiRequest,
        ticket: Option<Ticket>,
    ) -> Result<GatedResponse, FetchError>
    where
        T: Transport + ?Sized,
    {
        let response = self.timeout.execute(transport.send(request)).await?;
        Ok(GatedResponse { response, ticket })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TransportError;
    use crate::sleeper::TrackingSleeper;
    use crate::telemetry::Telemetry;
    use crate::transport::Body;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned statuses and records how many tickets were out during each send.
    struct Canned {
        statuses: Mutex<VecDeque<StatusCode>>,
        gate: RequestGate,
        in_flight_seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Transport for Canned {
        async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            self.in_flight_seen.lock().unwrap().push(self.gate.in_flight());
            let status = self.statuses.lock().unwrap().pop_front().unwrap_or(StatusCode::OK);
            Ok(ApiResponse::new(status, HeaderMap::new(), Body::empty()))
        }
    }

    fn pipeline(gate: &RequestGate, slot_hold: SlotHold) -> PolicyPipeline {
        let retry = AdaptiveRetryPolicy::builder()
            .with_clock(ManualClock::new(0))
            .with_sleeper(TrackingSleeper::new())
            .build()
            .unwrap();
        PolicyPipeline::new(
            gate.clone(),
            retry,
            TimeoutPolicy::new(Duration::from_secs(30)).unwrap(),
            slot_hold,
        )
    }

    fn canned(gate: &RequestGate, statuses: &[StatusCode]) -> Canned {
        Canned {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            gate: gate.clone(),
            in_flight_seen: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn response_keeps_ticket_until_dropped() {
        let gate = RequestGate::new(1, 10, Telemetry::null()).unwrap();
        let transport = canned(&gate, &[StatusCode::OK]);
        let pipeline = pipeline(&gate, SlotHold::HoldDuringBackoff);

        let gated = pipeline.execute(&transport, &ApiRequest::get("item/1")).await.unwrap();
        assert_eq!(gate.in_flight(), 1);
        let (response, ticket) = gated.into_parts();
        assert_eq!(response.status(), StatusCode::OK);
        drop(ticket);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn hold_mode_keeps_one_ticket_across_retry() {
        let gate = RequestGate::new(1, 10, Telemetry::null()).unwrap();
        let transport = canned(&gate, &[StatusCode::TOO_MANY_REQUESTS, StatusCode::OK]);
        let pipeline = pipeline(&gate, SlotHold::HoldDuringBackoff);

        let gated = pipeline.execute(&transport, &ApiRequest::get("item/1")).await.unwrap();
        assert_eq!(gated.response().status(), StatusCode::OK);
        assert_eq!(*transport.in_flight_seen.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn release_mode_takes_a_ticket_per_attempt() {
        let gate = RequestGate::new(1, 10, Telemetry::null()).unwrap();
        let transport = canned(&gate, &[StatusCode::TOO_MANY_REQUESTS, StatusCode::OK]);
        let pipeline = pipeline(&gate, SlotHold::ReleaseDuringBackoff);

        let gated = pipeline.execute(&transport, &ApiRequest::get("item/1")).await.unwrap();
        assert_eq!(gated.response().status(), StatusCode::OK);
        assert_eq!(*transport.in_flight_seen.lock().unwrap(), vec![1, 1]);
        assert_eq!(gate.in_flight(), 1, "final attempt's ticket travels with the response");
    }

    #[tokio::test]
    async fn queue_rejection_skips_transport() {
        let gate = RequestGate::new(1, 0, Telemetry::null()).unwrap();
        let transport = canned(&gate, &[]);
        let pipeline = pipeline(&gate, SlotHold::HoldDuringBackoff);
        let _held = gate.acquire().await.unwrap();

        let err = pipeline.execute(&transport, &ApiRequest::get("item/1")).await.unwrap_err();
        assert!(err.is_queue_rejected());
        assert!(transport.in_flight_seen.lock().unwrap().is_empty());
    }
}
