//! Public entry point.
//!
//! A [`Fetcher`] owns the upstream client, the request gate and both retry policies. It is
//! built once, cloned cheaply (all state is behind an `Arc`) and handed to whoever needs
//! upstream data. There is no global instance.
//!
//! Two call types with deliberately different failure policies:
//!
//! | call | policies | on failure |
//! |---|---|---|
//! | [`Fetcher::fetch_typed`] | gate → adaptive rate-limit retry | [`Outcome::Absent`], never an error |
//! | [`Fetcher::fetch_bytes`] | transient retry, no gate | `Err(FetchError)` after the retries |
//!
//! The split is exposed as [`Fetcher::JSON_FAILURE_POLICY`] and
//! [`Fetcher::ASSET_FAILURE_POLICY`]; callers who want the raw error on the JSON path can use
//! [`Fetcher::try_fetch_typed`].

use crate::clock::{EpochClock, SystemClock};
use crate::config::FetcherConfig;
use crate::error::{BuildError, FetchError, TransportErrorKind};
use crate::gate::RequestGate;
use crate::http::HttpTransport;
use crate::pipeline::PolicyPipeline;
use crate::rate_limit::AdaptiveRetryPolicy;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{DecodeEvent, PolicyEvent, RequestOutcome, Telemetry, TelemetrySink};
use crate::timeout::TimeoutPolicy;
use crate::transient::TransientRetryPolicy;
use crate::transport::{ApiRequest, Transport};
use bytes::Bytes;
use futures::future::{AbortRegistration, Abortable};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error};

/// What a call type does with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Every failure becomes an absence value; the caller never sees an error.
    DegradeToAbsent,
    /// The failure is returned to the caller.
    Propagate,
}

/// Why a JSON call produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsenceReason {
    QueueRejected,
    ShutDown,
    RateLimited,
    Status(StatusCode),
    UnsupportedContent,
    InvalidPayload,
    Transport(TransportErrorKind),
    Cancelled,
}

impl From<&FetchError> for AbsenceReason {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::QueueRejected { .. } => Self::QueueRejected,
            FetchError::ShutDown => Self::ShutDown,
            FetchError::RateLimited { .. } => Self::RateLimited,
            FetchError::Status { status } => Self::Status(*status),
            FetchError::UnsupportedContent { .. } => Self::UnsupportedContent,
            FetchError::InvalidPayload(_) => Self::InvalidPayload,
            FetchError::Transport(e) | FetchError::RetryExhausted { source: e, .. } => {
                Self::Transport(e.kind())
            }
            FetchError::Cancelled => Self::Cancelled,
        }
    }
}

/// Terminal result of a JSON call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Decoded(T),
    Absent(AbsenceReason),
}

impl<T> Outcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Decoded(value) => Some(value),
            Self::Absent(_) => None,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent(_))
    }

    pub fn absence(&self) -> Option<AbsenceReason> {
        match self {
            Self::Absent(reason) => Some(*reason),
            Self::Decoded(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Decoded(value) => Outcome::Decoded(f(value)),
            Self::Absent(reason) => Outcome::Absent(reason),
        }
    }
}

/// Resilient access to the upstream API.
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    transport: Arc<dyn Transport>,
    pipeline: PolicyPipeline,
    transient: TransientRetryPolicy,
    timeout: TimeoutPolicy,
    telemetry: Telemetry,
    rate_limit_attempts: usize,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("pipeline", &self.inner.pipeline)
            .field("transient", &self.inner.transient)
            .field("timeout", &self.inner.timeout)
            .field("transport", &"<transport>")
            .finish()
    }
}

impl Fetcher {
    pub const JSON_FAILURE_POLICY: FailurePolicy = FailurePolicy::DegradeToAbsent;
    pub const ASSET_FAILURE_POLICY: FailurePolicy = FailurePolicy::Propagate;

    /// Fetcher talking HTTP to the configured host.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the HTTP client cannot be built.
    pub fn new(config: FetcherConfig) -> Result<Self, BuildError> {
        FetcherBuilder::new().config(config).build()
    }

    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::new()
    }

    pub fn gate(&self) -> &RequestGate {
        self.inner.pipeline.gate()
    }

    /// Stop accepting calls. Queued and later JSON calls end as `Absent(ShutDown)`, later byte
    /// fetches as `Err(ShutDown)`. Calls already holding a slot run to completion.
    pub fn shutdown(&self) {
        debug!("fetcher shutting down");
        self.gate().close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.gate().is_closed()
    }

    /// Fetch `path` and decode it as `T`. Never fails: every failure is an [`Outcome::Absent`].
    pub async fn fetch_typed<T>(&self, path: &str) -> Outcome<T>
    where
        T: DeserializeOwned,
    {
        let started = Instant::now();
        let outcome = match self.try_fetch_typed(path).await {
            Ok(value) => Outcome::Decoded(value),
            Err(err) => {
                debug!(path, error = %err, "upstream call degraded to absent");
                Outcome::Absent(AbsenceReason::from(&err))
            }
        };
        let duration = started.elapsed();
        let event = if outcome.is_decoded() {
            RequestOutcome::Decoded { duration }
        } else {
            RequestOutcome::Absent { duration }
        };
        self.inner.telemetry.emit(PolicyEvent::Request(event)).await;
        outcome
    }

    /// [`Fetcher::fetch_typed`] that ends as `Absent(Cancelled)` when `registration` is aborted.
    ///
    /// Aborting while queued gives up the queue position; aborting mid-attempt or mid-backoff
    /// drops the attempt and frees the slot.
    pub async fn fetch_typed_abortable<T>(
        &self,
        path: &str,
        registration: AbortRegistration,
    ) -> Outcome<T>
    where
        T: DeserializeOwned,
    {
        Abortable::new(self.fetch_typed(path), registration).await.unwrap_or_else(|_| {
            debug!(path, "upstream call cancelled");
            Outcome::Absent(AbsenceReason::Cancelled)
        })
    }

    /// Same path as [`Fetcher::fetch_typed`] but with the failure kept.
    pub async fn try_fetch_typed<T>(&self, path: &str) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let request = ApiRequest::get(path);
        let gated = self.inner.pipeline.execute(self.inner.transport.as_ref(), &request).await?;
        let (response, ticket) = gated.into_parts();

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited { attempts: self.inner.rate_limit_attempts });
        }
        if !status.is_success() {
            return Err(FetchError::Status { status });
        }
        if let Some(content_type) = response.content_type() {
            if !is_json(content_type) {
                error!(path, content_type, "the content type is not supported");
                let content_type = content_type.to_string();
                self.inner
                    .telemetry
                    .emit(PolicyEvent::Decode(DecodeEvent::UnsupportedContent {
                        path: path.to_string(),
                        content_type: content_type.clone(),
                    }))
                    .await;
                return Err(FetchError::UnsupportedContent { content_type });
            }
        }

        let body = self.inner.timeout.execute(response.into_body().bytes()).await?;
        drop(ticket);

        match serde_json::from_slice(&body) {
            Ok(value) => Ok(value),
            Err(err) => {
                error!(path, error = %err, "invalid JSON");
                self.inner
                    .telemetry
                    .emit(PolicyEvent::Decode(DecodeEvent::InvalidPayload {
                        path: path.to_string(),
                        message: err.to_string(),
                    }))
                    .await;
                Err(FetchError::InvalidPayload(err))
            }
        }
    }

    /// Fetch a binary asset verbatim, retrying transport failures. Bypasses the gate.
    ///
    /// # Errors
    /// `RetryExhausted` once every attempt failed at the transport level, `Status` for an HTTP
    /// error answer, `ShutDown` after [`Fetcher::shutdown`].
    pub async fn fetch_bytes(&self, path: &str) -> Result<Bytes, FetchError> {
        if self.is_shut_down() {
            return Err(FetchError::ShutDown);
        }
        let started = Instant::now();
        let request = ApiRequest::get(path);
        let request = &request;
        let transport = self.inner.transport.as_ref();
        let timeout = self.inner.timeout;

        let result = self
            .inner
            .transient
            .execute(move || async move {
                timeout
                    .execute(async move {
                        let response = transport.send(request).await?;
                        let status = response.status();
                        if !status.is_success() {
                            return Err(FetchError::Status { status });
                        }
                        Ok::<Bytes, FetchError>(response.into_body().bytes().await?)
                    })
                    .await
            })
            .await;

        let duration = started.elapsed();
        let event = match &result {
            Ok(bytes) => RequestOutcome::Bytes { duration, len: bytes.len() },
            Err(err) => {
                debug!(path, error = %err, "asset fetch failed");
                RequestOutcome::Failed { duration }
            }
        };
        self.inner.telemetry.emit(PolicyEvent::Request(event)).await;
        result
    }

    /// [`Fetcher::fetch_bytes`] that ends as `Err(Cancelled)` when `registration` is aborted.
    pub async fn fetch_bytes_abortable(
        &self,
        path: &str,
        registration: AbortRegistration,
    ) -> Result<Bytes, FetchError> {
        Abortable::new(self.fetch_bytes(path), registration)
            .await
            .unwrap_or(Err(FetchError::Cancelled))
    }
}

/// `application/json` or any `+json` structured syntax suffix, parameters ignored.
fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Builder for [`Fetcher`]. Without an explicit transport the fetcher speaks HTTP via reqwest.
pub struct FetcherBuilder {
    config: FetcherConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn EpochClock>,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Telemetry,
}

impl FetcherBuilder {
    pub fn new() -> Self {
        Self {
            config: FetcherConfig::default(),
            transport: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            telemetry: Telemetry::null(),
        }
    }

    pub fn config(mut self, config: FetcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport,
    {
        self.transport = Some(Arc::new(transport));
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

    /// Route gate, retry, decode and request events to `sink`.
    pub fn telemetry<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink + Sync,
        S::Future: Send + 'static,
    {
        self.telemetry = Telemetry::new(sink);
        self
    }

    pub fn build(self) -> Result<Fetcher, BuildError> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config)?),
        };
        let timeout = TimeoutPolicy::new(config.request_timeout()).ok_or(BuildError::ZeroTimeout)?;
        let gate = RequestGate::new(
            config.gate.max_concurrent,
            config.gate.queue_capacity,
            self.telemetry.clone(),
        )?;
        let retry = AdaptiveRetryPolicy::builder()
            .config(&config.rate_limit)
            .clock_arc(self.clock)
            .sleeper_arc(self.sleeper.clone())
            .telemetry(self.telemetry.clone())
            .build()?;
        let transient = TransientRetryPolicy::new(&config.transient)
            .sleeper_arc(self.sleeper)
            .telemetry(self.telemetry.clone());

        Ok(Fetcher {
            inner: Arc::new(FetcherInner {
                transport,
                pipeline: PolicyPipeline::new(gate, retry, timeout, config.slot_hold),
                transient,
                timeout,
                telemetry: self.telemetry,
                rate_limit_attempts: config.rate_limit.max_retries + 1,
            }),
        })
    }
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
