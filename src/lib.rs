#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # scoresaber-gate
//!
//! Serialized, rate-limit aware access to the ScoreSaber HTTP API.
//!
//! The upstream host throttles aggressively, so every JSON call goes through one
//! [`RequestGate`] (one request at a time, a bounded FIFO queue behind it) and an
//! [`AdaptiveRetryPolicy`] that waits out a 429 using the server's reset hint. Binary assets
//! skip the gate and get a fixed-delay [`TransientRetryPolicy`] instead.
//!
//! ## Features
//!
//! - **Request gate**: bounded concurrency, bounded queue, immediate rejection when full
//! - **Adaptive retry**: delay taken from `x-ratelimit-reset`, exponential fallback without it
//! - **Transient retry**: fixed delay on connection failures and timeouts
//! - **Asymmetric failure handling**: JSON calls degrade to [`Outcome::Absent`], asset fetches
//!   return the error
//! - **Structured telemetry** via `tower::Service` sinks next to `tracing` logs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scoresaber_gate::{Fetcher, FetcherConfig, Outcome};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Item {
//!     value: u32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = Fetcher::new(FetcherConfig::default())?;
//!
//!     match fetcher.fetch_typed::<Item>("item/1").await {
//!         Outcome::Decoded(item) => println!("value = {}", item.value),
//!         Outcome::Absent(reason) => println!("nothing: {:?}", reason),
//!     }
//!
//!     let cover = fetcher.fetch_bytes("static/covers/ABCDEF.png").await?;
//!     println!("{} bytes", cover.len());
//!
//!     fetcher.shutdown();
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod gate;
pub mod http;
pub mod pipeline;
pub mod rate_limit;
pub mod scoresaber;
pub mod sleeper;
pub mod telemetry;
pub mod timeout;
pub mod transient;
pub mod transport;

// Re-exports
pub use backoff::Backoff;
pub use clock::{EpochClock, ManualClock, SystemClock};
pub use config::{FetcherConfig, GateConfig, RateLimitConfig, SlotHold, TransientConfig};
pub use error::{
    BuildError, FetchError, GateRejected, InvalidQuery, TransportError, TransportErrorKind,
};
pub use fetcher::{AbsenceReason, FailurePolicy, Fetcher, FetcherBuilder, Outcome};
pub use gate::{RequestGate, Ticket};
pub use http::HttpTransport;
pub use pipeline::{GatedResponse, PolicyPipeline};
pub use rate_limit::{AdaptiveRetryPolicy, AdaptiveRetryPolicyBuilder, RateLimitFeedback};
pub use scoresaber::ScoreSaberApi;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use telemetry::{LogSink, MemorySink, NullSink, PolicyEvent, Telemetry, TelemetrySink};
pub use timeout::TimeoutPolicy;
pub use transient::TransientRetryPolicy;
pub use transport::{ApiRequest, ApiResponse, Body, Transport};
