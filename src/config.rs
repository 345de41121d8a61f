//! Fetcher configuration.
//!
//! Every field has a default, so an empty TOML document is a valid configuration:
//!
//! ```rust
//! use scoresaber_gate::FetcherConfig;
//!
//! let config = FetcherConfig::from_toml_str(r#"
//!     request_timeout_secs = 15
//!
//!     [gate]
//!     queue_capacity = 50
//! "#).unwrap();
//! assert_eq!(config.gate.queue_capacity, 50);
//! assert_eq!(config.gate.max_concurrent, 1);
//! ```

use crate::backoff::Backoff;
use crate::error::BuildError;
use reqwest::header::HeaderName;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://new.scoresaber.com/api/";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENT: usize = 1;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_RATE_LIMIT_RETRIES: usize = 1;
pub const DEFAULT_RESET_HEADER: &str = "x-ratelimit-reset";
pub const DEFAULT_FALLBACK_BASE_SECS: u64 = 10;
pub const DEFAULT_FALLBACK_FACTOR: u32 = 10;
pub const DEFAULT_TRANSIENT_RETRIES: usize = 3;
pub const DEFAULT_TRANSIENT_DELAY_SECS: u64 = 10;

/// Whether a call keeps its gate slot while it waits out a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotHold {
    /// The ticket is held across the whole retry cycle; everyone else waits behind it.
    #[default]
    HoldDuringBackoff,
    /// The slot is given back for the wait and re-acquired through the queue before retrying.
    ReleaseDuringBackoff,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub max_concurrent: usize,
    pub queue_capacity: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { max_concurrent: DEFAULT_MAX_CONCURRENT, queue_capacity: DEFAULT_QUEUE_CAPACITY }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_retries: usize,
    /// Header carrying the reset instant in seconds since epoch.
    pub reset_header: String,
    pub fallback_base_secs: u64,
    pub fallback_factor: u32,
}

impl RateLimitConfig {
    /// `fallback_base_secs * fallback_factor^(attempt - 1)`; 10^attempt seconds by default.
    pub fn fallback_backoff(&self) -> Backoff {
        Backoff::exponential(Duration::from_secs(self.fallback_base_secs))
            .with_factor(self.fallback_factor)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RATE_LIMIT_RETRIES,
            reset_header: DEFAULT_RESET_HEADER.to_string(),
            fallback_base_secs: DEFAULT_FALLBACK_BASE_SECS,
            fallback_factor: DEFAULT_FALLBACK_FACTOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransientConfig {
    pub max_retries: usize,
    pub delay_secs: u64,
}

impl TransientConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::constant(Duration::from_secs(self.delay_secs))
    }
}

impl Default for TransientConfig {
    fn default() -> Self {
        Self { max_retries: DEFAULT_TRANSIENT_RETRIES, delay_secs: DEFAULT_TRANSIENT_DELAY_SECS }
    }
}

/// Everything needed to build a [`crate::Fetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// API root; request paths are resolved against it.
    pub base_url: String,
    /// Sent on every request.
    pub user_agent: String,
    /// Deadline for a single attempt.
    pub request_timeout_secs: u64,
    pub gate: GateConfig,
    pub rate_limit: RateLimitConfig,
    pub transient: TransientConfig,
    pub slot_hold: SlotHold,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            gate: GateConfig::default(),
            rate_limit: RateLimitConfig::default(),
            transient: TransientConfig::default(),
            slot_hold: SlotHold::default(),
        }
    }
}

impl FetcherConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, BuildError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.gate.max_concurrent == 0 {
            return Err(BuildError::ZeroConcurrency);
        }
        if self.request_timeout_secs == 0 {
            return Err(BuildError::ZeroTimeout);
        }
        self.parsed_base_url()?;
        self.reset_header()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn parsed_base_url(&self) -> Result<Url, BuildError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| BuildError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(BuildError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: "cannot be a base".to_string(),
            });
        }
        // Without the trailing slash `join` would replace the last path segment.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn reset_header(&self) -> Result<HeaderName, BuildError> {
        HeaderName::from_bytes(self.rate_limit.reset_header.as_bytes())
            .map_err(|_| BuildError::InvalidHeaderName(self.rate_limit.reset_header.clone()))
    }
}
