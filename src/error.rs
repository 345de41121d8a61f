//! Error types for the access layer.
//!
//! Two families live here: [`TransportError`] describes a failed exchange with the upstream host
//! (nothing usable came back), and [`FetchError`] is the full taxonomy a call can end in once the
//! policies have run. The JSON path folds every `FetchError` into an absence value; the byte path
//! hands it to the caller.

use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;

/// Category of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Could not connect to the upstream host.
    Connect,
    /// The attempt exceeded its deadline.
    Timeout,
    /// Headers arrived but reading the body failed.
    Body,
    /// The request path could not be resolved against the base URL.
    InvalidUrl,
    /// Anything else the HTTP stack reported.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Body => "body",
            Self::InvalidUrl => "invalid url",
            Self::Other => "transport",
        };
        f.write_str(name)
    }
}

/// A failed exchange with the upstream host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    /// An attempt that ran past `limit`.
    pub fn timed_out(limit: Duration) -> Self {
        Self::new(TransportErrorKind::Timeout, format!("attempt exceeded {:?}", limit))
    }

    pub fn body(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Body, message)
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::InvalidUrl, message)
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether retrying the same request could plausibly succeed.
    ///
    /// A path that cannot be turned into a URL fails the same way every time.
    pub fn is_transient(&self) -> bool {
        !matches!(self.kind, TransportErrorKind::InvalidUrl)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else if err.is_builder() {
            TransportErrorKind::InvalidUrl
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string())
    }
}

/// Why the request gate refused to hand out a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GateRejected {
    /// The wait queue was already at capacity.
    #[error("request gate queue is full ({queued} waiting, capacity {capacity})")]
    QueueFull { queued: usize, capacity: usize },
    /// The gate has been shut down.
    #[error("request gate is shut down")]
    Closed,
}

/// Every way a single logical call can end without a usable value.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The gate's wait queue was full; the call never ran.
    #[error("request gate queue is full ({queued} waiting, capacity {capacity})")]
    QueueRejected { queued: usize, capacity: usize },
    /// The fetcher was shut down before the call could run.
    #[error("fetcher is shut down")]
    ShutDown,
    /// Still rate limited after the retry budget was spent.
    #[error("still rate limited after {attempts} attempts")]
    RateLimited { attempts: usize },
    /// The upstream host answered with a non-success status.
    #[error("upstream returned {status}")]
    Status { status: StatusCode },
    /// The response body is not JSON.
    #[error("unsupported content type {content_type:?}")]
    UnsupportedContent { content_type: String },
    /// The body claimed to be JSON but did not decode into the requested shape.
    #[error("invalid JSON payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),
    /// A single attempt failed at the transport level and was not retried.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Every attempt of a retried call failed; carries the last failure.
    #[error("retry exhausted after {attempts} attempts; last error: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: TransportError,
    },
    /// The caller aborted the call.
    #[error("call was cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_queue_rejected(&self) -> bool {
        matches!(self, Self::QueueRejected { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// Status code of an upstream error response, if that is what this is.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status } => Some(*status),
            _ => None,
        }
    }

    /// The transport failure behind this error, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) | Self::RetryExhausted { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<GateRejected> for FetchError {
    fn from(rejected: GateRejected) -> Self {
        match rejected {
            GateRejected::QueueFull { queued, capacity } => Self::QueueRejected { queued, capacity },
            GateRejected::Closed => Self::ShutDown,
        }
    }
}

/// Invalid configuration detected while assembling a fetcher or policy.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("max_concurrent must be > 0")]
    ZeroConcurrency,
    #[error("request timeout must be non-zero")]
    ZeroTimeout,
    #[error("invalid base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A query rejected locally before any request was made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidQuery(pub String);
