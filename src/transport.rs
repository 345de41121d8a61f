//! The seam between the policies and the HTTP stack.
//!
//! A [`Transport`] performs exactly one GET against the upstream host and returns as soon as
//! the status line and headers are in. The body stays unread inside [`Body`] until somebody asks
//! for it, so a 429 or an error status is dealt with without downloading the payload.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use std::fmt;

/// A read-only request for one path on the upstream host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    method: Method,
    path: String,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::GET, path: path.into() }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Join the path onto `base`. A leading `/` is treated as relative to the base, never as
    /// host-absolute. A path that would leave the base (another origin, or `..` climbing above
    /// the base path) is rejected as `InvalidUrl`.
    pub fn resolve(&self, base: &Url) -> Result<Url, TransportError> {
        let url = base
            .join(self.path.trim_start_matches('/'))
            .map_err(|e| TransportError::invalid_url(format!("{}: {}", self.path, e)))?;
        if url.origin() != base.origin() || !url.path().starts_with(base.path()) {
            return Err(TransportError::invalid_url(format!("{}: outside of {}", self.path, base)));
        }
        Ok(url)
    }
}

/// Response body that has not been read yet.
pub struct Body {
    inner: BodyInner,
}

enum BodyInner {
    Ready(Bytes),
    Deferred(BoxFuture<'static, Result<Bytes, TransportError>>),
}

impl Body {
    pub fn ready(bytes: impl Into<Bytes>) -> Self {
        Self { inner: BodyInner::Ready(bytes.into()) }
    }

    pub fn empty() -> Self {
        Self::ready(Bytes::new())
    }

    /// A body that is only downloaded when [`Body::bytes`] is awaited.
    pub fn deferred<F>(read: F) -> Self
    where
        F: std::future::Future<Output = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self { inner: BodyInner::Deferred(Box::pin(read)) }
    }

    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        match self.inner {
            BodyInner::Ready(bytes) => Ok(bytes),
            BodyInner::Deferred(read) => read.await,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            BodyInner::Ready(bytes) => write!(f, "Body::Ready({} bytes)", bytes.len()),
            BodyInner::Deferred(_) => f.write_str("Body::Deferred"),
        }
    }
}

/// Status and headers of a response, plus its unread body.
#[derive(Debug)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Body) -> Self {
        Self { status, headers, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS
    }

    pub fn into_body(self) -> Body {
        self.body
    }
}

/// One GET against the upstream host.
///
/// Implementations must not retry or queue on their own; the policies do that.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}
