#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use scoresaber_gate::{ApiRequest, ApiResponse, Body, Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// One scripted answer for a path.
#[derive(Debug, Clone)]
pub enum Step {
    Respond { status: StatusCode, headers: HeaderMap, body: Bytes, latency: Duration },
    Fail(TransportError),
}

impl Step {
    pub fn json(body: &str) -> Self {
        Self::status(StatusCode::OK)
            .header(CONTENT_TYPE.as_str(), "application/json; charset=utf-8")
            .body(body)
    }

    pub fn status(status: StatusCode) -> Self {
        Self::Respond { status, headers: HeaderMap::new(), body: Bytes::new(), latency: Duration::ZERO }
    }

    /// A 429, optionally carrying an `x-ratelimit-reset` epoch second.
    pub fn rate_limited(reset_at: Option<i64>) -> Self {
        let step = Self::status(StatusCode::TOO_MANY_REQUESTS);
        match reset_at {
            Some(reset) => step.header("x-ratelimit-reset", &reset.to_string()),
            None => step,
        }
    }

    pub fn bytes(body: &'static [u8]) -> Self {
        Self::status(StatusCode::OK).header(CONTENT_TYPE.as_str(), "image/png").body(body)
    }

    pub fn fail(error: TransportError) -> Self {
        Self::Fail(error)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Self::Respond { headers, .. } = &mut self {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        self
    }

    pub fn body(mut self, content: impl AsRef<[u8]>) -> Self {
        if let Self::Respond { body, .. } = &mut self {
            *body = Bytes::copy_from_slice(content.as_ref());
        }
        self
    }

    /// Hold the response back for `delay` of (virtual) time.
    pub fn latency(mut self, delay: Duration) -> Self {
        if let Self::Respond { latency, .. } = &mut self {
            *latency = delay;
        }
        self
    }
}

/// A request as the fake upstream saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub at: Instant,
}

#[derive(Default)]
struct Inner {
    script: Mutex<HashMap<String, VecDeque<Step>>>,
    seen: Mutex<Vec<Seen>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    body_reads: AtomicUsize,
}

/// Fake upstream replaying scripted steps per path. Unscripted requests get a 404.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Inner>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &str, step: Step) -> &Self {
        self.inner
            .script
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.inner.seen.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.seen().into_iter().map(|s| s.path).collect()
    }

    pub fn calls(&self, path: &str) -> usize {
        self.seen().iter().filter(|s| s.path == path).count()
    }

    /// Highest number of sends in progress at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// How many response bodies were actually read.
    pub fn body_reads(&self) -> usize {
        self.inner.body_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let path = request.path().to_string();
        self.inner.seen.lock().unwrap().push(Seen { path: path.clone(), at: Instant::now() });

        let step = self
            .inner
            .script
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Step::status(StatusCode::NOT_FOUND));

        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(active, Ordering::SeqCst);
        let result = match step {
            Step::Respond { status, headers, body, latency } => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                let inner = self.inner.clone();
                let body = Body::deferred(async move {
                    inner.body_reads.fetch_add(1, Ordering::SeqCst);
                    Ok(body)
                });
                Ok(ApiResponse::new(status, headers, body))
            }
            Step::Fail(error) => Err(error),
        };
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Shared in-memory buffer for captured log output.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route `tracing` output of the current thread into a buffer until the guard drops.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}
