//! reqwest-backed transport for the single upstream host.

use crate::config::FetcherConfig;
use crate::error::{BuildError, TransportError};
use crate::transport::{ApiRequest, ApiResponse, Body, Transport};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

/// One long-lived HTTP client shared by every call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Client with the configured user agent and per-request timeout.
    ///
    /// # Errors
    /// Returns an error if the base URL does not parse or the client cannot be built.
    pub fn new(config: &FetcherConfig) -> Result<Self, BuildError> {
        let base_url = config.parsed_base_url()?;
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .build()
            .map_err(BuildError::Client)?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = request.resolve(&self.base_url)?;
        debug!(url = %url, "sending upstream request");

        let response = self.client.request(request.method().clone(), url).send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = Body::deferred(async move { response.bytes().await.map_err(Into::into) });
        Ok(ApiResponse::new(status, headers, body))
    }
}
