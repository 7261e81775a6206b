//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStream, RetryPolicy},
};
use futures_util::TryStreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

/// Reqwest-based HTTP client.
///
/// Listing requests (manifest, directory index, HEAD probes) are retried with
/// backoff. Streamed downloads are single-shot; a failed download is reported
/// per file and picked up by the next pass.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(concat!("modsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                BridgeError::NotAvailable(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Wrap a preconfigured reqwest client (proxies, custom TLS roots).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    fn build_request(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }

    fn response_headers(response: &reqwest::Response) -> HashMap<String, String> {
        response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect()
    }

    fn describe(err: &reqwest::Error) -> BridgeError {
        let message = if err.is_timeout() {
            format!("Request timed out: {}", err)
        } else if err.is_connect() {
            format!("Connection failed: {}", err)
        } else {
            err.to_string()
        };
        BridgeError::OperationFailed(message)
    }

    /// One buffered attempt. `Ok(None)` means a retryable status came back.
    async fn attempt(&self, request: &HttpRequest) -> Result<Option<HttpResponse>> {
        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(|e| Self::describe(&e))?;

        let status = response.status().as_u16();
        if RetryPolicy::is_retryable_status(status) {
            warn!(url = %request.url, status, "Retryable HTTP status");
            return Ok(None);
        }

        let headers = Self::response_headers(&response);
        let body = response.bytes().await.map_err(|e| Self::describe(&e))?;
        Ok(Some(HttpResponse {
            status,
            headers,
            body,
        }))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_retry(request, RetryPolicy::default())
            .await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let attempts = policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!(url = %request.url, attempt, attempts, "HTTP request");

            match self.attempt(&request).await {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => {
                    last_error = Some(BridgeError::OperationFailed(format!(
                        "Server kept failing for {}",
                        request.url
                    )));
                }
                Err(e) => {
                    warn!(url = %request.url, attempt, error = %e, "HTTP request failed");
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                let delay = policy.delay_before_retry(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                sleep(delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BridgeError::OperationFailed("All retry attempts exhausted".to_string())
        }))
    }

    async fn download_stream(&self, request: HttpRequest) -> Result<HttpStream> {
        debug!(url = %request.url, "Starting streamed download");

        let response = self
            .build_request(&request)
            .send()
            .await
            .map_err(|e| Self::describe(&e))?;

        let status = response.status().as_u16();
        let headers = Self::response_headers(&response);
        let size_hint = response.content_length();

        let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let mut stream = HttpStream::new(status, headers, Box::new(body));
        if stream.content_length.is_none() {
            stream.content_length = size_hint;
        }
        Ok(stream)
    }
}
