//! Network transport over a pooled hyper client

use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::header::CONTENT_LENGTH;
use hyper::{HeaderMap, Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Transport;
use crate::config::LimitsConfig;
use crate::record::{Headers, RequestRecord, ResponseRecord};
use crate::{Result, RewindError};

/// Real HTTP transport
///
/// Plain HTTP only; pooling is left to hyper's client.
pub struct HyperTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    limits: LimitsConfig,
}

impl HyperTransport {
    /// Create a new network transport
    #[must_use]
    pub fn new(limits: LimitsConfig) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Self { client, limits }
    }

    /// Build the hyper request for a record
    fn build_request(&self, request: RequestRecord) -> Result<Request<Full<Bytes>>> {
        if request.body.len() > self.limits.max_request_size {
            return Err(RewindError::DataTooLarge {
                size: request.body.len(),
                limit: self.limits.max_request_size,
            });
        }

        let header_count = request.headers.value_count();
        if header_count > self.limits.max_headers {
            return Err(RewindError::InvalidRequest(format!(
                "Too many headers: {header_count}"
            )));
        }

        let uri = request
            .url
            .parse::<Uri>()
            .map_err(|e| RewindError::InvalidRequest(format!("Invalid URI '{}': {e}", request.url)))?;

        let method = request.method.parse::<Method>().map_err(|e| {
            RewindError::InvalidRequest(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        let mut http_request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(request.body))
            .map_err(|e| RewindError::InvalidRequest(format!("Failed to build request: {e}")))?;
        *http_request.headers_mut() = request.headers.to_header_map()?;

        Ok(http_request)
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<ResponseRecord> {
        let response = self.client.request(request).await.map_err(|e| {
            warn!("Request failed: {e}");
            RewindError::transport(e)
        })?;

        let status = response.status().as_u16();
        let headers = Headers::from_header_map(response.headers());
        let limit = self.limits.max_response_size;

        if let Some(size) = content_length(response.headers()) {
            if size > limit {
                return Err(RewindError::DataTooLarge { size, limit });
            }
        }

        // Stop reading as soon as a streamed body passes the limit
        let body = Limited::new(response.into_body(), limit)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    RewindError::DataTooLarge {
                        size: limit.saturating_add(1),
                        limit,
                    }
                } else {
                    RewindError::Transport(e)
                }
            })?
            .to_bytes();

        Ok(ResponseRecord {
            status,
            headers,
            body,
        })
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new(LimitsConfig::default())
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn round_trip(
        &self,
        request: RequestRecord,
        cancel: &CancellationToken,
    ) -> Result<ResponseRecord> {
        debug!("Sending {} {}", request.method, request.url);

        let http_request = self.build_request(request)?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RewindError::Cancelled),
            response = self.send(http_request) => response,
        }
    }
}
