//! Upstream fetch seam.
//!
//! Strategies talk to the network through the [`Fetcher`] trait so the
//! dispatcher can be exercised without sockets. The production implementation
//! is a thin reqwest wrapper with a bounded timeout.

use crate::config::NetworkConfig;
use crate::error::{AirwaveError, Result};
use crate::types::{FetchedResponse, GatewayRequest};
use std::time::Duration;

/// Performs an upstream request and buffers the response.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &GatewayRequest) -> Result<FetchedResponse>;
}

/// HTTP fetcher backed by a shared reqwest client.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a fetcher with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| AirwaveError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self { client, timeout })
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &GatewayRequest) -> Result<FetchedResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            AirwaveError::Validation {
                field: "method".to_string(),
                message: format!("Invalid HTTP method: {}", request.method),
            }
        })?;

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AirwaveError::Timeout(self.timeout)
            } else {
                AirwaveError::Network {
                    message: format!("{} {} failed: {}", request.method, request.url, e),
                    source: Some(e),
                }
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|value| (k.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(AirwaveError::from)?.to_vec();

        Ok(FetchedResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_creation() {
        let fetcher = HttpFetcher::new().unwrap();
        assert_eq!(fetcher.timeout, NetworkConfig::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_invalid_method_rejected() {
        let fetcher = HttpFetcher::new().unwrap();
        let request = GatewayRequest::new("NO SPACES ALLOWED", "https://radio.example/");
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, AirwaveError::Validation { .. }));
    }
}
