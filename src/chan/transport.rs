//! HTTP transport used for metadata and attachment requests
//!
//! The scraping pipeline only needs "GET this URL, give me status and body".
//! [`HttpTransport`] captures that so the pipeline can run against
//! [`ReqwestTransport`] in production and an in-memory fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::chan::config_loader::Network;

/// Error types for the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Client error: {0}")]
    Client(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Status and body of a completed request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a single GET and return the full response
    async fn get(&self, url: &str) -> TransportResult<HttpResponse>;
}

/// reqwest-backed transport sharing one pooled client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(network: &Network) -> TransportResult<Self> {
        let client = Client::builder()
            .user_agent(&network.user_agent)
            .timeout(Duration::from_secs(network.timeout_secs))
            .connect_timeout(Duration::from_secs(network.timeout_secs))
            .gzip(true)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        info!(
            "Initialized HTTP client: {}s timeout, user agent {:?}",
            network.timeout_secs, network.user_agent
        );

        Ok(Self { client })
    }

    fn classify(url: &str, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(url.to_string())
        } else if error.is_connect() || error.is_request() || error.is_body() {
            TransportError::Connection(format!("{}: {}", url, error))
        } else {
            TransportError::Client(format!("{}: {}", url, error))
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> TransportResult<HttpResponse> {
        debug!(url = url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::classify(url, e))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| Self::classify(url, e))?;

        Ok(HttpResponse { status, body })
    }
}
