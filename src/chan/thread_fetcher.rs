//! Thread metadata retrieval
//!
//! Fetches `{board}/thread/{id}.json` and decodes the post list.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::chan::locator::ThreadLocator;
use crate::chan::transport::{HttpTransport, TransportError};

/// Error types for metadata retrieval
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Thread not found (HTTP {status}): {url}")]
    NotFound { url: String, status: u16 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to decode thread metadata: {0}")]
    Decode(String),
}

/// Result type for metadata retrieval
pub type MetadataResult<T> = Result<T, MetadataError>;

/// A single post as served by the thread endpoint
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Post {
    #[serde(rename = "no")]
    pub id: u64,
    /// Comment HTML
    #[serde(rename = "com", default)]
    pub body: String,
    #[serde(rename = "sub", default)]
    pub subject: Option<String>,
    #[serde(rename = "tim", default)]
    pub attachment_token: Option<u64>,
    #[serde(rename = "ext", default)]
    pub attachment_ext: Option<String>,
    /// Name the file was uploaded under, without extension
    #[serde(rename = "filename", default)]
    pub attachment_name: Option<String>,
}

/// Wire shape of the thread endpoint
#[derive(Debug, Deserialize)]
struct ThreadResponse {
    posts: Vec<Post>,
}

/// Posts of one thread in server order; the first is the opening post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMetadata {
    posts: Vec<Post>,
}

impl ThreadMetadata {
    /// Wrap a post list, rejecting empty threads
    pub fn new(posts: Vec<Post>) -> MetadataResult<Self> {
        if posts.is_empty() {
            return Err(MetadataError::Decode("thread has no posts".to_string()));
        }
        Ok(Self { posts })
    }

    /// Decode a response body
    pub fn decode(body: &[u8]) -> MetadataResult<Self> {
        let response: ThreadResponse =
            serde_json::from_slice(body).map_err(|e| MetadataError::Decode(e.to_string()))?;
        Self::new(response.posts)
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    /// The opening post
    pub fn op(&self) -> &Post {
        &self.posts[0]
    }
}

/// Fetches and decodes thread metadata through a shared transport
#[derive(Clone)]
pub struct ThreadFetcher {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl ThreadFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Fetch the metadata at `endpoint`
    #[instrument(skip(self))]
    pub async fn fetch(&self, endpoint: &str) -> MetadataResult<ThreadMetadata> {
        let response = tokio::time::timeout(self.timeout, self.transport.get(endpoint))
            .await
            .map_err(|_| TransportError::Timeout(endpoint.to_string()))??;

        if !response.is_success() {
            warn!("Metadata request returned HTTP {}", response.status);
            return Err(MetadataError::NotFound {
                url: endpoint.to_string(),
                status: response.status,
            });
        }

        let metadata = ThreadMetadata::decode(&response.body)?;
        debug!("Decoded {} posts", metadata.posts().len());
        Ok(metadata)
    }

    /// Fetch the metadata of `locator` and check the opening post matches it
    pub async fn fetch_thread(
        &self,
        locator: &ThreadLocator,
        endpoint: &str,
    ) -> MetadataResult<ThreadMetadata> {
        let metadata = self.fetch(endpoint).await?;
        if metadata.op().id != locator.thread_id() {
            return Err(MetadataError::Decode(format!(
                "opening post {} does not match thread {}",
                metadata.op().id,
                locator.thread_id()
            )));
        }
        Ok(metadata)
    }
}
