//! Concurrent attachment fetching for one thread
//!
//! This module provides an async download engine that:
//! 1. Fetches every planned attachment as an independent task
//! 2. Bounds each request with a timeout and optionally caps concurrency (Semaphore)
//! 3. Persists bodies in background write tasks (`.part` file, then rename)
//! 4. Joins every fetch and every write before reporting the batch summary
//!
//! A failed fetch only fails its own item. A failed write means the disk is
//! unusable, so remaining fetches are cancelled and the error is returned
//! once in-flight writes have settled.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use console::style;
use indicatif::ProgressBar;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::chan::config_loader::Network;
use crate::chan::local_state::PART_SUFFIX;
use crate::chan::locator::AttachmentLocator;
use crate::chan::transport::{HttpTransport, TransportError};

/// Why a single attachment could not be fetched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP error {status} for {url}")]
    Status { url: String, status: u16 },
}

/// Error types for the download engine
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// Result type for download operations
pub type DownloadResult<T> = Result<T, DownloadError>;

/// An attachment that could not be fetched this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttachment {
    pub locator: AttachmentLocator,
    pub error: AttachmentError,
}

/// Outcome of one fetch-all batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub succeeded: usize,
    /// In the order the attachments were planned
    pub failed: Vec<FailedAttachment>,
}

/// Download engine configuration
#[derive(Debug, Clone)]
pub struct DownloadEngineConfig {
    pub timeout: Duration,
    /// 0 means no cap beyond the transport's own connection limits
    pub max_concurrent_downloads: usize,
}

impl Default for DownloadEngineConfig {
    fn default() -> Self {
        Self::from(&Network::default())
    }
}

impl From<&Network> for DownloadEngineConfig {
    fn from(network: &Network) -> Self {
        Self {
            timeout: Duration::from_secs(network.timeout_secs),
            max_concurrent_downloads: network.max_concurrent_downloads,
        }
    }
}

type FetchOutcome = (usize, AttachmentLocator, Result<Bytes, AttachmentError>);
type WriteOutcome = (AttachmentLocator, PathBuf, io::Result<()>);

/// Download engine for the attachments of one thread at a time
pub struct DownloadEngine {
    config: DownloadEngineConfig,
    transport: Arc<dyn HttpTransport>,
}

impl DownloadEngine {
    pub fn new(config: DownloadEngineConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    /// Fetch every locator concurrently and persist each body into `folder`.
    ///
    /// `folder` must already exist. Returns once every fetch and every write
    /// has finished.
    pub async fn fetch_all(
        &self,
        folder: &Path,
        locators: Vec<AttachmentLocator>,
        progress: &ProgressBar,
    ) -> DownloadResult<FetchSummary> {
        let semaphore = match self.config.max_concurrent_downloads {
            0 => None,
            cap => Some(Arc::new(Semaphore::new(cap))),
        };

        let mut fetches: JoinSet<FetchOutcome> = JoinSet::new();
        for (index, locator) in locators.into_iter().enumerate() {
            let transport = self.transport.clone();
            let semaphore = semaphore.clone();
            let timeout = self.config.timeout;

            fetches.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let result = Self::fetch_one(transport.as_ref(), locator.url(), timeout).await;
                (index, locator, result)
            });
        }

        let mut writes: JoinSet<WriteOutcome> = JoinSet::new();
        let mut summary = FetchSummary::default();
        let mut failed: Vec<(usize, FailedAttachment)> = Vec::new();
        let mut fatal: Option<DownloadError> = None;

        loop {
            tokio::select! {
                Some(joined) = fetches.join_next() => {
                    let (index, locator, result) = match joined {
                        Ok(outcome) => outcome,
                        Err(e) if e.is_cancelled() => continue,
                        Err(e) => {
                            fetches.abort_all();
                            fatal.get_or_insert(DownloadError::TaskJoin(e.to_string()));
                            continue;
                        }
                    };

                    match result {
                        Ok(body) => {
                            debug!(url = locator.url(), bytes = body.len(), "Fetched attachment");
                            let folder = folder.to_path_buf();
                            writes.spawn(async move {
                                let path = folder.join(locator.filename());
                                let result = Self::persist(&folder, locator.filename(), body).await;
                                (locator, path, result)
                            });
                        }
                        Err(error) => {
                            warn!(url = locator.url(), "Failed to download attachment: {}", error);
                            progress.println(format!(
                                "{}",
                                style(format!("Failed to download \"{}\": {}", locator.url(), error)).red()
                            ));
                            progress.inc(1);
                            failed.push((index, FailedAttachment { locator, error }));
                        }
                    }
                }
                Some(joined) = writes.join_next() => {
                    let (locator, path, result) = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            fetches.abort_all();
                            fatal.get_or_insert(DownloadError::TaskJoin(e.to_string()));
                            continue;
                        }
                    };

                    match result {
                        Ok(()) => {
                            info!(file = %path.display(), "Downloaded \"{}\"", locator.display_name());
                            progress.set_message(locator.display_name().to_string());
                            progress.inc(1);
                            summary.succeeded += 1;
                        }
                        Err(source) => {
                            if fatal.is_none() {
                                warn!("Write failed, cancelling remaining downloads: {}", source);
                                fetches.abort_all();
                                fatal = Some(DownloadError::Filesystem {
                                    path: path.display().to_string(),
                                    source,
                                });
                            }
                        }
                    }
                }
                else => break,
            }
        }

        if let Some(error) = fatal {
            return Err(error);
        }

        failed.sort_by_key(|(index, _)| *index);
        summary.failed = failed.into_iter().map(|(_, failure)| failure).collect();
        Ok(summary)
    }

    /// One GET, bounded by `timeout`, mapped to a per-item result
    async fn fetch_one(
        transport: &dyn HttpTransport,
        url: &str,
        timeout: Duration,
    ) -> Result<Bytes, AttachmentError> {
        let response = tokio::time::timeout(timeout, transport.get(url))
            .await
            .map_err(|_| TransportError::Timeout(url.to_string()))??;

        if !response.is_success() {
            return Err(AttachmentError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        Ok(response.body)
    }

    /// Write `body` to `folder/filename` through a `.part` file
    async fn persist(folder: &Path, filename: &str, body: Bytes) -> io::Result<()> {
        let final_path = folder.join(filename);
        let part_path = folder.join(format!("{}{}", filename, PART_SUFFIX));

        let written = async {
            let mut file = File::create(&part_path).await?;
            file.write_all(&body).await?;
            file.flush().await?;
            fs::rename(&part_path, &final_path).await
        }
        .await;

        if written.is_err() {
            let _ = fs::remove_file(&part_path).await;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chan::transport::testing::{FakeReply, FakeTransport};
    use std::time::Instant;
    use tempfile::TempDir;
    use tokio::sync::Barrier;

    fn temp_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    fn attachment(name: &str) -> AttachmentLocator {
        AttachmentLocator::new(format!("https://i.4cdn.org/g/{}", name)).unwrap()
    }

    fn engine(transport: Arc<FakeTransport>, max_concurrent_downloads: usize) -> DownloadEngine {
        DownloadEngine::new(
            DownloadEngineConfig {
                timeout: Duration::from_millis(200),
                max_concurrent_downloads,
            },
            transport,
        )
    }

    fn read(path: &Path) -> Vec<u8> {
        std::fs::read(path).unwrap()
    }

    #[tokio::test]
    async fn test_all_attachments_persisted() {
        let dir = temp_dir();
        let transport = Arc::new(FakeTransport::new());
        let names = ["1.png", "2.jpg", "3.webm", "4.gif"];
        for name in names {
            transport.ok(format!("https://i.4cdn.org/g/{}", name), format!("data-{}", name));
        }

        let locators = names.iter().map(|n| attachment(n)).collect();
        let summary = engine(transport.clone(), 0)
            .fetch_all(dir.path(), locators, &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 4);
        assert!(summary.failed.is_empty());
        for name in names {
            assert_eq!(read(&dir.path().join(name)), format!("data-{}", name).into_bytes());
            assert!(!dir.path().join(format!("{}{}", name, PART_SUFFIX)).exists());
        }
        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_one_timeout_does_not_affect_siblings() {
        let dir = temp_dir();
        let transport = Arc::new(FakeTransport::new());
        transport.ok("https://i.4cdn.org/g/1.png", "one");
        transport.reply("https://i.4cdn.org/g/2.png", FakeReply::Hang);
        transport.ok("https://i.4cdn.org/g/3.png", "three");
        transport.reply(
            "https://i.4cdn.org/g/4.png",
            FakeReply::Fail(TransportError::Timeout("simulated".to_string())),
        );
        transport.ok("https://i.4cdn.org/g/5.png", "five");

        let locators = (1..=5).map(|i| attachment(&format!("{}.png", i))).collect();
        let summary = engine(transport, 0)
            .fetch_all(dir.path(), locators, &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 3);
        let failed: Vec<&str> = summary.failed.iter().map(|f| f.locator.filename()).collect();
        assert_eq!(failed, vec!["2.png", "4.png"]);
        assert!(summary
            .failed
            .iter()
            .all(|f| matches!(f.error, AttachmentError::Transport(TransportError::Timeout(_)))));
        assert_eq!(read(&dir.path().join("1.png")), b"one".to_vec());
        assert_eq!(read(&dir.path().join("5.png")), b"five".to_vec());
        assert!(!dir.path().join("2.png").exists());
    }

    #[tokio::test]
    async fn test_attachments_are_fetched_concurrently() {
        let dir = temp_dir();
        let transport = Arc::new(FakeTransport::new());
        let count = 6;
        // no reply is released until every request is in flight
        let barrier = Arc::new(Barrier::new(count));
        for i in 1..=count {
            transport.reply(
                format!("https://i.4cdn.org/g/{}.png", i),
                FakeReply::Together(barrier.clone(), Bytes::from(format!("data-{}", i))),
            );
        }

        let locators = (1..=count).map(|i| attachment(&format!("{}.png", i))).collect();
        let summary = engine(transport, 0)
            .fetch_all(dir.path(), locators, &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, count);
        assert!(summary.failed.is_empty());
        assert_eq!(read(&dir.path().join("6.png")), b"data-6".to_vec());
    }

    #[tokio::test]
    async fn test_hanging_requests_time_out_together() {
        let dir = temp_dir();
        let transport = Arc::new(FakeTransport::new());
        let count = 8;
        for i in 1..=count {
            transport.reply(format!("https://i.4cdn.org/g/{}.png", i), FakeReply::Hang);
        }

        let locators = (1..=count).map(|i| attachment(&format!("{}.png", i))).collect();
        let started = Instant::now();
        let summary = engine(transport, 0)
            .fetch_all(dir.path(), locators, &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(summary.failed.len(), count);
        // one 200ms timeout window, not eight back to back
        assert!(
            started.elapsed() < Duration::from_millis(800),
            "took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_item_failure() {
        let dir = temp_dir();
        let transport = Arc::new(FakeTransport::new());
        transport.status("https://i.4cdn.org/g/1.png", 404);
        transport.ok("https://i.4cdn.org/g/2.png", "two");

        let locators = vec![attachment("1.png"), attachment("2.png")];
        let summary = engine(transport, 1)
            .fetch_all(dir.path(), locators, &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(matches!(
            summary.failed[0].error,
            AttachmentError::Status { status: 404, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_plan_issues_no_requests() {
        let dir = temp_dir();
        let transport = Arc::new(FakeTransport::new());

        let summary = engine(transport.clone(), 0)
            .fetch_all(dir.path(), Vec::new(), &ProgressBar::hidden())
            .await
            .unwrap();
        assert_eq!(summary, FetchSummary::default());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_folder_is_fatal() {
        let dir = temp_dir();
        let transport = Arc::new(FakeTransport::new());
        transport.ok("https://i.4cdn.org/g/1.png", "one");

        let missing = dir.path().join("does-not-exist");
        let result = engine(transport, 0)
            .fetch_all(&missing, vec![attachment("1.png")], &ProgressBar::hidden())
            .await;
        assert!(matches!(result, Err(DownloadError::Filesystem { .. })));
    }
}
