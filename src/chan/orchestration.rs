//! Orchestration of a scrape batch
//!
//! Threads are processed one after another. For each thread the orchestrator:
//! 1. Skips it if the failure log already lists it (no network call)
//! 2. Resolves the thread metadata, recording failures in the failure log
//! 3. Plans the attachments missing from the thread's folder
//! 4. Fetches them concurrently and waits for every write before moving on

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chan::config_loader::{Endpoints, ScrapeConfig};
use crate::chan::download_engine::{DownloadEngine, DownloadEngineConfig, DownloadError, FetchSummary};
use crate::chan::failure_log::{FailureLog, FailureLogError};
use crate::chan::local_state::{self, LocalStateError};
use crate::chan::locator::ThreadLocator;
use crate::chan::planner::{AttachmentPlanner, DestinationFolder};
use crate::chan::thread_fetcher::{MetadataError, ThreadFetcher, ThreadMetadata};
use crate::chan::transport::{HttpTransport, ReqwestTransport, TransportError};

/// Error types for the orchestration layer
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Failure log error: {0}")]
    FailureLog(#[from] FailureLogError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Local state error: {0}")]
    LocalState(#[from] LocalStateError),

    #[error("Failed to create folder {path}: {source}")]
    CreateFolder {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),
}

/// Result type for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Where the orchestrator currently is in the batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeState {
    Idle,
    Resolving(ThreadLocator),
    PlanningOrSkipped,
    Fetching,
}

/// Counts and failures of one processed thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReport {
    pub folder: DestinationFolder,
    pub found: usize,
    pub planned: usize,
    pub fetch: FetchSummary,
}

/// What happened to one thread of the batch
#[derive(Debug)]
pub enum ThreadOutcome {
    /// Listed in the failure log, not attempted
    Skipped,
    /// Metadata could not be retrieved; now in the failure log
    MetadataUnavailable(MetadataError),
    Completed(ThreadReport),
    /// A filesystem problem stopped this thread
    Aborted(OrchestratorError),
}

impl fmt::Display for ThreadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadOutcome::Skipped => write!(f, "skipped (previously failed)"),
            ThreadOutcome::MetadataUnavailable(e) => write!(f, "unavailable: {}", e),
            ThreadOutcome::Completed(report) => write!(
                f,
                "{} attachments found, {} new, {} downloaded, {} failed",
                report.found,
                report.planned,
                report.fetch.succeeded,
                report.fetch.failed.len()
            ),
            ThreadOutcome::Aborted(e) => write!(f, "aborted: {}", e),
        }
    }
}

/// Aggregate result of a batch
#[derive(Debug)]
pub struct BatchSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub threads: Vec<(ThreadLocator, ThreadOutcome)>,
}

impl BatchSummary {
    fn count(&self, predicate: impl Fn(&ThreadOutcome) -> bool) -> usize {
        self.threads.iter().filter(|(_, outcome)| predicate(outcome)).count()
    }

    fn reports(&self) -> impl Iterator<Item = &ThreadReport> {
        self.threads.iter().filter_map(|(_, outcome)| match outcome {
            ThreadOutcome::Completed(report) => Some(report),
            _ => None,
        })
    }

    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ThreadOutcome::Completed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ThreadOutcome::Skipped))
    }

    pub fn unavailable(&self) -> usize {
        self.count(|o| matches!(o, ThreadOutcome::MetadataUnavailable(_)))
    }

    pub fn aborted(&self) -> usize {
        self.count(|o| matches!(o, ThreadOutcome::Aborted(_)))
    }

    pub fn attachments_downloaded(&self) -> usize {
        self.reports().map(|r| r.fetch.succeeded).sum()
    }

    pub fn attachments_failed(&self) -> usize {
        self.reports().map(|r| r.fetch.failed.len()).sum()
    }
}

/// Drives the fetch pipeline over a list of threads
pub struct Orchestrator {
    attachments_root: PathBuf,
    endpoints: Endpoints,
    fetcher: ThreadFetcher,
    planner: AttachmentPlanner,
    engine: DownloadEngine,
    failure_log: FailureLog,
    state: Mutex<ScrapeState>,
    show_progress: bool,
}

impl Orchestrator {
    pub fn new(config: &ScrapeConfig, transport: Arc<dyn HttpTransport>, failure_log: FailureLog) -> Self {
        let timeout = Duration::from_secs(config.network.timeout_secs);
        Self {
            attachments_root: config.attachments_dir(),
            endpoints: config.endpoints.clone(),
            fetcher: ThreadFetcher::new(transport.clone(), timeout),
            planner: AttachmentPlanner::new(config.endpoints.clone()),
            engine: DownloadEngine::new(DownloadEngineConfig::from(&config.network), transport),
            failure_log,
            state: Mutex::new(ScrapeState::Idle),
            show_progress: false,
        }
    }

    /// Render per-thread progress bars on the terminal
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> ScrapeState {
        self.state.lock().clone()
    }

    pub fn failure_log(&self) -> &FailureLog {
        &self.failure_log
    }

    fn set_state(&self, state: ScrapeState) {
        *self.state.lock() = state;
    }

    /// Process every locator in order; only a failure-log write error ends the batch early
    pub async fn run(&self, locators: &[ThreadLocator]) -> OrchestratorResult<BatchSummary> {
        let started_at = Utc::now();
        info!(
            timestamp = %started_at.to_rfc3339(),
            threads = locators.len(),
            "Starting scrape batch"
        );

        let mut threads = Vec::with_capacity(locators.len());
        for locator in locators {
            let span = info_span!(
                "thread",
                trace_id = %Uuid::new_v4(),
                board = %locator.board(),
                thread_id = locator.thread_id(),
            );
            let outcome = self.scrape_thread(locator).instrument(span).await;
            self.set_state(ScrapeState::Idle);

            let outcome = outcome?;
            info!(thread = %locator, "{}", outcome);
            threads.push((locator.clone(), outcome));
        }

        let finished_at = Utc::now();
        let summary = BatchSummary {
            started_at,
            finished_at,
            threads,
        };
        info!(
            timestamp = %finished_at.to_rfc3339(),
            completed = summary.completed(),
            skipped = summary.skipped(),
            unavailable = summary.unavailable(),
            aborted = summary.aborted(),
            downloaded = summary.attachments_downloaded(),
            failed = summary.attachments_failed(),
            "Scrape batch complete"
        );
        Ok(summary)
    }

    async fn scrape_thread(&self, locator: &ThreadLocator) -> OrchestratorResult<ThreadOutcome> {
        if self.failure_log.contains(locator) {
            info!("Skipping thread listed in {}", self.failure_log.path().display());
            self.set_state(ScrapeState::PlanningOrSkipped);
            return Ok(ThreadOutcome::Skipped);
        }

        self.set_state(ScrapeState::Resolving(locator.clone()));
        let endpoint = locator.metadata_endpoint(&self.endpoints);
        let metadata = match self.fetcher.fetch_thread(locator, &endpoint).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Thread metadata unavailable: {}", e);
                self.failure_log.record(locator)?;
                return Ok(ThreadOutcome::MetadataUnavailable(e));
            }
        };

        self.set_state(ScrapeState::PlanningOrSkipped);
        match self.plan_and_fetch(locator, &metadata).await {
            Ok(report) => Ok(ThreadOutcome::Completed(report)),
            Err(e) => {
                error!("Aborting thread: {}", e);
                Ok(ThreadOutcome::Aborted(e))
            }
        }
    }

    async fn plan_and_fetch(
        &self,
        locator: &ThreadLocator,
        metadata: &ThreadMetadata,
    ) -> OrchestratorResult<ThreadReport> {
        let board = locator.board();
        let folder = match local_state::find_existing_folder(&self.attachments_root, board, locator.thread_id())? {
            Some(existing) => existing,
            None => AttachmentPlanner::destination_folder(metadata, board),
        };
        let folder_path = folder.path(&self.attachments_root);

        let existing_files = local_state::existing_files(&folder_path)?;
        let plan = self.planner.plan(metadata, folder, &existing_files);
        info!(
            folder = %plan.folder,
            "Found {} attachments, {} new",
            plan.total_found,
            plan.attachments.len()
        );
        if self.show_progress {
            let line = format!(
                "{}: found {} attachments, {} new",
                locator,
                plan.total_found,
                plan.attachments.len()
            );
            if let Err(e) = Term::stderr().write_line(&line) {
                warn!("Failed to write to terminal: {}", e);
            }
        }

        Self::ensure_folder(&folder_path).await?;

        let planned = plan.attachments.len();
        let fetch = if planned == 0 {
            FetchSummary::default()
        } else {
            self.set_state(ScrapeState::Fetching);
            let progress = self.progress_bar(locator, planned);
            let fetch = self.engine.fetch_all(&folder_path, plan.attachments, &progress).await;
            progress.finish_and_clear();
            fetch?
        };

        Ok(ThreadReport {
            folder: plan.folder,
            found: plan.total_found,
            planned,
            fetch,
        })
    }

    async fn ensure_folder(path: &Path) -> OrchestratorResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|source| OrchestratorError::CreateFolder {
                path: path.display().to_string(),
                source,
            })
    }

    fn progress_bar(&self, locator: &ThreadLocator, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{prefix} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(locator.to_string());
        bar
    }
}

/// Build an orchestrator over the reqwest transport and the configured failure log
pub fn init_orchestrator(config: &ScrapeConfig) -> OrchestratorResult<Orchestrator> {
    let transport = ReqwestTransport::new(&config.network)?;
    let failure_log = FailureLog::open(config.failed_threads_path())?;
    Ok(Orchestrator::new(config, Arc::new(transport), failure_log))
}
