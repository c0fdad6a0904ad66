//! Thread attachment archiver
//! Resolves thread locators, plans missing attachments and fetches them concurrently

pub mod cli;
pub mod config_loader;
pub mod download_engine;
pub mod failure_log;
pub mod local_state;
pub mod locator;
pub mod logger;
pub mod orchestration;
pub mod planner;
pub mod thread_fetcher;
pub mod transport;

// Re-export the types the program layer drives
pub use cli::{prompt_locator, resolve_locators, Cli};
pub use config_loader::ScrapeConfig;
pub use logger::init_logger;
pub use orchestration::{init_orchestrator, BatchSummary, ThreadOutcome};
