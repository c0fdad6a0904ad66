//! Command line surface
//!
//! Parses arguments into a [`RunConfig`] and turns its locator sources
//! (arguments, input file, refresh scan, interactive prompt) into one
//! ordered, de-duplicated list of [`ThreadLocator`]s.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use dialoguer::{theme::ColorfulTheme, Input};
use thiserror::Error;
use tracing::{info, warn};

use crate::chan::config_loader::{RunConfig, CONFIG_NAME};
use crate::chan::local_state::{self, LocalStateError};
use crate::chan::locator::{LocatorError, ThreadLocator};

// Error type for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    InvalidLocator(#[from] LocatorError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to scan local folders: {0}")]
    LocalState(#[from] LocalStateError),

    #[error("UI interaction error: {0}")]
    Dialoguer(#[from] dialoguer::Error),
}

// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Download every attachment of imageboard threads, skipping what is already on disk
#[derive(Parser, Debug)]
#[command(name = "chan_archiver", version, about)]
pub struct Cli {
    /// Thread URLs or `board/thread/id` shorthands
    pub locators: Vec<String>,

    /// File with one thread locator per line (`#` starts a comment line)
    #[arg(short = 'f', long = "input-file", value_name = "PATH")]
    pub input_file: Option<PathBuf>,

    /// Re-scrape every thread that already has a folder under the attachments directory
    #[arg(short, long)]
    pub refresh: bool,

    /// Config file to load
    #[arg(short, long, value_name = "PATH", default_value = CONFIG_NAME)]
    pub config: PathBuf,

    /// Write the default config to the config path and exit
    #[arg(long)]
    pub write_default_config: bool,

    /// Show debug output on the terminal
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            locators: self.locators.clone(),
            input_file: self.input_file.clone(),
            refresh: self.refresh,
        }
    }
}

/// Parse locator lines, skipping blanks and `#` comments; bad lines are logged and dropped
pub fn parse_locator_lines(content: &str, source: &str) -> Vec<ThreadLocator> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match ThreadLocator::parse(line) {
                Ok(locator) => Some(locator),
                Err(e) => {
                    warn!("{}:{}: {}", source, index + 1, e);
                    None
                }
            }
        })
        .collect()
}

/// Collect locators from arguments, then the input file, then the refresh scan.
///
/// Invalid arguments are rejected outright; duplicates keep their first position.
pub fn resolve_locators(run: &RunConfig, attachments_root: &Path) -> CliResult<Vec<ThreadLocator>> {
    let mut resolved = Vec::new();

    for raw in &run.locators {
        resolved.push(ThreadLocator::parse(raw)?);
    }

    if let Some(path) = &run.input_file {
        let content = fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let from_file = parse_locator_lines(&content, &path.display().to_string());
        info!("Read {} locators from {}", from_file.len(), path.display());
        resolved.extend(from_file);
    }

    if run.refresh {
        let discovered = local_state::discover_locators(attachments_root)?;
        info!(
            "Discovered {} threads under {}",
            discovered.len(),
            attachments_root.display()
        );
        resolved.extend(discovered);
    }

    let mut seen = HashSet::new();
    resolved.retain(|locator| seen.insert(locator.clone()));
    Ok(resolved)
}

/// Ask for a single thread URL on the terminal
pub fn prompt_locator() -> CliResult<ThreadLocator> {
    let input: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Thread URL")
        .validate_with(|input: &String| -> Result<(), String> {
            ThreadLocator::parse(input).map(|_| ()).map_err(|e| e.to_string())
        })
        .interact_text()?;

    Ok(ThreadLocator::parse(&input)?)
}
