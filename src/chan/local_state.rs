//! Inspection of what is already on disk
//!
//! Answers "which files of this thread do we already have", finds a thread's
//! folder from an earlier run, and rediscovers thread locators from the
//! folder tree for refresh runs.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::chan::locator::{Board, ThreadLocator};
use crate::chan::planner::DestinationFolder;

/// Suffix of files still being written
pub const PART_SUFFIX: &str = ".part";

lazy_static! {
    static ref THREAD_FOLDER_PATTERN: Regex = Regex::new(r"^([1-9][0-9]{6,8}) - ").unwrap();
}

/// Error types for local state inspection
#[derive(Error, Debug)]
pub enum LocalStateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Result type for local state operations
pub type LocalStateResult<T> = Result<T, LocalStateError>;

fn file_name_of(entry: &walkdir::DirEntry) -> Option<&str> {
    entry.file_name().to_str()
}

/// Names of the completed files directly inside `folder`; empty if it does not exist
pub fn existing_files(folder: &Path) -> LocalStateResult<HashSet<String>> {
    let mut files = HashSet::new();
    if !folder.is_dir() {
        return Ok(files);
    }

    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        match file_name_of(&entry) {
            Some(name) if !name.ends_with(PART_SUFFIX) => {
                files.insert(name.to_string());
            }
            Some(_) => debug!("Ignoring partial file {}", entry.path().display()),
            None => warn!("Ignoring non UTF-8 file name {}", entry.path().display()),
        }
    }

    Ok(files)
}

/// Folder of `thread_id` left by an earlier run, if any
pub fn find_existing_folder(
    root: &Path,
    board: &Board,
    thread_id: u64,
) -> LocalStateResult<Option<DestinationFolder>> {
    let board_dir = root.join(board.as_str());
    if !board_dir.is_dir() {
        return Ok(None);
    }

    let prefix = format!("{} - ", thread_id);
    let mut candidates = Vec::new();
    for entry in WalkDir::new(&board_dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(name) = file_name_of(&entry) {
            if name.starts_with(&prefix) {
                candidates.push(name.to_string());
            }
        }
    }

    candidates.sort();
    Ok(candidates
        .into_iter()
        .next()
        .map(|dir_name| DestinationFolder::existing(board.clone(), dir_name)))
}

/// Rebuild thread locators from `root/{board}/{thread_id} - {name}` folders, sorted
pub fn discover_locators(root: &Path) -> LocalStateResult<Vec<ThreadLocator>> {
    if !root.is_dir() {
        warn!("Attachments directory {} does not exist, nothing to refresh", root.display());
        return Ok(Vec::new());
    }

    let mut locators = Vec::new();
    for entry in WalkDir::new(root).min_depth(2).max_depth(2) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let board = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(|n| Board::parse(n).ok());
        let thread_id = file_name_of(&entry)
            .and_then(|name| THREAD_FOLDER_PATTERN.captures(name))
            .and_then(|caps| caps[1].parse::<u64>().ok());

        match (board, thread_id) {
            (Some(board), Some(thread_id)) => match ThreadLocator::new(board, thread_id) {
                Ok(locator) => locators.push(locator),
                Err(e) => debug!("Skipping {}: {}", entry.path().display(), e),
            },
            _ => debug!("Skipping unrecognised folder {}", entry.path().display()),
        }
    }

    locators.sort();
    locators.dedup();
    Ok(locators)
}
