//! Thread and attachment locators
//!
//! This module provides functionality for:
//! 1. Parsing a full thread URL or `board/thread/id` shorthand into a [`ThreadLocator`]
//! 2. Deriving the JSON metadata endpoint for a thread
//! 3. Deriving and validating attachment URLs

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::chan::config_loader::Endpoints;

lazy_static! {
    /// Full thread URL, optionally followed by a title slug, query or post anchor
    static ref FULL_URL_PATTERN: Regex = Regex::new(
        r"^https?://boards\.4chan(?:nel)?\.org/([A-Za-z0-9]{1,3})/thread/([1-9][0-9]{6,8})(?:/[^?#]*)?(?:\?[^#]*)?(?:#.*)?$"
    ).unwrap();

    /// Shorthand `board/thread/id`, leading and trailing slash tolerated
    static ref SHORTHAND_PATTERN: Regex =
        Regex::new(r"^/?([A-Za-z0-9]{1,3})/thread/([1-9][0-9]{6,8})/?$").unwrap();

    static ref BOARD_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9]{1,3}$").unwrap();

    static ref HTTP_URL_PATTERN: Regex = Regex::new(r"^https?://[^\s/]+/\S+$").unwrap();
}

/// Error types for locator parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("Invalid thread locator: {0:?}")]
    Invalid(String),

    #[error("Invalid board: {0:?}")]
    InvalidBoard(String),

    #[error("Invalid attachment url: {0:?}")]
    InvalidAttachment(String),
}

/// Result type for locator operations
pub type LocatorResult<T> = Result<T, LocatorError>;

/// Short identifier of a board, 1 to 3 ASCII alphanumerics
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Board(String);

impl Board {
    pub fn parse(input: &str) -> LocatorResult<Self> {
        if BOARD_PATTERN.is_match(input) {
            Ok(Self(input.to_string()))
        } else {
            Err(LocatorError::InvalidBoard(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated `(board, thread_id)` pair.
///
/// The only way to obtain one is through [`ThreadLocator::parse`] (or
/// [`ThreadLocator::new`] with an already validated board), so an invalid
/// locator never exists past construction. Its canonical text form is
/// `{board}/thread/{thread_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadLocator {
    board: Board,
    thread_id: u64,
}

impl ThreadLocator {
    /// Build a locator from parts, enforcing the 7 to 9 digit thread id shape
    pub fn new(board: Board, thread_id: u64) -> LocatorResult<Self> {
        let digits = thread_id.to_string().len();
        if !(7..=9).contains(&digits) {
            return Err(LocatorError::Invalid(format!("{}/thread/{}", board, thread_id)));
        }
        Ok(Self { board, thread_id })
    }

    /// Parse a full thread URL or the `board/thread/id` shorthand
    pub fn parse(input: &str) -> LocatorResult<Self> {
        let trimmed = input.trim();
        let captures = FULL_URL_PATTERN
            .captures(trimmed)
            .or_else(|| SHORTHAND_PATTERN.captures(trimmed))
            .ok_or_else(|| LocatorError::Invalid(trimmed.to_string()))?;

        let board = Board::parse(&captures[1])?;
        let thread_id = captures[2]
            .parse::<u64>()
            .map_err(|_| LocatorError::Invalid(trimmed.to_string()))?;

        Self::new(board, thread_id).map_err(|_| LocatorError::Invalid(trimmed.to_string()))
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    /// JSON endpoint listing the thread's posts
    pub fn metadata_endpoint(&self, endpoints: &Endpoints) -> String {
        format!(
            "https://{}/{}/thread/{}.json",
            endpoints.metadata_host, self.board, self.thread_id
        )
    }
}

impl FromStr for ThreadLocator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ThreadLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/thread/{}", self.board, self.thread_id)
    }
}

/// URL of a single media file on the media host
pub fn attachment_endpoint(endpoints: &Endpoints, board: &Board, filename: &str) -> String {
    format!("https://{}/{}/{}", endpoints.media_host, board, filename)
}

/// A validated attachment URL together with the name it is saved under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentLocator {
    url: String,
    filename: String,
    display_name: String,
}

impl AttachmentLocator {
    /// Validate an attachment URL; the filename is its trailing path segment
    pub fn new(url: impl Into<String>) -> LocatorResult<Self> {
        let url = url.into();
        if !HTTP_URL_PATTERN.is_match(&url) {
            return Err(LocatorError::InvalidAttachment(url));
        }

        let filename = match url.rsplit('/').next() {
            Some(segment) if !segment.is_empty() && segment != "." && segment != ".." => {
                segment.to_string()
            }
            _ => return Err(LocatorError::InvalidAttachment(url)),
        };

        Ok(Self {
            display_name: filename.clone(),
            url,
            filename,
        })
    }

    /// Derive the locator for `filename` on `board`
    pub fn for_file(endpoints: &Endpoints, board: &Board, filename: &str) -> LocatorResult<Self> {
        Self::new(attachment_endpoint(endpoints, board, filename))
    }

    /// Replace the name shown in progress output (defaults to the filename)
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Display for AttachmentLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
