//! Persistent log of threads whose metadata could not be retrieved
//!
//! One canonical locator per line, append-only. Threads listed here are
//! skipped on later runs without touching the network.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chan::locator::ThreadLocator;

/// Error types for the failure log
#[derive(Error, Debug)]
pub enum FailureLogError {
    #[error("Failed to access failure log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Result type for failure log operations
pub type FailureLogResult<T> = Result<T, FailureLogError>;

/// Append-only set of failed thread locators backed by a text file
pub struct FailureLog {
    path: PathBuf,
    entries: Mutex<HashSet<ThreadLocator>>,
}

impl FailureLog {
    /// Load the log at `path`; a missing file is an empty log
    pub fn open(path: impl Into<PathBuf>) -> FailureLogResult<Self> {
        let path = path.into();
        let mut entries = HashSet::new();

        match fs::read_to_string(&path) {
            Ok(content) => {
                for (index, line) in content.lines().enumerate() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match ThreadLocator::parse(line) {
                        Ok(locator) => {
                            entries.insert(locator);
                        }
                        Err(e) => warn!(
                            "Ignoring line {} of {}: {}",
                            index + 1,
                            path.display(),
                            e
                        ),
                    }
                }
                info!("Loaded {} failed threads from {}", entries.len(), path.display());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No failure log at {}", path.display());
            }
            Err(source) => {
                return Err(FailureLogError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        }

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, locator: &ThreadLocator) -> bool {
        self.entries.lock().contains(locator)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Record `locator`, writing it to disk only the first time.
    ///
    /// Returns whether a new line was appended.
    pub fn record(&self, locator: &ThreadLocator) -> FailureLogResult<bool> {
        let mut entries = self.entries.lock();
        if entries.contains(locator) {
            return Ok(false);
        }

        self.append_line(&locator.to_string())
            .map_err(|source| FailureLogError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        entries.insert(locator.clone());
        Ok(true)
    }

    fn append_line(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        if Self::ends_mid_line(&mut file)? {
            writeln!(file)?;
        }
        writeln!(file, "{}", line)?;
        file.flush()
    }

    /// Whether a hand edit left the last line without its newline
    fn ends_mid_line(file: &mut File) -> io::Result<bool> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(false);
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        Ok(last[0] != b'\n')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn locator(input: &str) -> ThreadLocator {
        ThreadLocator::parse(input).unwrap()
    }

    fn temp_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = temp_dir();
        let log = FailureLog::open(dir.path().join("failed_threads.txt")).unwrap();
        assert!(log.is_empty());
        assert!(!log.contains(&locator("g/thread/12345678")));
    }

    #[test]
    fn test_record_once_and_reload() {
        let dir = temp_dir();
        let path = dir.path().join("state").join("failed_threads.txt");
        let thread = locator("https://boards.4chan.org/g/thread/12345678");

        let log = FailureLog::open(&path).unwrap();
        assert!(matches!(log.record(&thread), Ok(true)));
        assert!(matches!(log.record(&thread), Ok(false)));
        assert!(log.contains(&thread));

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "g/thread/12345678\n");

        let reloaded = FailureLog::open(&path).unwrap();
        assert!(reloaded.contains(&thread));
        assert_eq!(reloaded.len(), 1);
        assert!(matches!(reloaded.record(&thread), Ok(false)));
    }

    #[test]
    fn test_invalid_lines_are_ignored() {
        let dir = temp_dir();
        let path = dir.path().join("failed_threads.txt");
        fs::write(
            &path,
            "g/thread/12345678\n\nnot a locator\nhttps://boards.4chan.org/v/thread/87654321\n",
        )
        .unwrap();

        let log = FailureLog::open(&path).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.contains(&locator("v/thread/87654321")));
    }

    #[test]
    fn test_record_after_unterminated_last_line() {
        let dir = temp_dir();
        let path = dir.path().join("failed_threads.txt");
        fs::write(&path, "g/thread/11111111").unwrap();

        let log = FailureLog::open(&path).unwrap();
        assert!(log.record(&locator("g/thread/22222222")).unwrap());

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "g/thread/11111111\ng/thread/22222222\n");

        let reloaded = FailureLog::open(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains(&locator("g/thread/11111111")));
        assert!(reloaded.contains(&locator("g/thread/22222222")));
    }

    #[test]
    fn test_leading_zero_line_is_not_a_locator() {
        let dir = temp_dir();
        let path = dir.path().join("failed_threads.txt");
        fs::write(&path, "g/thread/0123456\n").unwrap();

        let log = FailureLog::open(&path).unwrap();
        assert!(log.is_empty());
    }
}
