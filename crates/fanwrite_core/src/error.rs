//! Error types for fan-out writes.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for writer operations.
pub type FanoutResult<T> = Result<T, FanoutError>;

/// Errors that can occur while writing lines to their destinations.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// A destination file could not be opened or created.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// Path that was being opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Appending a line to an open handle failed.
    #[error("failed to write line for key '{key}': {source}")]
    Write {
        /// Destination key of the line.
        key: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Listing the target directory failed while resolving a partition.
    #[error("failed to scan {}: {source}", dir.display())]
    Scan {
        /// Directory being scanned.
        dir: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Every partition index for a key is already taken on disk.
    #[error("no partition index left for key '{key}'")]
    PartitionOverflow {
        /// Key whose numbering is exhausted.
        key: String,
    },

    /// One or more handles failed to flush or close.
    #[error("{0}")]
    Close(CloseErrors),

    /// The writer is closed.
    #[error("writer is closed")]
    Closed,
}

impl FanoutError {
    /// Creates an open error.
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    /// Creates a write error.
    pub fn write(key: impl Into<String>, source: io::Error) -> Self {
        Self::Write {
            key: key.into(),
            source,
        }
    }

    /// Creates a partition overflow error.
    pub fn partition_overflow(key: impl Into<String>) -> Self {
        Self::PartitionOverflow { key: key.into() }
    }

    /// Creates a scan error.
    pub fn scan(dir: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Scan {
            dir: dir.into(),
            source,
        }
    }
}

/// Flush or close failures collected across handles.
///
/// Every failure is kept; draining never stops at the first one.
#[derive(Debug, Default)]
pub struct CloseErrors {
    failures: Vec<(String, io::Error)>,
}

impl CloseErrors {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for `key`.
    pub fn push(&mut self, key: impl Into<String>, error: io::Error) {
        self.failures.push((key.into(), error));
    }

    /// Returns true if no failures were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Iterates over `(key, error)` pairs in the order they were recorded.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &io::Error)> {
        self.failures.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Converts into `Ok(())` when empty, or a [`FanoutError::Close`].
    pub fn into_result(self) -> FanoutResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(FanoutError::Close(self))
        }
    }
}

impl fmt::Display for CloseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} handle(s) failed to flush or close", self.failures.len())?;
        for (key, err) in &self.failures {
            write!(f, "; '{key}': {err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_close_errors_is_ok() {
        assert!(CloseErrors::new().into_result().is_ok());
    }

    #[test]
    fn close_errors_keep_every_failure() {
        let mut errors = CloseErrors::new();
        errors.push("a", io::Error::new(io::ErrorKind::Other, "disk full"));
        errors.push("b", io::Error::new(io::ErrorKind::Other, "quota"));
        errors.push("c", io::Error::new(io::ErrorKind::Other, "gone"));

        assert_eq!(errors.len(), 3);
        let keys: Vec<_> = errors.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let message = errors.to_string();
        assert!(message.starts_with("3 handle(s) failed to flush or close"));
        assert!(message.contains("'b': quota"));

        assert!(matches!(errors.into_result(), Err(FanoutError::Close(_))));
    }

    #[test]
    fn open_error_names_path() {
        let err = FanoutError::open(
            "/nope/k.0",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/nope/k.0"));
    }
}
