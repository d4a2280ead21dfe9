//! Partition resolution.
//!
//! Maps a key that has no open handle to the concrete file to open:
//!
//! ```text
//! <dir>/
//! ├─ <key>[.gz]            # partitioning disabled
//! ├─ <key>.0[.gz]          # partitioning enabled, first handle
//! └─ <key>.1[.gz]          # reopened after eviction or restart
//! ```
//!
//! Partition numbers come from the directory itself, so a new process
//! resumes numbering from whatever partitions already exist on disk.

use crate::config::PartitionNumbering;
use crate::error::{FanoutError, FanoutResult};
use crate::sink::GZIP_EXTENSION;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Separator between a key, its partition index and its extension.
const SEPARATOR: char = '.';

/// A resolved destination for a new handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Full path of the file to open.
    pub path: PathBuf,
    /// Partition index, when partitioning is enabled.
    pub partition: Option<u64>,
}

/// Computes file paths for keys that are about to get a new handle.
#[derive(Debug)]
pub struct PartitionResolver {
    dir: PathBuf,
    partitioned: bool,
    extension: Option<String>,
    numbering: PartitionNumbering,
    /// Highest index handed out per key (`ScanOnce` only).
    highest: Mutex<HashMap<String, u64>>,
}

impl PartitionResolver {
    /// Creates a resolver for files under `dir`.
    pub fn new(
        dir: impl Into<PathBuf>,
        partitioned: bool,
        extension: Option<&str>,
        numbering: PartitionNumbering,
    ) -> Self {
        Self {
            dir: dir.into(),
            partitioned,
            extension: extension.map(str::to_owned),
            numbering,
            highest: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves the path for a new handle for `key`.
    ///
    /// Called once per handle creation, never on a cache hit.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::Scan`] if the directory cannot be listed, or
    /// [`FanoutError::PartitionOverflow`] if no higher index is left.
    pub fn resolve(&self, key: &str) -> FanoutResult<ResolvedPath> {
        if !self.partitioned {
            return Ok(ResolvedPath {
                path: self.dir.join(self.file_name(key, None)),
                partition: None,
            });
        }

        let index = match self.numbering {
            PartitionNumbering::ScanEachOpen => self.next_partition_on_disk(key)?,
            PartitionNumbering::ScanOnce => self.next_partition_in_memory(key)?,
        };

        Ok(ResolvedPath {
            path: self.dir.join(self.file_name(key, Some(index))),
            partition: Some(index),
        })
    }

    fn next_partition_in_memory(&self, key: &str) -> FanoutResult<u64> {
        let known = self.highest.lock().contains_key(key);
        // Scan without holding the map so other keys are not blocked.
        let floor = if known {
            0
        } else {
            self.next_partition_on_disk(key)?
        };

        let mut highest = self.highest.lock();
        let index = match highest.get(key) {
            Some(&last) => last
                .checked_add(1)
                .ok_or_else(|| FanoutError::partition_overflow(key))?
                .max(floor),
            None => floor,
        };
        highest.insert(key.to_owned(), index);
        Ok(index)
    }

    /// Returns `1 + max(index)` over files in the directory whose name
    /// starts with `key`, or `0` if there are none.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::Scan`] if the directory cannot be listed, or
    /// [`FanoutError::PartitionOverflow`] if an existing file already holds
    /// the largest possible index.
    pub fn next_partition_on_disk(&self, key: &str) -> FanoutResult<u64> {
        let entries = fs::read_dir(&self.dir).map_err(|e| FanoutError::scan(&self.dir, e))?;

        let mut max: Option<u64> = None;
        for entry in entries {
            let entry = entry.map_err(|e| FanoutError::scan(&self.dir, e))?;
            let is_file = entry
                .file_type()
                .map_err(|e| FanoutError::scan(&self.dir, e))?
                .is_file();
            if !is_file {
                continue;
            }

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(residual) = name.strip_prefix(key) {
                let index = residual_index(residual, self.extension.as_deref());
                max = Some(max.map_or(index, |m| m.max(index)));
            }
        }

        match max {
            None => Ok(0),
            Some(m) => m
                .checked_add(1)
                .ok_or_else(|| FanoutError::partition_overflow(key)),
        }
    }

    fn file_name(&self, key: &str, partition: Option<u64>) -> String {
        let mut name = key.to_owned();
        if let Some(index) = partition {
            name.push(SEPARATOR);
            name.push_str(&index.to_string());
        }
        if let Some(ext) = &self.extension {
            name.push(SEPARATOR);
            name.push_str(ext);
        }
        name
    }
}

/// Parses the partition index out of what remains of a filename once the
/// key prefix is removed.
///
/// Extension suffixes and separators are stripped first. Anything that
/// still fails to parse counts as index 0; it is not skipped.
#[must_use]
pub fn residual_index(residual: &str, extension: Option<&str>) -> u64 {
    let mut rest = residual;
    for ext in extension.into_iter().chain(std::iter::once(GZIP_EXTENSION)) {
        if let Some(stripped) = rest
            .strip_suffix(ext)
            .and_then(|r| r.strip_suffix(SEPARATOR))
        {
            rest = stripped;
            break;
        }
    }

    let digits: String = rest.chars().filter(|&c| c != SEPARATOR).collect();
    digits.parse().unwrap_or(0)
}

/// Creates `path` as an empty file if opening it did not already do so.
///
/// # Errors
///
/// Returns an error if the file cannot be created.
pub fn ensure_exists(path: &Path) -> io::Result<()> {
    if !path.exists() {
        OpenOptions::new().create(true).append(true).open(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn unpartitioned_path() {
        let dir = tempdir().unwrap();
        let plain = PartitionResolver::new(dir.path(), false, None, PartitionNumbering::default());
        let gz = PartitionResolver::new(dir.path(), false, Some("gz"), PartitionNumbering::default());

        let resolved = plain.resolve("places").unwrap();
        assert_eq!(resolved.path, dir.path().join("places"));
        assert_eq!(resolved.partition, None);
        assert_eq!(gz.resolve("places").unwrap().path, dir.path().join("places.gz"));
    }

    #[test]
    fn empty_directory_starts_at_zero() {
        let dir = tempdir().unwrap();
        let resolver = PartitionResolver::new(dir.path(), true, None, PartitionNumbering::default());

        let resolved = resolver.resolve("places").unwrap();
        assert_eq!(resolved.partition, Some(0));
        assert_eq!(resolved.path, dir.path().join("places.0"));
    }

    #[test]
    fn next_index_follows_highest_on_disk() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "places.0.gz");
        touch(dir.path(), "places.7.gz");
        touch(dir.path(), "places.3.gz");
        touch(dir.path(), "roads.12.gz");

        let resolver =
            PartitionResolver::new(dir.path(), true, Some("gz"), PartitionNumbering::default());
        let resolved = resolver.resolve("places").unwrap();
        assert_eq!(resolved.partition, Some(8));
        assert_eq!(resolved.path, dir.path().join("places.8.gz"));
    }

    #[test]
    fn unparseable_residual_counts_as_zero() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "keyname-backup");

        let resolver = PartitionResolver::new(dir.path(), true, None, PartitionNumbering::default());
        assert_eq!(resolver.next_partition_on_disk("keyname").unwrap(), 1);
    }

    #[test]
    fn unpartitioned_file_counts_as_zero() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "places");

        let resolver = PartitionResolver::new(dir.path(), true, None, PartitionNumbering::default());
        assert_eq!(resolver.next_partition_on_disk("places").unwrap(), 1);
    }

    #[test]
    fn subdirectories_are_ignored() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("places.9")).unwrap();

        let resolver = PartitionResolver::new(dir.path(), true, None, PartitionNumbering::default());
        assert_eq!(resolver.next_partition_on_disk("places").unwrap(), 0);
    }

    #[test]
    fn scan_each_open_sees_new_files() {
        let dir = tempdir().unwrap();
        let resolver = PartitionResolver::new(dir.path(), true, None, PartitionNumbering::default());

        let first = resolver.resolve("k").unwrap();
        assert_eq!(first.partition, Some(0));
        // Nothing created yet, so the same index comes back.
        assert_eq!(resolver.resolve("k").unwrap().partition, Some(0));

        ensure_exists(&first.path).unwrap();
        assert_eq!(resolver.resolve("k").unwrap().partition, Some(1));
    }

    #[test]
    fn scan_once_tracks_index_in_memory() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "k.4");
        let resolver = PartitionResolver::new(dir.path(), true, None, PartitionNumbering::ScanOnce);

        assert_eq!(resolver.resolve("k").unwrap().partition, Some(5));
        assert_eq!(resolver.resolve("k").unwrap().partition, Some(6));

        // Files created behind the resolver's back are not rescanned.
        touch(dir.path(), "k.40");
        assert_eq!(resolver.resolve("k").unwrap().partition, Some(7));
    }

    #[test]
    fn scan_once_resolves_many_keys_in_parallel() {
        let dir = tempdir().unwrap();
        for i in 0..16 {
            touch(dir.path(), &format!("k{i}.3"));
        }
        let resolver = PartitionResolver::new(dir.path(), true, None, PartitionNumbering::ScanOnce);

        std::thread::scope(|scope| {
            for i in 0..16 {
                let resolver = &resolver;
                scope.spawn(move || {
                    let key = format!("k{i}");
                    assert_eq!(resolver.resolve(&key).unwrap().partition, Some(4));
                    assert_eq!(resolver.resolve(&key).unwrap().partition, Some(5));
                });
            }
        });
    }

    #[test]
    fn exhausted_index_is_an_error() {
        let dir = tempdir().unwrap();
        touch(dir.path(), &format!("k.{}", u64::MAX));

        for numbering in [PartitionNumbering::ScanEachOpen, PartitionNumbering::ScanOnce] {
            let resolver = PartitionResolver::new(dir.path(), true, None, numbering);
            assert!(matches!(
                resolver.resolve("k"),
                Err(FanoutError::PartitionOverflow { .. })
            ));
        }
    }

    #[test]
    fn scan_once_counts_up_to_the_last_index() {
        let dir = tempdir().unwrap();
        touch(dir.path(), &format!("k.{}", u64::MAX - 1));
        let resolver = PartitionResolver::new(dir.path(), true, None, PartitionNumbering::ScanOnce);

        assert_eq!(resolver.resolve("k").unwrap().partition, Some(u64::MAX));
        assert!(matches!(
            resolver.resolve("k"),
            Err(FanoutError::PartitionOverflow { .. })
        ));
    }

    #[test]
    fn missing_directory_is_scan_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let resolver = PartitionResolver::new(&missing, true, None, PartitionNumbering::default());

        assert!(matches!(resolver.resolve("k"), Err(FanoutError::Scan { .. })));
    }

    #[test]
    fn residual_parsing() {
        assert_eq!(residual_index(".3", None), 3);
        assert_eq!(residual_index(".3.gz", None), 3);
        assert_eq!(residual_index(".3.gz", Some("gz")), 3);
        assert_eq!(residual_index(".3.txt", Some("txt")), 3);
        assert_eq!(residual_index("", None), 0);
        assert_eq!(residual_index("-backup", None), 0);
        assert_eq!(residual_index("_roads.5", None), 0);
    }

    #[test]
    fn ensure_exists_creates_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("k.0");

        ensure_exists(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        fs::write(&path, b"data\n").unwrap();
        ensure_exists(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"data\n");
    }

    proptest! {
        #[test]
        fn residual_never_panics(residual in ".{0,24}") {
            let _ = residual_index(&residual, Some("gz"));
        }

        #[test]
        fn numeric_residual_round_trips(index in any::<u64>()) {
            prop_assert_eq!(residual_index(&format!(".{index}.gz"), Some("gz")), index);
        }
    }
}
