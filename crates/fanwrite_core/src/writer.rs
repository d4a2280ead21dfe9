//! The fan-out writer.

use crate::cache::HandleCache;
use crate::config::WriterConfig;
use crate::error::{FanoutError, FanoutResult};
use crate::partition::PartitionResolver;
use crate::sink::{factory_for, SinkFactory};
use crate::stats::WriterStats;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Writes lines to per-key files under one directory while keeping a
/// bounded number of files open.
///
/// `FanoutWriter` is `Send + Sync`; share it behind an `Arc` and call
/// [`write`](Self::write) from as many threads as needed. Lines for the same
/// key never interleave, and lines for different keys are written in
/// parallel.
///
/// # Example
///
/// ```no_run
/// use fanwrite_core::{FanoutWriter, WriterConfig};
///
/// let writer = FanoutWriter::open("out", WriterConfig::new().max_open_files(128)).unwrap();
/// writer.write(r#"{"type":"Feature"}"#, "places").unwrap();
/// writer.close().unwrap();
/// ```
#[derive(Debug)]
pub struct FanoutWriter {
    dir: PathBuf,
    config: WriterConfig,
    cache: HandleCache,
    stats: Arc<WriterStats>,
}

impl FanoutWriter {
    /// Opens a writer for `dir`, creating the directory and its ancestors
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>, config: WriterConfig) -> FanoutResult<Self> {
        let factory = factory_for(config.compression, config.buffer_capacity);
        Self::open_with_factory(dir, config, factory)
    }

    /// Opens a writer with partitioning and an open-file cap, and otherwise
    /// default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_options(
        dir: impl AsRef<Path>,
        partitioned: bool,
        max_open_files: usize,
    ) -> FanoutResult<Self> {
        Self::open(
            dir,
            WriterConfig::new()
                .partitioned(partitioned)
                .max_open_files(max_open_files),
        )
    }

    /// Opens a writer that creates handles through a custom factory.
    ///
    /// `config.compression` is ignored; the factory's extension is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open_with_factory(
        dir: impl AsRef<Path>,
        config: WriterConfig,
        factory: Arc<dyn SinkFactory>,
    ) -> FanoutResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| FanoutError::open(&dir, e))?;

        let resolver = PartitionResolver::new(
            &dir,
            config.partitioned,
            factory.extension(),
            config.partition_numbering,
        );
        let stats = Arc::new(WriterStats::new());
        let cache = HandleCache::new(
            config.max_open_files,
            resolver,
            factory,
            Arc::clone(&stats),
        );

        info!(
            dir = %dir.display(),
            partitioned = config.partitioned,
            max_open_files = config.max_open_files,
            "opened fan-out writer"
        );

        Ok(Self {
            dir,
            config,
            cache,
            stats,
        })
    }

    /// Appends `line` and a line terminator to the destination for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is closed, or if the destination
    /// cannot be opened or appended to. The line is not written in that case.
    pub fn write(&self, line: &str, key: &str) -> FanoutResult<()> {
        self.cache.write(key, line)
    }

    /// Flushes every open handle without closing it.
    ///
    /// # Errors
    ///
    /// Returns all flush failures after attempting every handle.
    pub fn flush(&self) -> FanoutResult<()> {
        self.cache.flush_all()
    }

    /// Flushes and closes every open handle.
    ///
    /// Every handle is attempted even if some fail. Failures include close
    /// errors from earlier evictions. Later calls to `write` fail with
    /// [`FanoutError::Closed`]; later calls to `close` do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::Close`] listing every handle that failed.
    pub fn close(&self) -> FanoutResult<()> {
        let open = self.cache.len();
        let result = self.cache.drain_all();
        info!(dir = %self.dir.display(), handles = open, "closed fan-out writer");
        result
    }

    /// Returns the target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the configuration this writer was opened with.
    #[must_use]
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Returns the number of currently open handles.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.cache.len()
    }

    /// Returns the handle cache.
    #[must_use]
    pub fn cache(&self) -> &HandleCache {
        &self.cache
    }

    /// Returns the writer statistics.
    #[must_use]
    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }
}

impl Drop for FanoutWriter {
    fn drop(&mut self) {
        if let Err(e) = self.cache.drain_all() {
            error!(dir = %self.dir.display(), error = %e, "failed to close writer on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Compression;
    use tempfile::tempdir;

    #[test]
    fn open_creates_nested_directory() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b").join("c");

        let writer = FanoutWriter::with_options(&target, true, 8).unwrap();
        assert!(target.is_dir());
        assert_eq!(writer.dir(), target);
        assert_eq!(writer.config().max_open_files, 8);
    }

    #[test]
    fn write_and_close() {
        let dir = tempdir().unwrap();
        let writer = FanoutWriter::with_options(dir.path(), false, 0).unwrap();

        writer.write("one", "places").unwrap();
        writer.write("two", "places").unwrap();
        writer.write("three", "roads").unwrap();
        assert_eq!(writer.open_handles(), 2);

        writer.close().unwrap();
        assert_eq!(writer.open_handles(), 0);

        assert_eq!(
            fs::read_to_string(dir.path().join("places")).unwrap(),
            "one\ntwo\n"
        );
        assert_eq!(fs::read_to_string(dir.path().join("roads")).unwrap(), "three\n");
    }

    #[test]
    fn write_after_close_fails() {
        let dir = tempdir().unwrap();
        let writer = FanoutWriter::with_options(dir.path(), true, 0).unwrap();

        writer.close().unwrap();
        assert!(matches!(writer.write("x", "k"), Err(FanoutError::Closed)));
        assert!(writer.close().is_ok());
    }

    #[test]
    fn gzip_files_use_extension() {
        let dir = tempdir().unwrap();
        let config = WriterConfig::new().compression(Compression::gzip());
        let writer = FanoutWriter::open(dir.path(), config).unwrap();

        writer.write("x", "k").unwrap();
        writer.close().unwrap();
        assert!(dir.path().join("k.0.gz").exists());
    }

    #[test]
    fn stats_track_lines() {
        let dir = tempdir().unwrap();
        let writer = FanoutWriter::with_options(dir.path(), true, 1).unwrap();

        writer.write("abc", "a").unwrap();
        writer.write("de", "b").unwrap();

        let stats = writer.stats().snapshot();
        assert_eq!(stats.lines_written, 2);
        assert_eq!(stats.bytes_written, 7);
        assert_eq!(stats.handles_opened, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.open_handles, 1);
    }

    #[test]
    fn drop_flushes_open_handles() {
        let dir = tempdir().unwrap();
        {
            let writer = FanoutWriter::with_options(dir.path(), false, 0).unwrap();
            writer.write("kept", "k").unwrap();
        }
        assert_eq!(fs::read_to_string(dir.path().join("k")).unwrap(), "kept\n");
    }
}
