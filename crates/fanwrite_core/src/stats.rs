//! Writer statistics.
//!
//! Counters are the observability hook for the handle cache: evictions and
//! close failures are counted here instead of being printed.
//!
//! # Usage
//!
//! ```rust,ignore
//! let writer = FanoutWriter::open(dir, WriterConfig::new().max_open_files(64))?;
//! writer.write("...", "places")?;
//!
//! let stats = writer.stats().snapshot();
//! println!("evictions: {}", stats.evictions);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Writer statistics.
///
/// All counters are atomic and can be read while writes are in progress.
/// Values are monotonically increasing except `open_handles`, which is a gauge.
#[derive(Debug, Default)]
pub struct WriterStats {
    /// Lines appended.
    lines_written: AtomicU64,
    /// Bytes appended, including line terminators (before compression).
    bytes_written: AtomicU64,
    /// Handles opened.
    handles_opened: AtomicU64,
    /// Handles closed because of capacity pressure.
    evictions: AtomicU64,
    /// Handles that failed to flush or close.
    close_failures: AtomicU64,
    /// Handles currently open.
    open_handles: AtomicU64,
}

impl WriterStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_line(&self, bytes: u64) {
        self.lines_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_open(&self) {
        self.handles_opened.fetch_add(1, Ordering::Relaxed);
        self.open_handles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close(&self) {
        self.open_handles.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close_failure(&self) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of lines appended.
    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    /// Returns the number of bytes appended.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the number of handles opened.
    pub fn handles_opened(&self) -> u64 {
        self.handles_opened.load(Ordering::Relaxed)
    }

    /// Returns the number of evictions.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Returns the number of handles that failed to close cleanly.
    pub fn close_failures(&self) -> u64 {
        self.close_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of handles currently open.
    pub fn open_handles(&self) -> u64 {
        self.open_handles.load(Ordering::Relaxed)
    }

    /// Captures a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_written: self.lines_written(),
            bytes_written: self.bytes_written(),
            handles_opened: self.handles_opened(),
            evictions: self.evictions(),
            close_failures: self.close_failures(),
            open_handles: self.open_handles(),
        }
    }
}

/// A point-in-time copy of [`WriterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Lines appended.
    pub lines_written: u64,
    /// Bytes appended.
    pub bytes_written: u64,
    /// Handles opened.
    pub handles_opened: u64,
    /// Evictions.
    pub evictions: u64,
    /// Close failures.
    pub close_failures: u64,
    /// Handles open when the snapshot was taken.
    pub open_handles: u64,
}
