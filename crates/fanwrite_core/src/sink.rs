//! Line sinks: the open-for-append capability behind every handle.
//!
//! A [`SinkFactory`] turns a path into a [`LineSink`]. Sinks are **opaque
//! line appenders** - they know nothing about keys, partitions or eviction.
//!
//! ## Available Factories
//!
//! - [`PlainFactory`] - buffered plain-text files
//! - [`GzipFactory`] - gzip files, resumed by appending a new gzip member
//!
//! Appending a fresh member to an existing `.gz` file produces a valid
//! multi-member gzip stream, so a file reopened after a restart decodes as
//! the concatenation of everything written to it (use
//! `flate2::read::MultiGzDecoder` to read it back).

use crate::config::Compression;
use flate2::write::GzEncoder;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::error;

/// File extension used for gzip output.
pub const GZIP_EXTENSION: &str = "gz";

/// An open, appendable destination for text lines.
///
/// # Invariants
///
/// - `write_line` appends the line followed by `\n`; on error the file is
///   left exactly as it was before the call
/// - a sink that returned an error is finished and never written again
/// - `flush` pushes buffered bytes to the OS
/// - `finish` flushes and closes; the sink is consumed and never reused
pub trait LineSink: Send {
    /// Appends `line` plus a line terminator.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Flushes buffered data to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> io::Result<()>;

    /// Flushes and closes the sink, completing any compressed stream.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or finalizing fails.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// Opens paths for append, returning a sink that resumes the existing file.
///
/// The returned sink must be correct whether the target does not exist
/// (create) or holds output previously written by the same factory.
pub trait SinkFactory: Send + Sync {
    /// File extension (without the dot) appended to every path, if any.
    fn extension(&self) -> Option<&str>;

    /// Opens `path` for append.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    fn open_append(&self, path: &Path) -> io::Result<Box<dyn LineSink>>;
}

/// Returns the factory for a compression setting.
#[must_use]
pub fn factory_for(compression: Compression, buffer_capacity: usize) -> Arc<dyn SinkFactory> {
    match compression {
        Compression::None => Arc::new(PlainFactory::new(buffer_capacity)),
        Compression::Gzip { level } => Arc::new(GzipFactory::new(level, buffer_capacity)),
    }
}

fn open_append_file(path: &Path) -> io::Result<AppendFile> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok(AppendFile::new(file, len))
}

/// Storage that can be cut back to a previous length.
trait Truncate: Write {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Buffered append-only file that never leaves a torn write on disk.
///
/// Bytes collect in `pending` until [`drain`](Self::drain) writes them in
/// one go. If that write fails the file is cut back to `committed`, the
/// length it had after the last successful drain, and `pending` is kept.
struct AppendFile<S: Truncate = File> {
    storage: S,
    pending: Vec<u8>,
    committed: u64,
}

impl<S: Truncate> AppendFile<S> {
    fn new(storage: S, committed: u64) -> Self {
        Self {
            storage,
            pending: Vec::new(),
            committed,
        }
    }

    fn drain(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.storage.write_all(&self.pending) {
            if let Err(cut) = self.storage.truncate(self.committed) {
                error!(error = %cut, "failed to roll back partial write");
            }
            return Err(e);
        }
        self.committed += self.pending.len() as u64;
        self.pending.clear();
        self.storage.flush()
    }
}

// The encoder writes here; only `drain` touches storage.
impl<S: Truncate> Write for AppendFile<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Factory for buffered plain-text files.
#[derive(Debug, Clone)]
pub struct PlainFactory {
    buffer_capacity: usize,
}

impl PlainFactory {
    /// Creates a factory whose sinks buffer up to `buffer_capacity` bytes.
    #[must_use]
    pub fn new(buffer_capacity: usize) -> Self {
        Self { buffer_capacity }
    }
}

impl SinkFactory for PlainFactory {
    fn extension(&self) -> Option<&str> {
        None
    }

    fn open_append(&self, path: &Path) -> io::Result<Box<dyn LineSink>> {
        Ok(Box::new(PlainSink {
            out: open_append_file(path)?,
            buffer_capacity: self.buffer_capacity,
        }))
    }
}

struct PlainSink<S: Truncate = File> {
    out: AppendFile<S>,
    buffer_capacity: usize,
}

impl<S: Truncate + Send> LineSink for PlainSink<S> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mark = self.out.pending.len();
        self.out.pending.extend_from_slice(line.as_bytes());
        self.out.pending.push(b'\n');
        if self.out.pending.len() >= self.buffer_capacity {
            if let Err(e) = self.out.drain() {
                self.out.pending.truncate(mark);
                return Err(e);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.drain()
    }

    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.out.drain()
    }
}

/// Factory for gzip files.
#[derive(Debug, Clone)]
pub struct GzipFactory {
    level: flate2::Compression,
    buffer_capacity: usize,
}

impl GzipFactory {
    /// Creates a factory compressing at `level` (clamped to 0-9).
    #[must_use]
    pub fn new(level: u32, buffer_capacity: usize) -> Self {
        Self {
            level: flate2::Compression::new(level.min(9)),
            buffer_capacity,
        }
    }
}

impl SinkFactory for GzipFactory {
    fn extension(&self) -> Option<&str> {
        Some(GZIP_EXTENSION)
    }

    fn open_append(&self, path: &Path) -> io::Result<Box<dyn LineSink>> {
        Ok(Box::new(GzipSink {
            encoder: GzEncoder::new(open_append_file(path)?, self.level),
            buffer_capacity: self.buffer_capacity,
        }))
    }
}

struct GzipSink<S: Truncate = File> {
    encoder: GzEncoder<AppendFile<S>>,
    buffer_capacity: usize,
}

impl<S: Truncate + Send> LineSink for GzipSink<S> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        // Compressed bytes cannot be taken back, so drain before encoding.
        if self.encoder.get_ref().pending.len() >= self.buffer_capacity {
            self.encoder.get_mut().drain()?;
        }
        self.encoder.write_all(line.as_bytes())?;
        self.encoder.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()?;
        self.encoder.get_mut().drain()
    }

    fn finish(self: Box<Self>) -> io::Result<()> {
        // Writes the member trailer; the next open starts a new member.
        let mut out = self.encoder.finish()?;
        out.drain()
    }
}
