//! Split command implementation.
//!
//! Reads `key<delimiter>payload` lines and fans the payloads out to one
//! file per key through [`FanoutWriter`]. With more than one thread, lines
//! are routed to workers by key hash so each key keeps its input order.

use fanwrite_core::{
    Compression, FanoutError, FanoutWriter, PartitionNumbering, StatsSnapshot, WriterConfig,
};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use thiserror::Error;
use tracing::{debug, info};

/// Lines buffered per worker before the reader blocks.
const WORKER_QUEUE: usize = 1024;

/// Errors from splitting an input stream.
#[derive(Debug, Error)]
pub enum SplitError {
    /// An input line has no key delimiter.
    #[error("line {line}: missing delimiter {delimiter:?}")]
    MissingDelimiter {
        /// 1-based input line number.
        line: usize,
        /// Expected delimiter.
        delimiter: char,
    },

    /// Reading input failed.
    #[error("line {line}: read failed: {source}")]
    Read {
        /// 1-based input line number.
        line: usize,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Writing output failed.
    #[error(transparent)]
    Fanout(#[from] FanoutError),

    /// A worker thread panicked.
    #[error("writer thread panicked")]
    WorkerPanicked,
}

/// Options for the split command.
#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Key/payload separator.
    pub delimiter: char,
    /// Open file cap (0 = unbounded).
    pub max_open_files: usize,
    /// Whether to write numbered partitions.
    pub partitioned: bool,
    /// Whether to gzip output.
    pub gzip: bool,
    /// Whether to scan for partition numbers once per key.
    pub scan_once: bool,
    /// Number of writer threads.
    pub threads: usize,
}

impl SplitOptions {
    fn writer_config(&self) -> WriterConfig {
        WriterConfig::new()
            .partitioned(self.partitioned)
            .max_open_files(self.max_open_files)
            .compression(if self.gzip {
                Compression::gzip()
            } else {
                Compression::None
            })
            .partition_numbering(if self.scan_once {
                PartitionNumbering::ScanOnce
            } else {
                PartitionNumbering::ScanEachOpen
            })
    }
}

/// Split result.
#[derive(Debug, Serialize)]
pub struct SplitReport {
    /// Output directory.
    pub dir: String,
    /// Input lines consumed.
    pub input_lines: usize,
    /// Writer counters at close.
    pub stats: StatsSnapshot,
}

/// Runs the split command.
pub fn run(
    dir: &Path,
    input: Option<&Path>,
    options: &SplitOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin().lock()),
    };

    let report = split(dir, reader, options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("Output: {}", report.dir);
            println!("  Input lines: {}", report.input_lines);
            println!("  Lines written: {}", report.stats.lines_written);
            println!("  Bytes written: {}", report.stats.bytes_written);
            println!("  Files opened: {}", report.stats.handles_opened);
            println!("  Evictions: {}", report.stats.evictions);
        }
    }

    Ok(())
}

/// Splits every line of `reader` into files under `dir`.
///
/// The writer is always closed, even when reading or writing fails; the
/// first error wins.
pub fn split(
    dir: &Path,
    reader: impl BufRead,
    options: &SplitOptions,
) -> Result<SplitReport, SplitError> {
    let writer = FanoutWriter::open(dir, options.writer_config())?;
    info!(dir = %dir.display(), threads = options.threads, "splitting input");

    let result = if options.threads > 1 {
        split_parallel(&writer, reader, options.delimiter, options.threads)
    } else {
        split_sequential(&writer, reader, options.delimiter)
    };
    let closed = writer.close();

    let input_lines = result?;
    closed?;

    Ok(SplitReport {
        dir: dir.display().to_string(),
        input_lines,
        stats: writer.stats().snapshot(),
    })
}

fn parse_line(line: &str, number: usize, delimiter: char) -> Result<(&str, &str), SplitError> {
    line.split_once(delimiter)
        .ok_or(SplitError::MissingDelimiter {
            line: number,
            delimiter,
        })
}

fn split_sequential(
    writer: &FanoutWriter,
    reader: impl BufRead,
    delimiter: char,
) -> Result<usize, SplitError> {
    let mut count = 0;
    for (index, line) in reader.lines().enumerate() {
        let number = index + 1;
        let line = line.map_err(|source| SplitError::Read {
            line: number,
            source,
        })?;
        let (key, payload) = parse_line(&line, number, delimiter)?;
        writer.write(payload, key)?;
        count = number;
    }
    Ok(count)
}

fn split_parallel(
    writer: &FanoutWriter,
    reader: impl BufRead,
    delimiter: char,
    threads: usize,
) -> Result<usize, SplitError> {
    thread::scope(|scope| {
        let mut senders = Vec::with_capacity(threads);
        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let (tx, rx) = mpsc::sync_channel::<(String, String)>(WORKER_QUEUE);
            senders.push(tx);
            workers.push(scope.spawn(move || -> Result<(), FanoutError> {
                for (key, payload) in rx {
                    writer.write(&payload, &key)?;
                }
                Ok(())
            }));
        }

        let read_result = (|| -> Result<usize, SplitError> {
            let mut count = 0;
            for (index, line) in reader.lines().enumerate() {
                let number = index + 1;
                let line = line.map_err(|source| SplitError::Read {
                    line: number,
                    source,
                })?;
                let (key, payload) = parse_line(&line, number, delimiter)?;

                let worker = worker_for(key, threads);
                if senders[worker]
                    .send((key.to_owned(), payload.to_owned()))
                    .is_err()
                {
                    // The worker stopped on an error; it is reported on join.
                    debug!(worker, "writer thread exited early");
                    break;
                }
                count = number;
            }
            Ok(count)
        })();
        drop(senders);

        let mut first_error = None;
        for worker in workers {
            let outcome = match worker.join() {
                Ok(result) => result.map_err(SplitError::from),
                Err(_) => Err(SplitError::WorkerPanicked),
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }

        match (read_result, first_error) {
            (Err(e), _) | (Ok(_), Some(e)) => Err(e),
            (Ok(count), None) => Ok(count),
        }
    })
}

fn worker_for(key: &str, threads: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % threads as u64) as usize
}
