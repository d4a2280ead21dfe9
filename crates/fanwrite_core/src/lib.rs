//! # fanwrite core
//!
//! Fan-out line writer: lines tagged with a destination key are appended to
//! a file named after that key, while at most a configurable number of files
//! are open at once.
//!
//! ## Components
//!
//! - [`HandleCache`] - key to open handle, least-recently-used eviction
//! - [`PartitionResolver`] - picks `<key>` or `<key>.<n>` for new handles
//! - [`FanoutWriter`] - `write(line, key)` / `close()` facade
//! - [`SinkFactory`] - opens files for append, optionally gzip-compressed
//!
//! ## File Layout
//!
//! ```text
//! <dir>/<key>[.<partition>][.gz]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use fanwrite_core::{FanoutWriter, WriterConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let writer = FanoutWriter::open(dir.path(), WriterConfig::new().max_open_files(2)).unwrap();
//!
//! writer.write("first", "places").unwrap();
//! writer.write("second", "roads").unwrap();
//! writer.close().unwrap();
//!
//! let text = std::fs::read_to_string(dir.path().join("places.0")).unwrap();
//! assert_eq!(text, "first\n");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod partition;
mod sink;
mod stats;
mod writer;

pub use cache::{Handle, HandleCache};
pub use config::{Compression, PartitionNumbering, WriterConfig};
pub use error::{CloseErrors, FanoutError, FanoutResult};
pub use partition::{ensure_exists, residual_index, PartitionResolver, ResolvedPath};
pub use sink::{factory_for, GzipFactory, LineSink, PlainFactory, SinkFactory, GZIP_EXTENSION};
pub use stats::{StatsSnapshot, WriterStats};
pub use writer::FanoutWriter;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
