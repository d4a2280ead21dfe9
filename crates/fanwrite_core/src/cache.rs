//! Bounded cache of open output handles.
//!
//! The cache maps each key to at most one open [`Handle`]. When a capacity
//! is set, inserting past it evicts the least-recently-used handle, which is
//! flushed and closed before the insert returns.
//!
//! # Locking
//!
//! - `entries`: held for O(1) lookups (which also refresh recency), for
//!   inserts, for eviction and for drain. Never held while opening a file.
//! - `creation_locks`: sharded by key hash. Held while resolving a path and
//!   opening the file, so only one thread opens a given key at a time.
//! - each handle's own mutex: held for a single line append.
//!
//! Lock order is `creation_locks` -> `entries` -> handle. A writer holding a
//! handle lock never takes `entries`.

use crate::error::{CloseErrors, FanoutError, FanoutResult};
use crate::partition::{ensure_exists, PartitionResolver};
use crate::sink::{LineSink, SinkFactory};
use crate::stats::WriterStats;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Number of shards for handle creation locks.
const CREATION_SHARDS: usize = 64;

/// One open destination file, bound to a single path.
///
/// Once retired (evicted or drained) the sink is gone and the handle rejects
/// further appends.
pub struct Handle {
    key: String,
    path: PathBuf,
    partition: Option<u64>,
    sink: Mutex<Option<Box<dyn LineSink>>>,
}

impl Handle {
    fn new(key: &str, path: PathBuf, partition: Option<u64>, sink: Box<dyn LineSink>) -> Self {
        Self {
            key: key.to_owned(),
            path,
            partition,
            sink: Mutex::new(Some(sink)),
        }
    }

    /// Returns the key this handle writes for.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the partition index, if partitioning is enabled.
    #[must_use]
    pub fn partition(&self) -> Option<u64> {
        self.partition
    }

    /// Returns true until the handle is evicted or drained.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Appends a line under the handle lock.
    ///
    /// Returns `Ok(false)` if the handle was retired before the lock was taken.
    pub(crate) fn append(&self, line: &str) -> FanoutResult<bool> {
        let mut sink = self.sink.lock();
        match sink.as_mut() {
            Some(sink) => {
                sink.write_line(line)
                    .map_err(|e| FanoutError::write(&self.key, e))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self.sink.lock().as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }

    /// Takes the sink out and finishes it. Returns `None` if already retired.
    fn retire(&self) -> Option<io::Result<()>> {
        let sink = self.sink.lock().take()?;
        Some(sink.finish())
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("key", &self.key)
            .field("path", &self.path)
            .field("partition", &self.partition)
            .field("open", &self.is_open())
            .finish()
    }
}

struct Entries {
    map: LruCache<String, Arc<Handle>>,
    closed: bool,
}

/// Maps keys to open handles, bounded by a capacity (0 = unbounded).
pub struct HandleCache {
    entries: Mutex<Entries>,
    creation_locks: Box<[Mutex<()>]>,
    resolver: PartitionResolver,
    factory: Arc<dyn SinkFactory>,
    stats: Arc<WriterStats>,
    capacity: usize,
    /// Close failures from evicted or discarded handles, reported by the
    /// next drain.
    eviction_failures: Mutex<CloseErrors>,
}

impl HandleCache {
    /// Creates a cache that opens handles through `factory`.
    pub fn new(
        capacity: usize,
        resolver: PartitionResolver,
        factory: Arc<dyn SinkFactory>,
        stats: Arc<WriterStats>,
    ) -> Self {
        let map = match NonZeroUsize::new(capacity) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        Self {
            entries: Mutex::new(Entries { map, closed: false }),
            creation_locks: (0..CREATION_SHARDS).map(|_| Mutex::new(())).collect(),
            resolver,
            factory,
            stats,
            capacity,
            eviction_failures: Mutex::new(CloseErrors::new()),
        }
    }

    /// Returns the configured capacity (0 = unbounded).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of open handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    /// Returns true if no handles are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` currently has an open handle, without
    /// refreshing its recency.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().map.contains(key)
    }

    /// Returns the open handle for `key`, opening one if absent.
    ///
    /// At most one handle is opened per key between evictions, even under
    /// concurrent calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is closed or the file cannot be
    /// resolved or opened. No entry is left behind on failure.
    pub fn acquire(&self, key: &str) -> FanoutResult<Arc<Handle>> {
        if let Some(handle) = self.lookup(key)? {
            return Ok(handle);
        }

        let _creating = self.creation_lock(key).lock();
        if let Some(handle) = self.lookup(key)? {
            return Ok(handle);
        }

        let resolved = self.resolver.resolve(key)?;
        let sink = self
            .factory
            .open_append(&resolved.path)
            .map_err(|e| FanoutError::open(&resolved.path, e))?;
        ensure_exists(&resolved.path).map_err(|e| FanoutError::open(&resolved.path, e))?;

        debug!(
            key,
            path = %resolved.path.display(),
            partition = ?resolved.partition,
            "opened handle"
        );
        self.stats.record_open();

        let handle = Arc::new(Handle::new(key, resolved.path, resolved.partition, sink));
        self.insert(key, Arc::clone(&handle))?;
        Ok(handle)
    }

    /// Appends `line` to the handle for `key`.
    ///
    /// If the handle is evicted between lookup and append, the line goes to
    /// a freshly opened handle instead. A handle whose append fails is
    /// removed and closed, so the next write for `key` opens a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be acquired or the append fails.
    pub fn write(&self, key: &str, line: &str) -> FanoutResult<()> {
        loop {
            let handle = self.acquire(key)?;
            match handle.append(line) {
                Ok(true) => {
                    self.stats.record_line(line.len() as u64 + 1);
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    self.discard(&handle);
                    return Err(e);
                }
            }
        }
    }

    /// Flushes every open handle without closing it.
    ///
    /// # Errors
    ///
    /// Returns every flush failure, after attempting all handles.
    pub fn flush_all(&self) -> FanoutResult<()> {
        let handles: Vec<Arc<Handle>> = {
            let entries = self.entries.lock();
            entries.map.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        let mut errors = CloseErrors::new();
        for handle in handles {
            if let Err(e) = handle.flush() {
                errors.push(handle.key(), e);
            }
        }
        errors.into_result()
    }

    /// Flushes and closes every handle and rejects further use.
    ///
    /// Calling this again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns every close failure from this drain and from earlier
    /// evictions, after attempting all handles.
    pub fn drain_all(&self) -> FanoutResult<()> {
        let mut entries = self.entries.lock();
        if entries.closed {
            return Ok(());
        }
        entries.closed = true;

        let mut errors = std::mem::take(&mut *self.eviction_failures.lock());
        while let Some((key, handle)) = entries.map.pop_lru() {
            if let Some(Err(e)) = self.close_handle(&handle) {
                errors.push(key, e);
            }
        }
        errors.into_result()
    }

    fn lookup(&self, key: &str) -> FanoutResult<Option<Arc<Handle>>> {
        let mut entries = self.entries.lock();
        if entries.closed {
            return Err(FanoutError::Closed);
        }
        Ok(entries.map.get(key).cloned())
    }

    fn insert(&self, key: &str, handle: Arc<Handle>) -> FanoutResult<()> {
        let mut entries = self.entries.lock();
        if entries.closed {
            if let Some(Err(e)) = self.close_handle(&handle) {
                error!(key, error = %e, "failed to close handle opened during shutdown");
            }
            return Err(FanoutError::Closed);
        }

        if let Some((evicted_key, evicted)) = entries.map.push(key.to_owned(), handle) {
            self.stats.record_eviction();
            debug!(
                key = %evicted_key,
                open = entries.map.len(),
                "evicting handle"
            );
            if let Some(Err(e)) = self.close_handle(&evicted) {
                error!(key = %evicted_key, error = %e, "failed to close evicted handle");
                self.eviction_failures.lock().push(evicted_key, e);
            }
        }
        Ok(())
    }

    /// Drops a failed handle from the map and closes it.
    fn discard(&self, handle: &Arc<Handle>) {
        let mut entries = self.entries.lock();
        if entries
            .map
            .peek(handle.key())
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            entries.map.pop(handle.key());
        }
        warn!(key = handle.key(), "discarding handle after failed write");

        if let Some(Err(e)) = self.close_handle(handle) {
            error!(key = handle.key(), error = %e, "failed to close discarded handle");
            self.eviction_failures.lock().push(handle.key(), e);
        }
    }

    fn close_handle(&self, handle: &Handle) -> Option<io::Result<()>> {
        let result = handle.retire()?;
        self.stats.record_close();
        if result.is_err() {
            self.stats.record_close_failure();
        }
        Some(result)
    }

    fn creation_lock(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.creation_locks[hasher.finish() as usize % self.creation_locks.len()]
    }
}

impl std::fmt::Debug for HandleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleCache")
            .field("capacity", &self.capacity)
            .field("open", &self.len())
            .field("dir", &self.resolver.dir())
            .finish()
    }
}
