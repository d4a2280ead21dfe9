//! Writer configuration.

/// Compression applied to destination files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain text files.
    #[default]
    None,
    /// Gzip members appended to `.gz` files, at the given level (0-9).
    Gzip {
        /// Compression level.
        level: u32,
    },
}

impl Compression {
    /// Gzip at the default level.
    #[must_use]
    pub const fn gzip() -> Self {
        Self::Gzip { level: 6 }
    }
}

/// How partition indices are discovered for newly opened handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionNumbering {
    /// Scan the directory every time a handle is opened.
    #[default]
    ScanEachOpen,
    /// Scan the directory on the first open of a key in this process,
    /// then track the highest index in memory.
    ScanOnce,
}

/// Configuration for opening a [`crate::FanoutWriter`].
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Whether each handle gets its own numbered partition file.
    pub partitioned: bool,

    /// Maximum number of simultaneously open handles (0 = unbounded).
    pub max_open_files: usize,

    /// Compression for destination files.
    pub compression: Compression,

    /// Partition discovery strategy.
    pub partition_numbering: PartitionNumbering,

    /// Size of the write buffer kept per open handle.
    pub buffer_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            partitioned: true,
            max_open_files: 0, // unbounded
            compression: Compression::None,
            partition_numbering: PartitionNumbering::ScanEachOpen,
            buffer_capacity: 8 * 1024, // 8 KiB
        }
    }
}

impl WriterConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether output is split into numbered partitions.
    #[must_use]
    pub const fn partitioned(mut self, value: bool) -> Self {
        self.partitioned = value;
        self
    }

    /// Sets the open handle cap (0 disables the cap).
    #[must_use]
    pub const fn max_open_files(mut self, value: usize) -> Self {
        self.max_open_files = value;
        self
    }

    /// Sets the compression for destination files.
    #[must_use]
    pub const fn compression(mut self, value: Compression) -> Self {
        self.compression = value;
        self
    }

    /// Sets the partition discovery strategy.
    #[must_use]
    pub const fn partition_numbering(mut self, value: PartitionNumbering) -> Self {
        self.partition_numbering = value;
        self
    }

    /// Sets the per-handle write buffer size.
    #[must_use]
    pub const fn buffer_capacity(mut self, value: usize) -> Self {
        self.buffer_capacity = value;
        self
    }
}
