//! Configuration structs, one per tunable knob the store exposes. Plain
//! data, `Default` impls carry sensible defaults; nothing here does I/O.

/// Compression codec recorded in a chunk frame's `compressionType` byte.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompressionType {
    None = 0,
    Lz4 = 1,
    Zstd = 2,
}

impl CompressionType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lz4),
            2 => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

/// Compression policy applied when packing a chunk: which codec to try and
/// at what level, plus the minimum fraction of space it must save to be kept
/// over storing the bytes uncompressed.
#[derive(Clone, Copy, Debug)]
pub struct CompressionConfig {
    pub codec: CompressionType,
    pub level: i32,
    /// Compression is discarded in favor of `None` unless it saves at least
    /// this fraction of the uncompressed size.
    pub min_gain: f32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: CompressionType::Zstd,
            level: 3,
            min_gain: 0.05,
        }
    }
}

impl CompressionConfig {
    pub fn none() -> Self {
        Self {
            codec: CompressionType::None,
            level: 0,
            min_gain: 0.0,
        }
    }
}

/// Per-segment file behavior: compression used when packing chunks, and the
/// target chunk size before a new in-memory `Chunk` is rotated in.
#[derive(Clone, Copy, Debug)]
pub struct FileChunkConfig {
    pub compression: CompressionConfig,
    pub max_chunk_bytes: usize,
}

impl Default for FileChunkConfig {
    fn default() -> Self {
        Self {
            compression: CompressionConfig::default(),
            max_chunk_bytes: 64 * 1024,
        }
    }
}

/// How random reads and writes touch the underlying files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RandReadKind {
    DirectIo,
    Mmap,
    Normal,
}

#[derive(Clone, Copy, Debug)]
pub struct TuneConfig {
    pub rand_read: RandReadKind,
    pub sync_writes: bool,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            rand_read: RandReadKind::Normal,
            sync_writes: true,
        }
    }
}

/// Top-level `LogDataStore` configuration.
#[derive(Clone, Copy, Debug)]
pub struct LogDataStoreConfig {
    pub max_file_size: u64,
    pub max_num_lids: u32,
    pub max_bucket_spread: f64,
    pub min_file_size_factor: f64,
    /// Minimum dead/total byte ratio a segment must reach before
    /// `compact_bloat` bothers rewriting it.
    pub compact_bloat_factor: f64,
    pub compact_compression: CompressionConfig,
    pub file_config: FileChunkConfig,
    pub tune: TuneConfig,
}

impl Default for LogDataStoreConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1_000_000_000,
            max_num_lids: 1 << 25,
            max_bucket_spread: 2.5,
            min_file_size_factor: 0.2,
            compact_bloat_factor: 0.25,
            compact_compression: CompressionConfig::default(),
            file_config: FileChunkConfig::default(),
            tune: TuneConfig::default(),
        }
    }
}

/// Cache population strategy applied by `DocumentStore::write`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Write-through; invalidate the LID in both caches.
    Invalidate,
    /// Replace the point-read cache entry in place if present, otherwise
    /// leave the cache untouched.
    Update,
}

#[derive(Clone, Copy, Debug)]
pub struct DocumentStoreConfig {
    pub compression: CompressionConfig,
    pub max_cache_bytes: usize,
    pub initial_cache_entries: usize,
    pub allow_visit_caching: bool,
    pub update_strategy: UpdateStrategy,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            compression: CompressionConfig::default(),
            max_cache_bytes: 64 * 1024 * 1024,
            initial_cache_entries: 1024,
            allow_visit_caching: true,
            update_strategy: UpdateStrategy::Invalidate,
        }
    }
}
