//! Error types for the node kernel

use thiserror::Error;

use crate::types::BucketId;

/// Result type alias for kernel operations
pub type Result<T> = std::result::Result<T, MetabaseError>;

/// Kernel error types
#[derive(Error, Debug)]
pub enum MetabaseError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation attempted before Initialize
    #[error("database is not open")]
    NotOpen,

    /// Initialize called on an already-open database
    #[error("database is already open")]
    AlreadyOpen,

    /// Chunk file is structurally invalid
    #[error("corrupted chunk: {0}")]
    CorruptedChunk(String),

    /// Serialized input cannot be decoded
    #[error("corrupted input: {0}")]
    CorruptedInput(String),

    /// Checksum mismatch
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// A record exceeds the chunk format's 32-bit length field
    #[error("record too large: {size} bytes")]
    RecordTooLarge { size: u64 },

    /// Flush failed on a bucket; it and later buckets remain buffered
    #[error("flush failed on bucket {bucket}: {source}")]
    FlushFailed {
        bucket: BucketId,
        #[source]
        source: Box<MetabaseError>,
    },

    /// Another process holds the directory lock
    #[error("directory is locked by another process: {}", .0.display())]
    LockContended(std::path::PathBuf),

    /// A module failed during container initialization
    #[error("module '{name}' failed to initialize: {source}")]
    ModuleInitFailed {
        name: String,
        #[source]
        source: Box<MetabaseError>,
    },

    /// A module failed during container run
    #[error("module '{name}' failed to run: {source}")]
    ModuleRunFailed {
        name: String,
        #[source]
        source: Box<MetabaseError>,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl MetabaseError {
    /// Check if error indicates on-disk or in-flight data corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            MetabaseError::CorruptedChunk(_)
                | MetabaseError::CorruptedInput(_)
                | MetabaseError::ChecksumMismatch { .. }
        )
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MetabaseError::Io(_) | MetabaseError::FlushFailed { .. }
        )
    }
}
