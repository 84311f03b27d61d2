use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias, mirroring the error module's shape in the sibling
/// `arx-core` crate this store grew out of.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure taxonomy for the log-structured document store.
///
/// Four families, matching the design's error taxonomy: I/O failures that
/// name the offending file, on-disk corruption, non-recoverable state
/// violations, and the internal torn-record signal used only during `.idx`
/// recovery (never escapes a successful `preload`).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("state violation: {0}")]
    StateViolation(String),

    /// Raised internally while scanning a `.idx` tail; `FileChunk::open`
    /// catches this and truncates rather than propagating it.
    #[error("torn record at offset {offset}")]
    TornRecord { offset: u64 },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        StoreError::Corruption(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        StoreError::StateViolation(msg.into())
    }
}
