//! Error types for the board engine.

use crate::types::{AssetId, BatchToken, EntityId};
use thiserror::Error;

/// Main error type for board operations.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Asset store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Asset store quota exceeded: need {needed} bytes, limit is {limit}")]
    QuotaExceeded { needed: u64, limit: u64 },

    #[error("Asset missing: {0}")]
    AssetMissing(AssetId),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Unknown batch: {0}")]
    UnknownBatch(BatchToken),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Digest mismatch: expected {expected}, got {got}")]
    DigestMismatch { expected: String, got: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedSnapshotVersion(u32),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl BoardError {
    /// Whether this error means the persistent store could not do its job.
    ///
    /// Callers treat these as "changes live only in memory": the scene and
    /// history stay valid and the operation can be retried later.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            BoardError::Io(_)
                | BoardError::StoreUnavailable(_)
                | BoardError::QuotaExceeded { .. }
                | BoardError::InvalidFormat(_)
                | BoardError::ChecksumMismatch { .. }
                | BoardError::DigestMismatch { .. }
                | BoardError::Locked
                | BoardError::NotInitialized
        )
    }
}

impl From<serde_json::Error> for BoardError {
    fn from(e: serde_json::Error) -> Self {
        BoardError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for BoardError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BoardError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BoardError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BoardError::Deserialization(e.to_string())
    }
}

/// Result type for board operations.
pub type Result<T> = std::result::Result<T, BoardError>;
