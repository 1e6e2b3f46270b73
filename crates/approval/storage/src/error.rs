//! Storage error taxonomy shared by every backend.

use thiserror::Error;

/// Errors surfaced by approval storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violated, e.g. a second open instance for one subject.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Compare-and-set lost: someone else saved the instance first.
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    /// Input rejected before touching the backend.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend I/O or connection failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
