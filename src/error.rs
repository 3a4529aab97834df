//! Error taxonomy for the memory core.
//!
//! Validation and integrity failures reject the write before anything is
//! persisted. Embedding-provider outages are not represented here at all:
//! they degrade retrieval to lexical scoring instead of failing the caller.

use thiserror::Error;

/// Errors that can occur during core operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("INVALID_CANONICAL_PATH: {canonical_path:?} is not under {domain:?}/")]
    InvalidCanonicalPath {
        domain: String,
        canonical_path: String,
    },

    #[error("INVALID_METADATA: {0}")]
    InvalidMetadata(String),

    #[error("HASH_MISMATCH: claimed {claimed}, computed {computed}")]
    HashMismatch { claimed: String, computed: String },

    #[error("SIGNATURE_INVALID: {0}")]
    SignatureInvalid(String),

    #[error("SOURCE_NOT_FOUND: no live document at {canonical_path}")]
    SourceNotFound { canonical_path: String },

    #[error("event not found: {0}")]
    EventNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timestamp parse error: {0}")]
    TimestampParse(#[from] chrono::ParseError),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
