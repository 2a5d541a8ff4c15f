//! Error types for the cart store.

use crate::types::Revision;
use thiserror::Error;

/// Main error type for cart and storage operations.
#[derive(Debug, Error)]
pub enum CartError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage is locked by another process")]
    Locked,

    #[error("Storage not initialized")]
    NotInitialized,

    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Key mismatch: expected {expected:?}, found {found:?}")]
    KeyMismatch { expected: String, found: String },

    #[error("Failed to persist cart at {revision:?} after {attempts} attempt(s): {message}")]
    PersistFailed {
        revision: Revision,
        attempts: u32,
        message: String,
    },
}

impl From<serde_json::Error> for CartError {
    fn from(e: serde_json::Error) -> Self {
        CartError::Serialization(e.to_string())
    }
}

/// Result type for cart operations.
pub type Result<T> = std::result::Result<T, CartError>;
