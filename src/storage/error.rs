//! Storage-local error type. Converts into [`crate::error::EngineError`] at
//! the engine boundary, the same layering the crate's other modules use.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("path rejected by validation: {0}")]
    Permission(String),

    #[error("no such record")]
    NotFound,

    #[error("store is degraded after a write-then-verify mismatch and refuses further writes until restart")]
    Degraded,
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for crate::error::EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Permission(s) => crate::error::EngineError::Permission(s),
            other => crate::error::EngineError::Storage(other.to_string()),
        }
    }
}
