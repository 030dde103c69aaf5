//! The crate-wide error enum surfaced across the public Engine API
//! (spec 7). Lower-level modules define their own narrow `thiserror` enums
//! (`crypto::CryptoError`, `crypto::EnvelopeError`, `network::dht::DhtError`,
//! `storage::StorageError`) and convert into this one at the module
//! boundary — the same shape as the teacher's local `StorageError` being
//! the only error type its callers ever see.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("authentication failed: signature did not verify")]
    Auth,

    #[error("no recipient entry in this envelope matched the local identity")]
    NotRecipient,

    #[error("no signed public key record found for recipient")]
    UnknownRecipient,

    #[error("network error: {0}")]
    Network(String),

    #[error("operation exceeded its deadline")]
    Timeout,

    #[error("local storage error: {0}")]
    Storage(String),

    #[error("send queue is full")]
    Busy,

    #[error("engine API called before an identity was loaded")]
    NotInitialized,

    #[error("permission error: {0}")]
    Permission(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<crate::crypto::CryptoError> for EngineError {
    fn from(e: crate::crypto::CryptoError) -> Self {
        EngineError::Crypto(e.to_string())
    }
}

impl From<crate::crypto::EnvelopeError> for EngineError {
    fn from(e: crate::crypto::EnvelopeError) -> Self {
        use crate::crypto::EnvelopeError as E;
        match e {
            E::Auth => EngineError::Auth,
            E::NotRecipient => EngineError::NotRecipient,
            other => EngineError::Crypto(other.to_string()),
        }
    }
}

impl From<crate::network::dht::DhtError> for EngineError {
    fn from(e: crate::network::dht::DhtError) -> Self {
        use crate::network::dht::DhtError as E;
        match e {
            E::Auth => EngineError::Auth,
            E::NotFound => EngineError::UnknownRecipient,
            E::Timeout => EngineError::Timeout,
            E::OwnerConflict => EngineError::AlreadyExists("DHT key already claimed by another publisher".into()),
            other => EngineError::Network(other.to_string()),
        }
    }
}
