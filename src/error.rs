//! Error types for StarNotary

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Block not found at height {0}")]
    BlockNotFound(i64),
    #[error("Integrity error: {0}")]
    IntegrityError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("No validation request found for address {0}")]
    NoChallenge(String),
    #[error("Validation window expired for address {0}; request validation again")]
    ChallengeExpired(String),
    #[error("Address {0} has not been validated with a signature")]
    NotAuthorized(String),
    #[error("Validation request for address {0} was already used to register a star")]
    AlreadyConsumed(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::StorageError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
