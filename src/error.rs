//! Error types for TouristID

use thiserror::Error;

/// Faults in the hash chain itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Block index overflow")]
    IndexOverflow,
    #[error("Invalid genesis block: {0}")]
    InvalidGenesis(String),
    #[error("Block {index} hash does not match its contents")]
    HashMismatch { index: usize },
    #[error("Block {index} does not link to its predecessor")]
    BrokenLink { index: usize },
    #[error("Block {index} breaks the index sequence")]
    IndexGap { index: usize },
}

impl ChainError {
    /// Position of the offending block, when the fault is tied to one.
    pub fn index(&self) -> Option<usize> {
        match self {
            ChainError::HashMismatch { index }
            | ChainError::BrokenLink { index }
            | ChainError::IndexGap { index } => Some(*index),
            ChainError::InvalidGenesis(_) => Some(0),
            ChainError::IndexOverflow => None,
        }
    }
}

/// Faults reported by a record store backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Record already exists: {0}")]
    Duplicate(String),
    #[error("Record {id} is {status}, not pending")]
    NotPending { id: String, status: String },
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Store call timed out after {0} ms")]
    Timeout(u64),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Caller-facing errors of the registration pipeline.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Tourist data not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Credential encoding error: {0}")]
    Encoding(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Ledger error: {0}")]
    Ledger(#[from] ChainError),
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => RegistryError::NotFound(id),
            other => RegistryError::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Validation(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, RegistryError>;
