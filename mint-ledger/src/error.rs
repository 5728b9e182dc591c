//! Error types for the settlement ledger

use crate::types::{SettlementRecord, SettlementStatus};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The execution already has a settlement record that cannot be re-claimed.
    /// Carries the existing record so callers can report the recorded outcome.
    #[error("Execution {} already settled (status: {})", .0.execution_id, .0.status)]
    AlreadySettled(Box<SettlementRecord>),

    /// Settlement record not found
    #[error("Settlement not found: {0}")]
    NotFound(String),

    /// Status transition not permitted
    #[error("Invalid transition for {execution_id}: {from} -> {to}")]
    InvalidTransition {
        /// Execution ID
        execution_id: String,
        /// Current status
        from: SettlementStatus,
        /// Requested status
        to: SettlementStatus,
    },

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is the idempotency success path rather than a failure
    pub fn is_already_settled(&self) -> bool {
        matches!(self, Error::AlreadySettled(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
