//! Error types for execution settlement

use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or unusable key material (fatal at startup)
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// `start` called twice for one execution
    #[error("Execution already tracked: {0}")]
    DuplicateExecution(String),

    /// `stop` called for an execution that was never started (or already stopped)
    #[error("Execution not tracked: {0}")]
    UnknownExecution(String),

    /// Negative or unrepresentable duration
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Zero, negative or out-of-range complexity
    #[error("Invalid complexity: {0}")]
    InvalidComplexity(String),

    /// Signing failed or produced an unverifiable signature
    #[error("Signing error: {0}")]
    Signing(String),

    /// Network boundary error
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] mint_ledger::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Task or channel failure
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Errors reported by the settlement network
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Request timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Could not reach the node
    #[error("Connection error: {0}")]
    Connection(String),

    /// The freshness token expired before the transaction landed
    #[error("Freshness token expired: {0}")]
    ExpiredFreshness(String),

    /// Node is behind, overloaded or otherwise unhealthy
    #[error("Node unavailable: {0}")]
    NodeUnavailable(String),

    /// Payer cannot cover the transaction
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Destination account rejected
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// Signature rejected by the node
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Any other rejection of the transaction
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    /// Unparsable or unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl NetworkError {
    /// Whether another attempt with a fresh token may succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            // Retryable errors
            NetworkError::Timeout(_) => true,
            NetworkError::Connection(_) => true,
            NetworkError::ExpiredFreshness(_) => true,
            NetworkError::NodeUnavailable(_) => true,

            // Non-retryable errors
            NetworkError::InsufficientFunds(_) => false,
            NetworkError::InvalidDestination(_) => false,
            NetworkError::InvalidSignature(_) => false,
            NetworkError::Rejected(_) => false,
            NetworkError::Protocol(_) => false,
        }
    }

    /// Whether the node may have accepted the transaction despite the error
    pub fn may_have_landed(&self) -> bool {
        matches!(self, NetworkError::Timeout(_))
    }
}
