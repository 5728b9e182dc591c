//! Network boundary
//!
//! [`SettlementNetwork`] is the only thing the settlement path knows about the
//! chain. [`SolanaRpcNetwork`] implements it with the Solana RPC client.

use crate::error::NetworkError;
use crate::transaction::{FreshnessToken, SignedTransaction};
use async_trait::async_trait;
use reqwest::Url;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::RpcError;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::signature::Signature;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Network result type
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Status of a submitted transaction as reported by the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Reached the confirmation commitment
    Confirmed,
    /// Landed with an error
    Failed(String),
    /// Seen, not yet confirmed
    Pending,
    /// Not known to the node
    Unknown,
}

/// Operations the settlement path needs from a ledger network
#[async_trait]
pub trait SettlementNetwork: Send + Sync {
    /// Latest freshness token (recent blockhash)
    async fn latest_freshness(&self) -> NetworkResult<FreshnessToken>;

    /// Submit a signed transaction; returns its signature
    async fn send_transaction(&self, transaction: &SignedTransaction) -> NetworkResult<String>;

    /// Query one signature
    async fn signature_status(&self, signature: &str) -> NetworkResult<SignatureStatus>;
}

/// Settlement network backed by a Solana RPC node
pub struct SolanaRpcNetwork {
    client: RpcClient,
    commitment: CommitmentConfig,
}

impl fmt::Debug for SolanaRpcNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaRpcNetwork")
            .field("url", &self.client.url())
            .field("commitment", &self.commitment)
            .finish()
    }
}

impl SolanaRpcNetwork {
    /// Create a client for `endpoint` with a per-request timeout.
    /// Statuses count as confirmed at `confirmed` commitment or higher.
    pub fn new(endpoint: &str, request_timeout: Duration) -> crate::Result<Self> {
        Url::parse(endpoint).map_err(|e| {
            crate::Error::Configuration(format!("Invalid RPC endpoint {:?}: {}", endpoint, e))
        })?;

        let commitment = CommitmentConfig::confirmed();
        Ok(Self {
            client: RpcClient::new_with_timeout_and_commitment(
                endpoint.to_string(),
                request_timeout,
                commitment,
            ),
            commitment,
        })
    }

    /// Endpoint URL
    pub fn url(&self) -> String {
        self.client.url()
    }
}

#[async_trait]
impl SettlementNetwork for SolanaRpcNetwork {
    async fn latest_freshness(&self) -> NetworkResult<FreshnessToken> {
        self.client
            .get_latest_blockhash()
            .await
            .map(FreshnessToken::new)
            .map_err(classify_client_error)
    }

    async fn send_transaction(&self, transaction: &SignedTransaction) -> NetworkResult<String> {
        self.client
            .send_transaction(&transaction.transaction)
            .await
            .map(|signature| signature.to_string())
            .map_err(classify_client_error)
    }

    async fn signature_status(&self, signature: &str) -> NetworkResult<SignatureStatus> {
        let parsed = Signature::from_str(signature).map_err(|e| {
            NetworkError::Protocol(format!("Invalid signature {:?}: {}", signature, e))
        })?;

        let response = self
            .client
            .get_signature_statuses_with_history(&[parsed])
            .await
            .map_err(classify_client_error)?;

        let status = match response.value.into_iter().next().flatten() {
            None => SignatureStatus::Unknown,
            Some(status) => match &status.err {
                Some(err) => SignatureStatus::Failed(err.to_string()),
                None if status.satisfies_commitment(self.commitment) => SignatureStatus::Confirmed,
                None => SignatureStatus::Pending,
            },
        };

        Ok(status)
    }
}

/// Map an RPC client error to a network error kind
pub fn classify_client_error(err: ClientError) -> NetworkError {
    match err.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError { code, message, .. }) => {
            classify_rpc_error(*code, message)
        }
        ClientErrorKind::RpcError(RpcError::RpcRequestError(message)) => {
            NetworkError::Connection(message.clone())
        }
        ClientErrorKind::RpcError(other) => NetworkError::Protocol(other.to_string()),
        ClientErrorKind::Reqwest(e) => {
            if e.is_timeout() {
                NetworkError::Timeout(e.to_string())
            } else if let Some(status) = e.status() {
                if status.as_u16() == 429 || status.is_server_error() {
                    NetworkError::NodeUnavailable(format!("HTTP {}", status))
                } else {
                    NetworkError::Protocol(format!("HTTP {}", status))
                }
            } else if e.is_decode() {
                NetworkError::Protocol(e.to_string())
            } else {
                NetworkError::Connection(e.to_string())
            }
        }
        ClientErrorKind::Io(e) => NetworkError::Connection(e.to_string()),
        ClientErrorKind::TransactionError(e) => classify_rpc_error(0, &e.to_string()),
        _ => NetworkError::Protocol(err.to_string()),
    }
}

/// Map a JSON-RPC error to a network error kind
pub fn classify_rpc_error(code: i64, message: &str) -> NetworkError {
    let lower = message.to_ascii_lowercase();
    let message = message.to_string();

    if lower.contains("blockhash not found") || lower.contains("block height exceeded") {
        return NetworkError::ExpiredFreshness(message);
    }
    if lower.contains("insufficient funds") || lower.contains("insufficient lamports") {
        return NetworkError::InsufficientFunds(message);
    }
    if lower.contains("invalid account") || lower.contains("account not found") {
        return NetworkError::InvalidDestination(message);
    }

    match code {
        // Signature verification failure
        -32003 => NetworkError::InvalidSignature(message),
        // Node unhealthy, behind, or slot unavailable
        -32004 | -32005 | -32007 | -32009 | -32014 | -32016 => {
            NetworkError::NodeUnavailable(message)
        }
        -32603 => NetworkError::NodeUnavailable(message),
        -32700 | -32600 | -32601 => NetworkError::Protocol(message),
        _ => NetworkError::Rejected(message),
    }
}
