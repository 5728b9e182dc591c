//! MINT Settlement
//!
//! Meters how long an automated task runs, converts the metered work into a
//! token amount, and settles that amount exactly once to a treasury account
//! on a blockchain-style network.
//!
//! # Architecture
//!
//! 1. **Metering**: [`ExecutionTimer`] seals a monotonic duration per execution
//! 2. **Pricing**: [`EarningsCalculator`] quotes `duration × rate × complexity`
//! 3. **Reservation**: [`mint_ledger::SettlementLedger`] durably reserves the
//!    execution before any network call
//! 4. **Submission**: [`TransactionBuilder`] assembles a Solana transaction
//!    (treasury transfer, memo, on-chain job record); [`SettlementClient`]
//!    signs, records every attempt's signature and sends with bounded
//!    retries over [`SolanaRpcNetwork`], then polls for confirmation
//! 5. **Recovery**: [`SettlementCoordinator::reconcile`] resolves settlements a
//!    previous run left in flight
//!
//! # Example
//!
//! ```no_run
//! use mint_settlement::{Config, ExecutionOptions, SettlementCoordinator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mint_settlement::Result<()> {
//!     let config = Config::from_file("mint.toml")?;
//!     let coordinator = Arc::new(SettlementCoordinator::from_config(config).await?);
//!
//!     let (answer, settlement) = coordinator
//!         .run_metered(ExecutionOptions::default().with_job_name("summarize"), async {
//!             42
//!         })
//!         .await;
//!
//!     if let Some(handle) = settlement {
//!         println!("{answer}: {:?}", handle.outcome().await?);
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod client;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod earnings;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod network;
pub mod retry;
pub mod timer;
pub mod transaction;
pub mod types;

pub use client::{FailureKind, SettlementClient, SubmissionFailure, SubmittedTransaction};
pub use config::{Config, ConfirmationConfig, EarningsConfig, ProgramConfig, RetryConfig};
pub use coordinator::{SettlementCoordinator, SettlementHandle};
pub use crypto::{parse_pubkey, Keypair};
pub use earnings::{compute_earnings, to_base_units, EarningsCalculator};
pub use error::{Error, NetworkError, Result};
pub use hooks::{CallbackAdapter, LifecycleHooks};
pub use metrics::SettlementMetrics;
pub use network::{SettlementNetwork, SignatureStatus, SolanaRpcNetwork};
pub use retry::{GiveUpReason, RetryDecision, RetryPolicy};
pub use timer::ExecutionTimer;
pub use transaction::{
    FreshnessToken, JobDescriptor, MintProgram, SettlementDetails, SignedTransaction,
    TransactionBuilder, UnsignedTransaction,
};
pub use types::{
    Complexity, ConfirmationOutcome, ExecutionOptions, ExecutionRecord, ReconciliationReport,
    SettlementOutcome, SettlementPhase, SkipReason,
};

pub use mint_ledger::{ExecutionId, SettlementRecord, SettlementStatus};
pub use solana_sdk::pubkey::Pubkey;
