//! MINT Settlement Ledger
//!
//! Durable idempotency store for execution settlements: one record per
//! execution, moving forward through `pending → submitted → confirmed` or
//! ending in `failed`.
//!
//! # Architecture
//!
//! - **Single Writer**: One actor task serializes all mutations, so claiming an
//!   execution is an atomic check-and-write
//! - **Atomic Batches**: Record and status index are written in one RocksDB batch
//! - **Synced WAL**: Acknowledged writes survive a crash
//!
//! # Invariants
//!
//! - At most one record per execution ID
//! - Terminal records (`confirmed`, `failed`) are never modified
//! - The status index always agrees with the stored record
//! - Attempt signatures are only ever appended

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod error;
pub mod ledger;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::SettlementLedger;
pub use storage::{Storage, StorageStats};
pub use types::{EarningsQuote, ExecutionId, SettlementRecord, SettlementStatus, StatusUpdate};
