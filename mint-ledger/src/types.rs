//! Core types for the settlement ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for token amounts)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of one metered execution (agent run, chain invocation)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Create new execution ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, time-ordered execution ID (UUIDv7)
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key bytes used by storage
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// First `n` characters, used for default job labels
    pub fn short(&self, n: usize) -> &str {
        match self.0.char_indices().nth(n) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ExecutionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Uuid> for ExecutionId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

/// Earnings derived from one sealed execution. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsQuote {
    /// Execution this quote belongs to
    pub execution_id: ExecutionId,

    /// Optional human label
    pub job_name: Option<String>,

    /// Metered duration in whole seconds
    pub duration_secs: u64,

    /// Complexity multiplier (1.0 = unscaled)
    pub complexity: Decimal,

    /// Base rate used (tokens per second)
    pub base_rate_per_second: Decimal,

    /// Token amount, rounded to the minimum denomination
    pub amount: Decimal,

    /// Amount in the ledger's smallest transferable unit
    pub base_units: u64,
}

/// Settlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SettlementStatus {
    /// Reserved, nothing submitted yet
    Pending = 1,
    /// Submitted to the network, awaiting confirmation
    Submitted = 2,
    /// Confirmed by the network (terminal)
    Confirmed = 3,
    /// Failed (terminal)
    Failed = 4,
}

impl SettlementStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [SettlementStatus; 4] = [
        SettlementStatus::Pending,
        SettlementStatus::Submitted,
        SettlementStatus::Confirmed,
        SettlementStatus::Failed,
    ];

    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementStatus::Confirmed | SettlementStatus::Failed)
    }

    /// Whether `next` is a legal forward transition from `self`
    pub fn can_advance_to(&self, next: SettlementStatus) -> bool {
        use SettlementStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted) | (Submitted, Confirmed) | (Pending, Failed) | (Submitted, Failed)
        )
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Submitted => "submitted",
            SettlementStatus::Confirmed => "confirmed",
            SettlementStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted settlement outcome for one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Execution ID (primary key)
    pub execution_id: ExecutionId,

    /// Current status
    pub status: SettlementStatus,

    /// Token amount
    pub amount: Decimal,

    /// Amount in base units
    pub base_units: u64,

    /// Metered duration in whole seconds
    pub duration_secs: u64,

    /// Complexity multiplier
    pub complexity: Decimal,

    /// Optional job label
    pub job_name: Option<String>,

    /// Signature of the attempt that landed, else of the most recent attempt
    pub transaction_signature: Option<String>,

    /// Signature of every signed attempt, oldest first
    pub attempt_signatures: Vec<String>,

    /// Number of submission attempts made
    pub attempt_count: u32,

    /// Last error observed
    pub last_error: Option<String>,

    /// Ledger instance holding the reservation
    pub reserved_by: Uuid,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl SettlementRecord {
    /// New pending record for a quote
    pub fn pending(quote: &EarningsQuote, reserved_by: Uuid) -> Self {
        let now = Utc::now();
        Self {
            execution_id: quote.execution_id.clone(),
            status: SettlementStatus::Pending,
            amount: quote.amount,
            base_units: quote.base_units,
            duration_secs: quote.duration_secs,
            complexity: quote.complexity,
            job_name: quote.job_name.clone(),
            transaction_signature: None,
            attempt_signatures: Vec::new(),
            attempt_count: 0,
            last_error: None,
            reserved_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if record is in terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A pending reservation left behind by another ledger instance that never
    /// signed anything. Nothing can have reached the network for it.
    pub fn is_abandoned_reservation(&self, instance_id: Uuid) -> bool {
        self.status == SettlementStatus::Pending
            && self.reserved_by != instance_id
            && self.transaction_signature.is_none()
            && self.attempt_signatures.is_empty()
    }

    /// Remember the signature of a newly signed attempt
    pub fn record_attempt(&mut self, signature: String) {
        if !self.attempt_signatures.contains(&signature) {
            self.attempt_signatures.push(signature.clone());
        }
        self.transaction_signature = Some(signature);
    }

    /// Every signature that may have reached the network, oldest first
    pub fn known_signatures(&self) -> Vec<&str> {
        let mut signatures: Vec<&str> = self.attempt_signatures.iter().map(String::as_str).collect();
        if let Some(signature) = self.transaction_signature.as_deref() {
            if !signatures.contains(&signature) {
                signatures.push(signature);
            }
        }
        signatures
    }

    /// Apply a forward status transition
    pub fn apply_transition(
        &mut self,
        next: SettlementStatus,
        update: StatusUpdate,
    ) -> crate::Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(crate::Error::InvalidTransition {
                execution_id: self.execution_id.to_string(),
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        update.apply_to(self);
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Optional field updates carried by a status transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    /// New transaction signature
    pub transaction_signature: Option<String>,
    /// New attempt count
    pub attempt_count: Option<u32>,
    /// Error to record
    pub last_error: Option<String>,
}

impl StatusUpdate {
    /// Update carrying a signature
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.transaction_signature = Some(signature.into());
        self
    }

    /// Update carrying an attempt count
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempt_count = Some(attempts);
        self
    }

    /// Update carrying an error
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    fn apply_to(self, record: &mut SettlementRecord) {
        if let Some(signature) = self.transaction_signature {
            record.transaction_signature = Some(signature);
        }
        if let Some(attempts) = self.attempt_count {
            record.attempt_count = attempts;
        }
        if let Some(error) = self.last_error {
            record.last_error = Some(error);
        }
    }
}
