//! Core types for execution settlement

use mint_ledger::{ExecutionId, SettlementRecord};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Largest accepted multiplier, in thousandths (×100)
pub const MAX_COMPLEXITY_MILLIS: u32 = 100_000;

/// Complexity multiplier with 0.001 granularity.
///
/// Stored as thousandths: `1000` is ×1.0, `1500` is ×1.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Complexity(u32);

impl Complexity {
    /// Unscaled (×1.0)
    pub const ONE: Complexity = Complexity(1000);

    /// From thousandths
    pub fn from_millis(millis: u32) -> crate::Result<Self> {
        if millis == 0 {
            return Err(crate::Error::InvalidComplexity(
                "complexity must be positive".to_string(),
            ));
        }
        if millis > MAX_COMPLEXITY_MILLIS {
            return Err(crate::Error::InvalidComplexity(format!(
                "complexity {} exceeds maximum {}",
                millis, MAX_COMPLEXITY_MILLIS
            )));
        }
        Ok(Self(millis))
    }

    /// From a decimal multiplier, rounded to the nearest thousandth
    pub fn from_decimal(multiplier: Decimal) -> crate::Result<Self> {
        if multiplier <= Decimal::ZERO {
            return Err(crate::Error::InvalidComplexity(format!(
                "complexity must be positive, got {}",
                multiplier
            )));
        }

        let millis = (multiplier * Decimal::ONE_THOUSAND)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        let millis = millis.to_u32().ok_or_else(|| {
            crate::Error::InvalidComplexity(format!("complexity {} out of range", multiplier))
        })?;

        Self::from_millis(millis)
    }

    /// Thousandths, as carried on-chain
    pub fn millis(&self) -> u32 {
        self.0
    }

    /// Multiplier as a decimal
    pub fn as_decimal(&self) -> Decimal {
        Decimal::new(i64::from(self.0), 3)
    }
}

impl Default for Complexity {
    fn default() -> Self {
        Self::ONE
    }
}

impl TryFrom<u32> for Complexity {
    type Error = crate::Error;

    fn try_from(millis: u32) -> crate::Result<Self> {
        Self::from_millis(millis)
    }
}

impl From<Complexity> for u32 {
    fn from(complexity: Complexity) -> Self {
        complexity.0
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.as_decimal().normalize())
    }
}

/// Per-execution options supplied when tracking starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Optional human label
    pub job_name: Option<String>,

    /// Multiplier; the configured default applies when absent
    pub complexity: Option<Complexity>,
}

impl ExecutionOptions {
    /// Set the job label
    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    /// Set the complexity
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = Some(complexity);
        self
    }
}

/// A sealed execution: both instants fixed, ready to be quoted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Execution ID
    pub execution_id: ExecutionId,

    /// Optional label
    pub job_name: Option<String>,

    /// Multiplier
    pub complexity: Complexity,

    /// Monotonic start
    pub started_at: Instant,

    /// Monotonic end
    pub ended_at: Instant,
}

impl ExecutionRecord {
    /// Metered wall time
    pub fn elapsed(&self) -> Duration {
        self.ended_at.saturating_duration_since(self.started_at)
    }

    /// Metered time truncated to whole seconds
    pub fn duration_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }

    /// Label used on-chain: the job name, or `run-` and the first 8 characters
    /// of the execution ID
    pub fn job_label(&self) -> String {
        match &self.job_name {
            Some(name) => name.clone(),
            None => format!("run-{}", self.execution_id.short(8)),
        }
    }
}

/// Phases of one settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementPhase {
    /// Timer running
    Tracking,
    /// Quote derived from the sealed record
    Quoted,
    /// Ledger claim held
    Reserved,
    /// Transaction accepted by the network, awaiting confirmation
    Submitting,
    /// Confirmed on-chain (terminal)
    Confirmed,
    /// Failed (terminal)
    Failed,
    /// Nothing to pay: already settled or below the minimum duration (terminal)
    Skipped,
}

impl SettlementPhase {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementPhase::Tracking => "tracking",
            SettlementPhase::Quoted => "quoted",
            SettlementPhase::Reserved => "reserved",
            SettlementPhase::Submitting => "submitting",
            SettlementPhase::Confirmed => "confirmed",
            SettlementPhase::Failed => "failed",
            SettlementPhase::Skipped => "skipped",
        }
    }
}

impl fmt::Display for SettlementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a settlement made no network call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Another settlement owns (or finished) this execution
    AlreadySettled(SettlementRecord),

    /// Shorter than the configured minimum
    BelowMinimum {
        /// Metered whole seconds
        duration_secs: u64,
        /// Configured minimum
        min_duration_secs: u64,
    },
}

/// Final result of one settlement pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Confirmed on-chain and recorded
    Confirmed(SettlementRecord),

    /// Submitted, confirmation not seen before the timeout; record stays `submitted`
    AwaitingConfirmation(SettlementRecord),

    /// No network call was made
    Skipped {
        /// Execution ID
        execution_id: ExecutionId,
        /// Reason
        reason: SkipReason,
    },

    /// Settlement ended in failure
    Failed {
        /// Execution ID
        execution_id: ExecutionId,
        /// Last error
        error: String,
        /// Ledger record, when one was written
        record: Option<SettlementRecord>,
    },
}

impl SettlementOutcome {
    /// Execution this outcome belongs to
    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            SettlementOutcome::Confirmed(record) => &record.execution_id,
            SettlementOutcome::AwaitingConfirmation(record) => &record.execution_id,
            SettlementOutcome::Skipped { execution_id, .. } => execution_id,
            SettlementOutcome::Failed { execution_id, .. } => execution_id,
        }
    }

    /// Phase the pipeline stopped in
    pub fn phase(&self) -> SettlementPhase {
        match self {
            SettlementOutcome::Confirmed(_) => SettlementPhase::Confirmed,
            SettlementOutcome::AwaitingConfirmation(_) => SettlementPhase::Submitting,
            SettlementOutcome::Skipped { .. } => SettlementPhase::Skipped,
            SettlementOutcome::Failed { .. } => SettlementPhase::Failed,
        }
    }

    /// Ledger record associated with this outcome
    pub fn record(&self) -> Option<&SettlementRecord> {
        match self {
            SettlementOutcome::Confirmed(record) => Some(record),
            SettlementOutcome::AwaitingConfirmation(record) => Some(record),
            SettlementOutcome::Skipped {
                reason: SkipReason::AlreadySettled(record),
                ..
            } => Some(record),
            SettlementOutcome::Skipped { .. } => None,
            SettlementOutcome::Failed { record, .. } => record.as_ref(),
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::Confirmed(_) => "confirmed",
            SettlementOutcome::AwaitingConfirmation(_) => "awaiting_confirmation",
            SettlementOutcome::Skipped {
                reason: SkipReason::AlreadySettled(_),
                ..
            } => "already_settled",
            SettlementOutcome::Skipped { .. } => "below_minimum",
            SettlementOutcome::Failed { .. } => "failed",
        }
    }

    /// Whether the execution is (or will be) paid exactly once
    pub fn is_success(&self) -> bool {
        !matches!(self, SettlementOutcome::Failed { .. })
    }
}

/// Result of a confirmation wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Finalized on-chain
    Confirmed,
    /// Landed but failed
    Failed(String),
    /// Not seen within the timeout
    TimedOut,
}

/// Summary of a startup reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Records examined
    pub checked: usize,
    /// Moved to `confirmed`
    pub confirmed: usize,
    /// Moved to `failed`
    pub failed: usize,
    /// Network had no verdict; left as is
    pub unresolved: usize,
}
