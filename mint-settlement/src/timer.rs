//! Monotonic execution timer
//!
//! Tracks in-flight executions by ID. Starting and stopping are single map
//! entry operations, so concurrent calls for one ID have one winner.

use crate::types::{Complexity, ExecutionRecord};
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mint_ledger::ExecutionId;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct ActiveExecution {
    job_name: Option<String>,
    complexity: Complexity,
    started_at: Instant,
}

/// Tracks execution start instants until they are sealed
#[derive(Debug, Default)]
pub struct ExecutionTimer {
    active: DashMap<ExecutionId, ActiveExecution>,
}

impl ExecutionTimer {
    /// Create an empty timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking an execution
    pub fn start(
        &self,
        execution_id: ExecutionId,
        job_name: Option<String>,
        complexity: Complexity,
    ) -> Result<()> {
        match self.active.entry(execution_id) {
            Entry::Occupied(entry) => Err(Error::DuplicateExecution(entry.key().to_string())),
            Entry::Vacant(entry) => {
                tracing::debug!(execution_id = %entry.key(), %complexity, "Tracking started");
                entry.insert(ActiveExecution {
                    job_name,
                    complexity,
                    started_at: Instant::now(),
                });
                Ok(())
            }
        }
    }

    /// Stop tracking and seal the record
    pub fn stop(&self, execution_id: &ExecutionId) -> Result<ExecutionRecord> {
        let ended_at = Instant::now();
        let (execution_id, active) = self
            .active
            .remove(execution_id)
            .ok_or_else(|| Error::UnknownExecution(execution_id.to_string()))?;

        Ok(ExecutionRecord {
            execution_id,
            job_name: active.job_name,
            complexity: active.complexity,
            started_at: active.started_at,
            ended_at,
        })
    }

    /// Release an execution without settling it. Returns whether it was tracked.
    pub fn cancel(&self, execution_id: &ExecutionId) -> bool {
        self.active.remove(execution_id).is_some()
    }

    /// Whether an execution is being tracked
    pub fn is_tracking(&self, execution_id: &ExecutionId) -> bool {
        self.active.contains_key(execution_id)
    }

    /// Number of executions being tracked
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
