//! Lifecycle hooks for host frameworks
//!
//! Hosts either call [`LifecycleHooks`] directly around each execution, or
//! forward agent-framework callbacks to a [`CallbackAdapter`], which maps
//! nested chain/agent events onto one metered execution per top-level run.

use crate::coordinator::{SettlementCoordinator, SettlementHandle};
use crate::types::ExecutionOptions;
use crate::{Error, Result};
use mint_ledger::ExecutionId;
use parking_lot::Mutex;
use std::sync::Arc;

/// Start/end notifications for a metered execution
pub trait LifecycleHooks: Send + Sync {
    /// Execution started
    fn on_execution_start(&self, execution_id: ExecutionId, options: ExecutionOptions)
        -> Result<()>;

    /// Execution ended. Settlement continues in the background.
    fn on_execution_end(&self, execution_id: &ExecutionId) -> Result<SettlementHandle>;
}

impl LifecycleHooks for Arc<SettlementCoordinator> {
    fn on_execution_start(
        &self,
        execution_id: ExecutionId,
        options: ExecutionOptions,
    ) -> Result<()> {
        SettlementCoordinator::on_execution_start(self, execution_id, options)
    }

    fn on_execution_end(&self, execution_id: &ExecutionId) -> Result<SettlementHandle> {
        SettlementCoordinator::on_execution_end(self, execution_id)
    }
}

/// Maps agent-framework callbacks onto metered executions.
///
/// At most one execution is open at a time. A top-level chain (one without
/// a parent run) opens it under its run ID; otherwise the first agent action
/// opens one under a generated ID. Whichever end event comes first seals it:
/// the chain's end or error, or the agent's finish. Later end events find
/// nothing open and return `None`, so each run settles once.
pub struct CallbackAdapter<H> {
    hooks: H,
    options: ExecutionOptions,
    current: Mutex<Option<ExecutionId>>,
}

impl<H> std::fmt::Debug for CallbackAdapter<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackAdapter")
            .field("options", &self.options)
            .field("current", &*self.current.lock())
            .finish_non_exhaustive()
    }
}

impl<H: LifecycleHooks> CallbackAdapter<H> {
    /// Create adapter. `options` apply to every execution it starts.
    pub fn new(hooks: H, options: ExecutionOptions) -> Self {
        Self {
            hooks,
            options,
            current: Mutex::new(None),
        }
    }

    /// Execution currently open, if any
    pub fn current_execution(&self) -> Option<ExecutionId> {
        self.current.lock().clone()
    }

    /// Chain started. Nested chains (with a parent) are ignored.
    pub fn on_chain_start(&self, run_id: &str, parent_run_id: Option<&str>) {
        if parent_run_id.is_some() {
            return;
        }
        self.open(|| ExecutionId::new(run_id));
    }

    /// Chain finished
    pub fn on_chain_end(&self, run_id: &str) -> Option<SettlementHandle> {
        self.close_run(run_id)
    }

    /// Chain raised. The execution still settles for the time it ran.
    pub fn on_chain_error(&self, run_id: &str, error: &str) -> Option<SettlementHandle> {
        tracing::debug!(run_id, error, "Chain ended with error");
        self.close_run(run_id)
    }

    /// Agent chose an action. Opens an execution if none is open.
    pub fn on_agent_action(&self) {
        self.open(ExecutionId::generate);
    }

    /// Agent finished. Ends whatever execution is open.
    pub fn on_agent_finish(&self) -> Option<SettlementHandle> {
        let execution_id = self.current.lock().take()?;
        self.end(&execution_id)
    }

    fn open(&self, execution_id: impl FnOnce() -> ExecutionId) {
        let mut current = self.current.lock();
        if current.is_some() {
            return;
        }
        let execution_id = execution_id();
        if self.start(execution_id.clone()) {
            *current = Some(execution_id);
        }
    }

    fn close_run(&self, run_id: &str) -> Option<SettlementHandle> {
        let execution_id = {
            let mut current = self.current.lock();
            match current.as_ref() {
                Some(open) if open.as_str() == run_id => current.take()?,
                _ => {
                    tracing::debug!(run_id, "End callback for run not open");
                    return None;
                }
            }
        };
        self.end(&execution_id)
    }

    fn start(&self, execution_id: ExecutionId) -> bool {
        match self
            .hooks
            .on_execution_start(execution_id.clone(), self.options.clone())
        {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(%execution_id, error = %e, "Execution not started");
                false
            }
        }
    }

    fn end(&self, execution_id: &ExecutionId) -> Option<SettlementHandle> {
        match self.hooks.on_execution_end(execution_id) {
            Ok(handle) => Some(handle),
            Err(Error::UnknownExecution(_)) => {
                tracing::debug!(%execution_id, "End callback for untracked execution");
                None
            }
            Err(e) => {
                tracing::warn!(%execution_id, error = %e, "Execution not ended");
                None
            }
        }
    }
}
