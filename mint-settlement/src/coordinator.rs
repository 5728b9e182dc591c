//! Settlement coordinator
//!
//! Drives one settlement per execution through
//!
//! ```text
//! Tracking → Quoted → Reserved → Submitting → Confirmed
//!                        │            └─────→ Failed
//!                        └─ AlreadySettled ─→ Skipped
//! ```
//!
//! The coordinator is constructed once with its key, ledger and network
//! injected. Settlement never runs on the metered task's path: ending an
//! execution seals the timer synchronously and settles on a task spawned on
//! the runtime the coordinator was built in, so callers need not be inside
//! that runtime.

use crate::client::{SettlementClient, SubmissionFailure};
use crate::config::Config;
use crate::crypto::Keypair;
use crate::earnings::EarningsCalculator;
use crate::metrics::SettlementMetrics;
use crate::network::{SettlementNetwork, SignatureStatus, SolanaRpcNetwork};
use crate::retry::RetryPolicy;
use crate::timer::ExecutionTimer;
use crate::transaction::{settlement_memo, JobDescriptor, TransactionBuilder};
use crate::types::{
    Complexity, ConfirmationOutcome, ExecutionOptions, ExecutionRecord, ReconciliationReport,
    SettlementOutcome, SettlementPhase, SkipReason,
};
use crate::{Error, Result};
use mint_ledger::{
    ExecutionId, SettlementLedger, SettlementRecord, SettlementStatus, StatusUpdate,
};
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handle to a settlement running in the background
#[derive(Debug)]
pub struct SettlementHandle {
    execution_id: ExecutionId,
    task: JoinHandle<SettlementOutcome>,
}

impl SettlementHandle {
    /// Execution being settled
    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    /// Wait for the settlement to finish
    pub async fn outcome(self) -> Result<SettlementOutcome> {
        self.task.await.map_err(|e| {
            Error::Concurrency(format!(
                "Settlement task for {} failed: {}",
                self.execution_id, e
            ))
        })
    }
}

/// Meters executions and settles each one exactly once
#[derive(Debug)]
pub struct SettlementCoordinator {
    timer: ExecutionTimer,
    calculator: EarningsCalculator,
    ledger: Arc<SettlementLedger>,
    client: SettlementClient,
    builder: TransactionBuilder,
    keypair: Keypair,
    treasury: Pubkey,
    default_complexity: Complexity,
    min_duration_secs: u64,
    confirmation_timeout: Duration,
    metrics: SettlementMetrics,
    runtime: Handle,
}

impl SettlementCoordinator {
    /// Create a coordinator from injected dependencies.
    ///
    /// Must be called from within a tokio runtime; settlements run there.
    pub fn new(
        config: &Config,
        keypair: Keypair,
        ledger: Arc<SettlementLedger>,
        network: Arc<dyn SettlementNetwork>,
    ) -> Result<Self> {
        config.validate()?;

        let runtime = Handle::try_current().map_err(|e| {
            Error::Configuration(format!("Coordinator needs a tokio runtime: {}", e))
        })?;
        let calculator = EarningsCalculator::new(
            config.earnings.base_rate_per_second,
            config.earnings.token_decimals,
        )?;
        let client = SettlementClient::new(
            network,
            RetryPolicy::new(config.retry.clone()),
            config.confirmation.poll_interval(),
        );
        let metrics = SettlementMetrics::new()
            .map_err(|e| Error::Configuration(format!("Metrics registry: {}", e)))?;

        tracing::info!(
            public_key = %keypair.public_key(),
            treasury = %config.treasury_address,
            "Settlement coordinator initialized"
        );

        Ok(Self {
            timer: ExecutionTimer::new(),
            calculator,
            ledger,
            client,
            builder: TransactionBuilder::new(keypair.public_key(), config.mint_program()?),
            keypair,
            treasury: config.treasury()?,
            default_complexity: config.default_complexity()?,
            min_duration_secs: config.earnings.min_duration_secs,
            confirmation_timeout: config.confirmation.timeout(),
            metrics,
            runtime,
        })
    }

    /// Load the keypair, open the ledger and connect to the configured endpoint
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let keypair = Keypair::from_json_file(config.expanded_keypair_path())?;
        let network = SolanaRpcNetwork::new(
            &config.rpc_endpoint,
            config.confirmation.request_timeout(),
        )?;
        let ledger = SettlementLedger::open(config.ledger.clone()).await?;

        Self::new(&config, keypair, Arc::new(ledger), Arc::new(network))
    }

    /// Payer public key
    pub fn public_key(&self) -> Pubkey {
        self.keypair.public_key()
    }

    /// Settlement ledger
    pub fn ledger(&self) -> &Arc<SettlementLedger> {
        &self.ledger
    }

    /// Metrics for this coordinator
    pub fn metrics(&self) -> &SettlementMetrics {
        &self.metrics
    }

    /// Close the ledger. Fails while other holders of the ledger remain.
    pub async fn shutdown(self) -> Result<()> {
        let ledger = Arc::try_unwrap(self.ledger)
            .map_err(|_| Error::Concurrency("Ledger still shared at shutdown".to_string()))?;
        ledger.shutdown().await?;
        tracing::info!("Settlement coordinator shut down");
        Ok(())
    }

    /// Executions currently being metered
    pub fn active_executions(&self) -> usize {
        self.timer.active_count()
    }

    /// Begin metering an execution
    pub fn on_execution_start(
        &self,
        execution_id: ExecutionId,
        options: ExecutionOptions,
    ) -> Result<()> {
        let complexity = options.complexity.unwrap_or(self.default_complexity);
        self.timer
            .start(execution_id.clone(), options.job_name, complexity)?;
        self.metrics.executions_started.inc();
        log_phase(&execution_id, SettlementPhase::Tracking);
        Ok(())
    }

    /// Begin metering under a freshly generated execution ID
    pub fn start_execution(&self, options: ExecutionOptions) -> Result<ExecutionId> {
        let execution_id = ExecutionId::generate();
        self.on_execution_start(execution_id.clone(), options)?;
        Ok(execution_id)
    }

    /// Seal the execution and settle it in the background.
    ///
    /// Timer misuse (`UnknownExecution`) is reported here; everything after
    /// sealing happens on the returned handle's task. Callable from any
    /// thread.
    pub fn on_execution_end(self: &Arc<Self>, execution_id: &ExecutionId) -> Result<SettlementHandle> {
        let record = self.timer.stop(execution_id)?;

        let coordinator = Arc::clone(self);
        let task = self.runtime.spawn(async move { coordinator.settle(record).await });

        Ok(SettlementHandle {
            execution_id: execution_id.clone(),
            task,
        })
    }

    /// Stop metering without settling. Returns whether anything was tracked.
    pub fn cancel_execution(&self, execution_id: &ExecutionId) -> bool {
        let cancelled = self.timer.cancel(execution_id);
        if cancelled {
            tracing::info!(%execution_id, "Execution cancelled, nothing settled");
        }
        cancelled
    }

    /// Run `task` under a fresh execution ID and settle it when it finishes.
    ///
    /// The task's output is returned untouched. Metering problems are logged
    /// and leave the handle empty.
    pub async fn run_metered<F, T>(
        self: &Arc<Self>,
        options: ExecutionOptions,
        task: F,
    ) -> (T, Option<SettlementHandle>)
    where
        F: Future<Output = T>,
    {
        let execution_id = match self.start_execution(options) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Metering not started");
                None
            }
        };

        let output = task.await;

        let handle = execution_id.and_then(|id| match self.on_execution_end(&id) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(execution_id = %id, error = %e, "Metering not ended");
                None
            }
        });

        (output, handle)
    }

    /// Full settlement pipeline for a sealed execution
    pub async fn settle(&self, record: ExecutionRecord) -> SettlementOutcome {
        let started = Instant::now();
        let outcome = self.run_pipeline(record).await;

        self.metrics.record_outcome(outcome.label());
        self.metrics
            .settlement_duration
            .observe(started.elapsed().as_secs_f64());

        match &outcome {
            SettlementOutcome::Confirmed(record) => tracing::info!(
                execution_id = %record.execution_id,
                amount = %record.amount,
                signature = record.transaction_signature.as_deref().unwrap_or_default(),
                "Settlement confirmed"
            ),
            SettlementOutcome::AwaitingConfirmation(record) => tracing::warn!(
                execution_id = %record.execution_id,
                amount = %record.amount,
                signature = record.transaction_signature.as_deref().unwrap_or_default(),
                "Confirmation timed out; left as submitted"
            ),
            SettlementOutcome::Skipped { execution_id, reason } => tracing::info!(
                %execution_id,
                ?reason,
                "Settlement skipped"
            ),
            SettlementOutcome::Failed {
                execution_id,
                error,
                ..
            } => tracing::warn!(%execution_id, %error, "Settlement failed"),
        }

        outcome
    }

    async fn run_pipeline(&self, record: ExecutionRecord) -> SettlementOutcome {
        let execution_id = record.execution_id.clone();

        let duration_secs = record.duration_secs();
        if duration_secs < self.min_duration_secs {
            return SettlementOutcome::Skipped {
                execution_id,
                reason: SkipReason::BelowMinimum {
                    duration_secs,
                    min_duration_secs: self.min_duration_secs,
                },
            };
        }

        let quote = match self.calculator.quote(&record) {
            Ok(quote) => quote,
            Err(e) => return self.fail_unpriced(&record, e).await,
        };
        tracing::info!(
            %execution_id,
            duration_secs,
            complexity = %record.complexity,
            amount = %quote.amount,
            phase = %SettlementPhase::Quoted,
            "Settlement phase"
        );

        let base_units = quote.base_units;
        match self.ledger.reserve(quote).await {
            Ok(_) => log_phase(&execution_id, SettlementPhase::Reserved),
            Err(mint_ledger::Error::AlreadySettled(existing)) => {
                return SettlementOutcome::Skipped {
                    execution_id,
                    reason: SkipReason::AlreadySettled(*existing),
                }
            }
            Err(e) => {
                tracing::error!(%execution_id, error = %e, "Ledger reservation failed");
                return SettlementOutcome::Failed {
                    execution_id,
                    error: e.to_string(),
                    record: None,
                };
            }
        }

        let job = JobDescriptor::from_record(&record);
        let submission = self.submit(&execution_id, &job, base_units).await;

        let submitted = match submission {
            Ok(submitted) => submitted,
            Err(failure) => {
                self.metrics
                    .submission_attempts
                    .inc_by(u64::from(failure.attempts));
                if let Some(signature) = failure.in_doubt.last() {
                    return self.leave_in_doubt(&execution_id, signature, &failure).await;
                }
                return self
                    .fail(
                        &execution_id,
                        failure.to_string(),
                        Some(failure.attempts),
                    )
                    .await;
            }
        };
        self.metrics
            .submission_attempts
            .inc_by(u64::from(submitted.attempts));

        let update = StatusUpdate::default()
            .with_signature(submitted.signature.clone())
            .with_attempts(submitted.attempts);
        let record = match self
            .ledger
            .advance(&execution_id, SettlementStatus::Submitted, update)
            .await
        {
            Ok(record) => record,
            Err(e) => return self.ledger_fault(&execution_id, e),
        };
        tracing::info!(
            %execution_id,
            signature = %submitted.signature,
            attempt = submitted.attempts,
            phase = %SettlementPhase::Submitting,
            "Settlement phase"
        );

        match self
            .client
            .await_confirmation(&submitted.signature, self.confirmation_timeout)
            .await
        {
            ConfirmationOutcome::Confirmed => {
                match self
                    .ledger
                    .advance(
                        &execution_id,
                        SettlementStatus::Confirmed,
                        StatusUpdate::default().with_signature(submitted.signature.clone()),
                    )
                    .await
                {
                    Ok(record) => {
                        self.metrics.settled_base_units.inc_by(record.base_units);
                        SettlementOutcome::Confirmed(record)
                    }
                    Err(e) => self.ledger_fault(&execution_id, e),
                }
            }
            ConfirmationOutcome::Failed(reason) => {
                self.fail(&execution_id, format!("Transaction failed on-chain: {}", reason), None)
                    .await
            }
            ConfirmationOutcome::TimedOut => SettlementOutcome::AwaitingConfirmation(record),
        }
    }

    /// Build, sign, record the signature, and send, with retries
    async fn submit(
        &self,
        execution_id: &ExecutionId,
        job: &JobDescriptor,
        base_units: u64,
    ) -> std::result::Result<crate::client::SubmittedTransaction, SubmissionFailure> {
        let memo = settlement_memo(execution_id);
        let builder = &self.builder;
        let keypair = &self.keypair;
        let ledger = &self.ledger;
        let treasury = self.treasury;

        self.client
            .submit_with_retry(move |token| {
                let unsigned = builder.build(treasury, base_units, memo.clone(), job, token);
                async move {
                    let signed = TransactionBuilder::sign(unsigned, keypair)?;
                    // A crash after sending must leave the signature behind
                    ledger
                        .record_signature(execution_id, signed.signature())
                        .await?;
                    Ok::<_, Error>(signed)
                }
            })
            .await
    }

    /// Record an execution whose amount could not be computed as failed
    async fn fail_unpriced(&self, record: &ExecutionRecord, error: Error) -> SettlementOutcome {
        let execution_id = &record.execution_id;
        tracing::warn!(%execution_id, %error, "Execution could not be priced");

        match self.ledger.reserve(self.calculator.unpriced(record)).await {
            Ok(_) => self.fail(execution_id, error.to_string(), None).await,
            Err(mint_ledger::Error::AlreadySettled(existing)) => SettlementOutcome::Skipped {
                execution_id: execution_id.clone(),
                reason: SkipReason::AlreadySettled(*existing),
            },
            Err(e) => self.ledger_fault(execution_id, e),
        }
    }

    /// Sends timed out and none has been seen yet. Left as submitted for
    /// reconciliation.
    async fn leave_in_doubt(
        &self,
        execution_id: &ExecutionId,
        signature: &str,
        failure: &SubmissionFailure,
    ) -> SettlementOutcome {
        tracing::warn!(
            %execution_id,
            in_doubt = failure.in_doubt.len(),
            error = %failure,
            "Submission outcome unknown"
        );

        let update = StatusUpdate::default()
            .with_signature(signature)
            .with_attempts(failure.attempts)
            .with_error(failure.to_string());
        match self
            .ledger
            .advance(execution_id, SettlementStatus::Submitted, update)
            .await
        {
            Ok(record) => SettlementOutcome::AwaitingConfirmation(record),
            Err(e) => self.ledger_fault(execution_id, e),
        }
    }

    async fn fail(
        &self,
        execution_id: &ExecutionId,
        error: String,
        attempts: Option<u32>,
    ) -> SettlementOutcome {
        let mut update = StatusUpdate::default().with_error(error.clone());
        update.attempt_count = attempts;

        match self
            .ledger
            .advance(execution_id, SettlementStatus::Failed, update)
            .await
        {
            Ok(record) => SettlementOutcome::Failed {
                execution_id: execution_id.clone(),
                error,
                record: Some(record),
            },
            Err(e) => self.ledger_fault(execution_id, e),
        }
    }

    fn ledger_fault(&self, execution_id: &ExecutionId, error: mint_ledger::Error) -> SettlementOutcome {
        tracing::error!(%execution_id, %error, "Ledger update failed");
        SettlementOutcome::Failed {
            execution_id: execution_id.clone(),
            error: error.to_string(),
            record: self.ledger.lookup(execution_id).ok().flatten(),
        }
    }

    /// Resolve settlements a previous run left in flight.
    ///
    /// Queries the network for every `submitted` record and every `pending`
    /// record with a recorded signature. A record that cannot be resolved is
    /// logged and counted as unresolved; the pass carries on.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let mut candidates = self.ledger.list_by_status(SettlementStatus::Submitted)?;
        candidates.extend(
            self.ledger
                .list_by_status(SettlementStatus::Pending)?
                .into_iter()
                .filter(|record| !record.known_signatures().is_empty()),
        );

        let mut report = ReconciliationReport::default();
        for record in candidates {
            report.checked += 1;
            match self.reconcile_one(&record).await {
                Ok(Some(SettlementStatus::Confirmed)) => report.confirmed += 1,
                Ok(Some(SettlementStatus::Failed)) => report.failed += 1,
                Ok(_) => report.unresolved += 1,
                Err(e) => {
                    tracing::warn!(
                        execution_id = %record.execution_id,
                        error = %e,
                        "Reconciliation of record failed"
                    );
                    report.unresolved += 1;
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            confirmed = report.confirmed,
            failed = report.failed,
            unresolved = report.unresolved,
            "Reconciliation complete"
        );

        Ok(report)
    }

    /// Check every attempt's signature. Any confirmed attempt settles the
    /// record; it fails only once every attempt is known to have failed.
    async fn reconcile_one(&self, record: &SettlementRecord) -> Result<Option<SettlementStatus>> {
        let execution_id = &record.execution_id;
        let signatures = record.known_signatures();
        if signatures.is_empty() {
            return Ok(None);
        }

        let mut unresolved = false;
        let mut failure = None;
        for signature in signatures {
            match self.client.signature_status(signature).await {
                Ok(SignatureStatus::Confirmed) => {
                    return self.reconcile_confirmed(record, signature).await;
                }
                Ok(SignatureStatus::Failed(reason)) => {
                    tracing::debug!(%execution_id, %signature, %reason, "Attempt failed on-chain");
                    failure = Some(reason);
                }
                Ok(status) => {
                    tracing::debug!(%execution_id, %signature, ?status, "Attempt not final");
                    unresolved = true;
                }
                Err(e) => {
                    tracing::warn!(%execution_id, %signature, error = %e, "Status query failed");
                    unresolved = true;
                }
            }
        }

        match failure {
            Some(reason) if !unresolved => {
                self.ledger
                    .advance(
                        execution_id,
                        SettlementStatus::Failed,
                        StatusUpdate::default()
                            .with_error(format!("Transaction failed on-chain: {}", reason)),
                    )
                    .await?;
                tracing::info!(%execution_id, "Reconciled as failed");
                Ok(Some(SettlementStatus::Failed))
            }
            _ => {
                tracing::warn!(%execution_id, "Unresolved settlement");
                Ok(None)
            }
        }
    }

    async fn reconcile_confirmed(
        &self,
        record: &SettlementRecord,
        signature: &str,
    ) -> Result<Option<SettlementStatus>> {
        let execution_id = &record.execution_id;
        if record.status == SettlementStatus::Pending {
            self.ledger
                .advance(execution_id, SettlementStatus::Submitted, StatusUpdate::default())
                .await?;
        }
        let confirmed = self
            .ledger
            .advance(
                execution_id,
                SettlementStatus::Confirmed,
                StatusUpdate::default().with_signature(signature),
            )
            .await?;
        self.metrics.settled_base_units.inc_by(confirmed.base_units);
        tracing::info!(%execution_id, %signature, "Reconciled as confirmed");
        Ok(Some(SettlementStatus::Confirmed))
    }
}

fn log_phase(execution_id: &ExecutionId, phase: SettlementPhase) {
    tracing::info!(%execution_id, %phase, "Settlement phase");
}
