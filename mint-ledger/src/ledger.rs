//! Settlement ledger facade
//!
//! Reads go straight to storage; every mutation is serialized through the
//! ledger actor so `reserve` is an atomic check-and-claim.
//!
//! # Example
//!
//! ```no_run
//! use mint_ledger::{Config, SettlementLedger};
//!
//! #[tokio::main]
//! async fn main() -> mint_ledger::Result<()> {
//!     let ledger = SettlementLedger::open(Config::default()).await?;
//!
//!     // let record = ledger.reserve(quote).await?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    storage::StorageStats,
    types::{EarningsQuote, ExecutionId, SettlementRecord, SettlementStatus, StatusUpdate},
    Config, Result, Storage,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Durable record of which executions have been settled
#[derive(Debug)]
pub struct SettlementLedger {
    /// Actor handle for writes
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Writer task, awaited on shutdown so the database lock is released
    task: JoinHandle<()>,

    /// Identity of this ledger instance
    instance_id: Uuid,
}

impl SettlementLedger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let instance_id = Uuid::now_v7();

        let (handle, task) =
            spawn_ledger_actor(storage.clone(), instance_id, config.mailbox_capacity);

        tracing::info!(%instance_id, "Settlement ledger ready");

        Ok(Self {
            handle,
            storage,
            task,
            instance_id,
        })
    }

    /// Identity stamped on reservations made through this instance
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Current record for an execution, if any
    pub fn lookup(&self, execution_id: &ExecutionId) -> Result<Option<SettlementRecord>> {
        self.storage.get_record(execution_id)
    }

    /// Claim an execution for settlement.
    ///
    /// Exactly one caller wins for a given execution. Losers receive
    /// [`Error::AlreadySettled`](crate::Error::AlreadySettled) carrying the
    /// existing record. A pending reservation from another instance that never
    /// recorded a signature is re-claimed.
    pub async fn reserve(&self, quote: EarningsQuote) -> Result<SettlementRecord> {
        self.handle.reserve(quote).await
    }

    /// Persist the signature of a signed transaction before sending it.
    /// Signatures of earlier attempts are kept.
    pub async fn record_signature(
        &self,
        execution_id: &ExecutionId,
        signature: impl Into<String>,
    ) -> Result<SettlementRecord> {
        self.handle
            .record_signature(execution_id.clone(), signature.into())
            .await
    }

    /// Move a record forward through its lifecycle
    pub async fn advance(
        &self,
        execution_id: &ExecutionId,
        status: SettlementStatus,
        update: StatusUpdate,
    ) -> Result<SettlementRecord> {
        self.handle
            .advance(execution_id.clone(), status, update)
            .await
    }

    /// All records currently in `status`
    pub fn list_by_status(&self, status: SettlementStatus) -> Result<Vec<SettlementRecord>> {
        self.storage.records_by_status(status)
    }

    /// Record counts per status
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Stop the writer and release the database
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Ledger actor did not stop cleanly");
        }

        match Arc::try_unwrap(self.storage) {
            Ok(storage) => storage.close(),
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (config, temp_dir)
    }

    fn test_quote(id: &str) -> EarningsQuote {
        EarningsQuote {
            execution_id: ExecutionId::new(id),
            job_name: Some("summarize".to_string()),
            duration_secs: 300,
            complexity: Decimal::ONE,
            base_rate_per_second: Decimal::new(5, 3),
            amount: Decimal::new(15, 1),
            base_units: 1_500_000_000,
        }
    }

    #[tokio::test]
    async fn test_ledger_open() {
        let (config, _temp) = test_config();
        let ledger = SettlementLedger::open(config).await.unwrap();
        assert_eq!(ledger.stats().unwrap().total(), 0);
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_lookup_after_reserve() {
        let (config, _temp) = test_config();
        let ledger = SettlementLedger::open(config).await.unwrap();
        let id = ExecutionId::new("exec-1");

        assert!(ledger.lookup(&id).unwrap().is_none());

        let record = ledger.reserve(test_quote("exec-1")).await.unwrap();
        assert_eq!(record.reserved_by, ledger.instance_id());
        assert_eq!(ledger.lookup(&id).unwrap(), Some(record));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (config, _temp) = test_config();
        let ledger = SettlementLedger::open(config).await.unwrap();
        let id = ExecutionId::new("exec-2");

        ledger.reserve(test_quote("exec-2")).await.unwrap();
        ledger.record_signature(&id, "5xSig").await.unwrap();
        ledger
            .advance(
                &id,
                SettlementStatus::Submitted,
                StatusUpdate::default().with_attempts(1),
            )
            .await
            .unwrap();
        ledger
            .advance(&id, SettlementStatus::Confirmed, StatusUpdate::default())
            .await
            .unwrap();

        let record = ledger.lookup(&id).unwrap().unwrap();
        assert_eq!(record.status, SettlementStatus::Confirmed);
        assert_eq!(record.transaction_signature.as_deref(), Some("5xSig"));
        assert_eq!(record.attempt_count, 1);

        let err = ledger.reserve(test_quote("exec-2")).await.unwrap_err();
        assert!(err.is_already_settled());

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.count(SettlementStatus::Confirmed), 1);
        assert_eq!(stats.count(SettlementStatus::Pending), 0);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_is_terminal() {
        let (config, _temp) = test_config();
        let ledger = SettlementLedger::open(config).await.unwrap();
        let id = ExecutionId::new("exec-3");

        ledger.reserve(test_quote("exec-3")).await.unwrap();
        ledger
            .advance(
                &id,
                SettlementStatus::Failed,
                StatusUpdate::default().with_error("insufficient funds"),
            )
            .await
            .unwrap();

        let err = ledger
            .advance(&id, SettlementStatus::Submitted, StatusUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let failed = ledger.list_by_status(SettlementStatus::Failed).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("insufficient funds"));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_reclaims_unsigned_reservation() {
        let (config, _temp) = test_config();

        let first = SettlementLedger::open(config.clone()).await.unwrap();
        first.reserve(test_quote("unsigned")).await.unwrap();
        first.reserve(test_quote("signed")).await.unwrap();
        first
            .record_signature(&ExecutionId::new("signed"), "sig")
            .await
            .unwrap();
        let first_id = first.instance_id();
        first.shutdown().await.unwrap();

        let second = SettlementLedger::open(config).await.unwrap();
        assert_ne!(second.instance_id(), first_id);

        let reclaimed = second.reserve(test_quote("unsigned")).await.unwrap();
        assert_eq!(reclaimed.reserved_by, second.instance_id());

        let err = second.reserve(test_quote("signed")).await.unwrap_err();
        assert!(err.is_already_settled());

        assert_eq!(second.stats().unwrap().count(SettlementStatus::Pending), 2);

        second.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (mut config, _temp) = test_config();
        config.mailbox_capacity = 0;
        let result = SettlementLedger::open(config).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
