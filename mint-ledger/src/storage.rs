//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `settlements` - Settlement records (key: execution_id)
//! - `indices` - Status index (key: status || execution_id)

use crate::{
    error::{Error, Result},
    types::{ExecutionId, SettlementRecord, SettlementStatus},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Column family names
const CF_SETTLEMENTS: &str = "settlements";
const CF_INDICES: &str = "indices";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_SETTLEMENTS, Self::cf_options_settlements()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened settlement ledger");

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_settlements() -> Options {
        let mut opts = Options::default();
        // Point lookups by execution_id dominate
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    // Record operations

    /// Get settlement record by execution ID
    pub fn get_record(&self, execution_id: &ExecutionId) -> Result<Option<SettlementRecord>> {
        let cf = self.cf_handle(CF_SETTLEMENTS)?;

        match self.db.get_cf(cf, execution_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Write a record and move its status index entry (atomic)
    ///
    /// `previous` is the status currently indexed for this execution, if any.
    pub fn put_record(
        &self,
        record: &SettlementRecord,
        previous: Option<SettlementStatus>,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_settlements = self.cf_handle(CF_SETTLEMENTS)?;
        let value = bincode::serialize(record)?;
        batch.put_cf(cf_settlements, record.execution_id.as_bytes(), &value);

        let cf_indices = self.cf_handle(CF_INDICES)?;
        if let Some(old_status) = previous {
            if old_status != record.status {
                batch.delete_cf(
                    cf_indices,
                    Self::index_key_status(old_status, &record.execution_id),
                );
            }
        }
        batch.put_cf(
            cf_indices,
            Self::index_key_status(record.status, &record.execution_id),
            b"",
        );

        self.db.write_opt(batch, &self.write_options())?;

        tracing::debug!(
            execution_id = %record.execution_id,
            status = %record.status,
            "Settlement record written"
        );

        Ok(())
    }

    /// Get all records currently in `status` (via index)
    pub fn records_by_status(&self, status: SettlementStatus) -> Result<Vec<SettlementRecord>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = [status as u8];

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&prefix, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let execution_id = String::from_utf8(key[1..].to_vec())
                .map_err(|e| Error::Storage(format!("Corrupt index key: {}", e)))?;
            let execution_id = ExecutionId::new(execution_id);

            match self.get_record(&execution_id)? {
                Some(record) => records.push(record),
                None => {
                    tracing::warn!(%execution_id, "Index entry without record");
                }
            }
        }

        Ok(records)
    }

    fn index_key_status(status: SettlementStatus, execution_id: &ExecutionId) -> Vec<u8> {
        let mut key = vec![status as u8];
        key.extend_from_slice(execution_id.as_bytes());
        key
    }

    // Statistics

    /// Count records per status
    pub fn get_stats(&self) -> Result<StorageStats> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut by_status = HashMap::new();
        for item in self.db.iterator_cf(cf_indices, IteratorMode::Start) {
            let (key, _) = item?;
            let status = match key.first() {
                Some(1) => SettlementStatus::Pending,
                Some(2) => SettlementStatus::Submitted,
                Some(3) => SettlementStatus::Confirmed,
                Some(4) => SettlementStatus::Failed,
                _ => continue,
            };
            *by_status.entry(status).or_insert(0u64) += 1;
        }

        Ok(StorageStats { by_status })
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("Settlement ledger closed");
        Ok(())
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Record count per status
    pub by_status: HashMap<SettlementStatus, u64>,
}

impl StorageStats {
    /// Records in `status`
    pub fn count(&self, status: SettlementStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Total records
    pub fn total(&self) -> u64 {
        self.by_status.values().sum()
    }
}
