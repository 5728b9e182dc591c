//! Actor-based concurrency for the ledger
//!
//! Every mutation goes through one writer task:
//! - The read-check-write of `reserve` happens inside a single message, so two
//!   callers racing to settle the same execution cannot both win
//! - Writes are applied in mailbox order
//! - Bounded mailbox gives backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Settlement tasks (one per execution)           │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox               │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   lookup → decide → Storage::put_record (atomic)      │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::types::{EarningsQuote, ExecutionId, SettlementRecord, SettlementStatus, StatusUpdate};
use crate::{Error, Result, Storage};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Claim an execution for settlement
    Reserve {
        quote: EarningsQuote,
        response: oneshot::Sender<Result<SettlementRecord>>,
    },

    /// Append the signature of a signed transaction before it is sent
    RecordSignature {
        execution_id: ExecutionId,
        signature: String,
        response: oneshot::Sender<Result<SettlementRecord>>,
    },

    /// Move a record forward
    Advance {
        execution_id: ExecutionId,
        status: SettlementStatus,
        update: StatusUpdate,
        response: oneshot::Sender<Result<SettlementRecord>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
#[derive(Debug)]
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Identity of this ledger instance, stamped on reservations
    instance_id: Uuid,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        instance_id: Uuid,
    ) -> Self {
        Self {
            storage,
            mailbox,
            instance_id,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                LedgerMessage::Reserve { quote, response } => {
                    let _ = response.send(self.reserve(quote));
                }
                LedgerMessage::RecordSignature {
                    execution_id,
                    signature,
                    response,
                } => {
                    let _ = response.send(self.record_signature(&execution_id, signature));
                }
                LedgerMessage::Advance {
                    execution_id,
                    status,
                    update,
                    response,
                } => {
                    let _ = response.send(self.advance(&execution_id, status, update));
                }
            }
        }

        tracing::debug!(instance_id = %self.instance_id, "Ledger actor stopped");
    }

    fn reserve(&self, quote: EarningsQuote) -> Result<SettlementRecord> {
        let existing = self.storage.get_record(&quote.execution_id)?;

        let previous = match existing {
            None => None,
            Some(record) if record.is_abandoned_reservation(self.instance_id) => {
                tracing::info!(
                    execution_id = %record.execution_id,
                    previous_owner = %record.reserved_by,
                    "Re-claiming reservation abandoned before signing"
                );
                Some(record.status)
            }
            Some(record) => return Err(Error::AlreadySettled(Box::new(record))),
        };

        let record = SettlementRecord::pending(&quote, self.instance_id);
        self.storage.put_record(&record, previous)?;
        Ok(record)
    }

    fn record_signature(
        &self,
        execution_id: &ExecutionId,
        signature: String,
    ) -> Result<SettlementRecord> {
        let mut record = self.load(execution_id)?;

        if record.is_terminal() {
            return Err(Error::InvalidTransition {
                execution_id: execution_id.to_string(),
                from: record.status,
                to: record.status,
            });
        }

        record.record_attempt(signature);
        record.updated_at = Utc::now();
        self.storage.put_record(&record, Some(record.status))?;
        Ok(record)
    }

    fn advance(
        &self,
        execution_id: &ExecutionId,
        status: SettlementStatus,
        update: StatusUpdate,
    ) -> Result<SettlementRecord> {
        let mut record = self.load(execution_id)?;
        let previous = record.status;

        record.apply_transition(status, update)?;
        self.storage.put_record(&record, Some(previous))?;

        tracing::debug!(
            %execution_id,
            from = %previous,
            to = %status,
            "Settlement advanced"
        );

        Ok(record)
    }

    fn load(&self, execution_id: &ExecutionId) -> Result<SettlementRecord> {
        self.storage
            .get_record(execution_id)?
            .ok_or_else(|| Error::NotFound(execution_id.to_string()))
    }
}

/// Handle for sending messages to the actor
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Claim an execution for settlement
    pub async fn reserve(&self, quote: EarningsQuote) -> Result<SettlementRecord> {
        self.request(|response| LedgerMessage::Reserve { quote, response })
            .await
    }

    /// Store a transaction signature
    pub async fn record_signature(
        &self,
        execution_id: ExecutionId,
        signature: String,
    ) -> Result<SettlementRecord> {
        self.request(|response| LedgerMessage::RecordSignature {
            execution_id,
            signature,
            response,
        })
        .await
    }

    /// Move a record forward
    pub async fn advance(
        &self,
        execution_id: ExecutionId,
        status: SettlementStatus,
        update: StatusUpdate,
    ) -> Result<SettlementRecord> {
        self.request(|response| LedgerMessage::Advance {
            execution_id,
            status,
            update,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    instance_id: Uuid,
    mailbox_capacity: usize,
) -> (LedgerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = LedgerActor::new(storage, rx, instance_id);

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    (LedgerHandle::new(tx), task)
}
