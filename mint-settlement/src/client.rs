//! Submission and confirmation against the settlement network

use crate::error::NetworkError;
use crate::network::{NetworkResult, SettlementNetwork, SignatureStatus};
use crate::retry::{GiveUpReason, RetryDecision, RetryPolicy};
use crate::transaction::{FreshnessToken, SignedTransaction};
use crate::types::ConfirmationOutcome;
use crate::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A transaction the network accepted
#[derive(Debug, Clone)]
pub struct SubmittedTransaction {
    /// Signature reported by the network
    pub signature: String,
    /// Attempts used, this one included
    pub attempts: u32,
    /// Accepted transaction
    pub transaction: SignedTransaction,
}

/// Why submission stopped without success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every permitted attempt failed transiently
    Exhausted,
    /// The network rejected the transaction for good
    NonRetriable,
    /// Building or signing failed locally
    Aborted,
}

impl From<GiveUpReason> for FailureKind {
    fn from(reason: GiveUpReason) -> Self {
        match reason {
            GiveUpReason::Exhausted => FailureKind::Exhausted,
            GiveUpReason::NonRetriable => FailureKind::NonRetriable,
        }
    }
}

/// Submission gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFailure {
    /// Attempts made
    pub attempts: u32,
    /// Why the loop stopped
    pub kind: FailureKind,
    /// Last error observed
    pub error: String,
    /// Signatures of sent attempts whose fate the network has not reported
    pub in_doubt: Vec<String>,
}

impl fmt::Display for SubmissionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            match self.kind {
                FailureKind::Exhausted => "retries exhausted",
                FailureKind::NonRetriable => "rejected",
                FailureKind::Aborted => "aborted",
            },
            self.attempts,
            self.error
        )
    }
}

enum AttemptError {
    Network {
        error: NetworkError,
        sent: Option<SignedTransaction>,
    },
    Local(Error),
}

/// Talks to the settlement network on behalf of the coordinator
#[derive(Clone)]
pub struct SettlementClient {
    network: Arc<dyn SettlementNetwork>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl fmt::Debug for SettlementClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementClient")
            .field("retry", &self.retry)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl SettlementClient {
    /// Create client
    pub fn new(
        network: Arc<dyn SettlementNetwork>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            network,
            retry,
            poll_interval,
        }
    }

    /// Latest freshness token
    pub async fn fetch_freshness(&self) -> NetworkResult<FreshnessToken> {
        self.network.latest_freshness().await
    }

    /// Single submission attempt
    pub async fn submit(&self, transaction: &SignedTransaction) -> NetworkResult<String> {
        self.network.send_transaction(transaction).await
    }

    /// Single status query
    pub async fn signature_status(&self, signature: &str) -> NetworkResult<SignatureStatus> {
        self.network.signature_status(signature).await
    }

    /// Submit with bounded retries.
    ///
    /// Every attempt fetches a fresh token and calls `sign_with` to rebuild
    /// and re-sign. Errors from `sign_with` end the loop, except network
    /// errors, which follow the retry policy.
    ///
    /// A send that timed out may still land. Before each retry and before
    /// giving up, such attempts are looked up and the first one the network
    /// has seen is returned instead of sending again.
    pub async fn submit_with_retry<F, Fut>(
        &self,
        mut sign_with: F,
    ) -> Result<SubmittedTransaction, SubmissionFailure>
    where
        F: FnMut(FreshnessToken) -> Fut,
        Fut: Future<Output = crate::Result<SignedTransaction>>,
    {
        let mut attempt = 1;
        let mut in_doubt = Vec::new();

        let (kind, error) = loop {
            match self.attempt(&mut sign_with).await {
                Ok((signature, transaction)) => {
                    if attempt > 1 {
                        tracing::info!(attempt, %signature, "Submission succeeded on retry");
                    }
                    return Ok(SubmittedTransaction {
                        signature,
                        attempts: attempt,
                        transaction,
                    });
                }
                Err(AttemptError::Local(e)) => {
                    tracing::warn!(attempt, error = %e, "Submission aborted");
                    break (FailureKind::Aborted, e.to_string());
                }
                Err(AttemptError::Network { error, sent }) => {
                    if let Some(transaction) = sent.filter(|_| error.may_have_landed()) {
                        in_doubt.push(transaction);
                    }

                    match self.retry.decide(attempt, &error) {
                        RetryDecision::Retry {
                            next_attempt,
                            delay,
                        } => {
                            tracing::warn!(
                                attempt,
                                max_attempts = self.retry.max_attempts(),
                                ?delay,
                                error = %error,
                                "Submission attempt failed, retrying"
                            );
                            tokio::time::sleep(delay).await;

                            if let Some(landed) = self.find_landed(&mut in_doubt, attempt).await {
                                return Ok(landed);
                            }
                            attempt = next_attempt;
                        }
                        RetryDecision::GiveUp(reason) => {
                            tracing::warn!(
                                attempt,
                                reason = reason.as_str(),
                                error = %error,
                                "Submission failed"
                            );
                            break (reason.into(), error.to_string());
                        }
                    }
                }
            }
        };

        if let Some(landed) = self.find_landed(&mut in_doubt, attempt).await {
            return Ok(landed);
        }

        Err(SubmissionFailure {
            attempts: attempt,
            kind,
            error,
            in_doubt: in_doubt.iter().map(SignedTransaction::signature).collect(),
        })
    }

    /// First in-doubt attempt the network has seen. Attempts that failed
    /// on-chain are dropped; unknown ones stay in doubt.
    async fn find_landed(
        &self,
        in_doubt: &mut Vec<SignedTransaction>,
        attempts: u32,
    ) -> Option<SubmittedTransaction> {
        let mut remaining = Vec::with_capacity(in_doubt.len());
        let mut landed = None;

        for transaction in in_doubt.drain(..) {
            if landed.is_some() {
                remaining.push(transaction);
                continue;
            }

            let signature = transaction.signature();
            match self.network.signature_status(&signature).await {
                Ok(SignatureStatus::Confirmed | SignatureStatus::Pending) => {
                    tracing::info!(%signature, attempts, "Timed-out attempt reached the network");
                    landed = Some(SubmittedTransaction {
                        signature,
                        attempts,
                        transaction,
                    });
                }
                Ok(SignatureStatus::Failed(reason)) => {
                    tracing::debug!(%signature, %reason, "Timed-out attempt failed on-chain");
                }
                Ok(SignatureStatus::Unknown) => remaining.push(transaction),
                Err(e) => {
                    tracing::warn!(%signature, error = %e, "Status of timed-out attempt unavailable");
                    remaining.push(transaction);
                }
            }
        }

        *in_doubt = remaining;
        landed
    }

    async fn attempt<F, Fut>(
        &self,
        sign_with: &mut F,
    ) -> Result<(String, SignedTransaction), AttemptError>
    where
        F: FnMut(FreshnessToken) -> Fut,
        Fut: Future<Output = crate::Result<SignedTransaction>>,
    {
        let token = self
            .network
            .latest_freshness()
            .await
            .map_err(|error| AttemptError::Network { error, sent: None })?;

        let transaction = sign_with(token).await.map_err(|e| match e {
            Error::Network(error) => AttemptError::Network { error, sent: None },
            other => AttemptError::Local(other),
        })?;

        match self.network.send_transaction(&transaction).await {
            Ok(signature) => Ok((signature, transaction)),
            Err(error) => Err(AttemptError::Network {
                error,
                sent: Some(transaction),
            }),
        }
    }

    /// Poll until the signature is confirmed, failed, or `timeout` elapses.
    /// Polling errors are logged and polling continues.
    pub async fn await_confirmation(
        &self,
        signature: &str,
        timeout: Duration,
    ) -> ConfirmationOutcome {
        let deadline = Instant::now() + timeout;

        loop {
            match tokio::time::timeout_at(deadline, self.network.signature_status(signature)).await
            {
                Err(_) => return ConfirmationOutcome::TimedOut,
                Ok(Ok(SignatureStatus::Confirmed)) => return ConfirmationOutcome::Confirmed,
                Ok(Ok(SignatureStatus::Failed(reason))) => {
                    return ConfirmationOutcome::Failed(reason)
                }
                Ok(Ok(SignatureStatus::Pending | SignatureStatus::Unknown)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(%signature, error = %e, "Status poll failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return ConfirmationOutcome::TimedOut;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
