//! Settlement Reconciler
//!
//! Applies normalized webhook events to withdrawal records. Every path is
//! idempotent: the ledger's settle is a compare-and-set on non-terminal
//! status, so redelivered or racing events apply once.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::event::{Correlation, EventDetails, SettlementEvent};
use crate::config::WebhookConfig;
use crate::wallet::{LedgerError, WalletLedger};
use crate::withdrawal::{SettleOutcome, Settlement, WithdrawalRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// No withdrawal matched after all lookup attempts; the gateway should redeliver
    #[error("Unknown withdrawal: {0}")]
    UnknownReference(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ReconcileError {
    pub fn code(&self) -> &'static str {
        match self {
            ReconcileError::UnknownReference(_) => "UNKNOWN_REFERENCE",
            ReconcileError::Ledger(e) => e.code(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ReconcileError::UnknownReference(_) => 503,
            ReconcileError::Ledger(_) => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(WithdrawalRecord),
    /// Record was already terminal
    AlreadyFinal(WithdrawalRecord),
    /// Event acknowledged without touching the ledger
    Ignored,
}

pub struct SettlementReconciler {
    ledger: Arc<WalletLedger>,
    lookup_attempts: u32,
    lookup_backoff: Duration,
}

impl SettlementReconciler {
    pub fn new(ledger: Arc<WalletLedger>, config: &WebhookConfig) -> Self {
        Self {
            ledger,
            lookup_attempts: config.lookup_attempts.max(1),
            lookup_backoff: Duration::from_millis(config.lookup_backoff_ms),
        }
    }

    pub async fn apply(&self, event: SettlementEvent) -> Result<ReconcileOutcome, ReconcileError> {
        let (details, settlement) = match event {
            SettlementEvent::Ignored { kind } => {
                info!(kind = %kind, "Webhook event ignored");
                return Ok(ReconcileOutcome::Ignored);
            }
            SettlementEvent::Succeeded(d) => {
                let s = Settlement::success(d.transfer_code.clone());
                (d, s)
            }
            SettlementEvent::Failed(d) => {
                let s = Settlement::failed(reason_or(&d, "transfer failed"))
                    .with_transfer_code(d.transfer_code.clone());
                (d, s)
            }
            SettlementEvent::TimedOut(d) => {
                let s = Settlement::timed_out(reason_or(&d, "gateway timeout"))
                    .with_transfer_code(d.transfer_code.clone());
                (d, s)
            }
        };

        let record = self.find(&details.correlation).await?;

        if record.rail != details.rail {
            error!(
                reference = %record.reference,
                record_rail = %record.rail,
                callback_rail = %details.rail,
                "Webhook from another rail than the withdrawal's, ignoring"
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        if let Some(claimed) = details.claimed_uid.as_deref()
            && claimed != record.uid
        {
            error!(
                reference = %record.reference,
                owner = %record.uid,
                claimed_uid = %claimed,
                "Webhook uid does not match withdrawal owner, ignoring"
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        match self.ledger.settle(&record.reference, &settlement).await? {
            SettleOutcome::Applied(r) => Ok(ReconcileOutcome::Applied(r)),
            SettleOutcome::AlreadyFinal(r) => Ok(ReconcileOutcome::AlreadyFinal(r)),
        }
    }

    /// Webhooks can beat the write that stores the transfer code, so a miss
    /// is retried with doubling backoff before giving up.
    async fn find(&self, correlation: &Correlation) -> Result<WithdrawalRecord, ReconcileError> {
        let mut backoff = self.lookup_backoff;
        for attempt in 1..=self.lookup_attempts {
            let found = match correlation {
                Correlation::Reference(r) => self.ledger.withdrawal(r).await?,
                Correlation::TransferCode(c) => self.ledger.withdrawal_by_transfer_code(c).await?,
                Correlation::TransferCodeOrReference {
                    transfer_code,
                    reference,
                } => match self.ledger.withdrawal_by_transfer_code(transfer_code).await? {
                    Some(record) => Some(record),
                    None => self.ledger.withdrawal(reference).await?,
                },
            };
            if let Some(record) = found {
                return Ok(record);
            }
            if attempt < self.lookup_attempts {
                debug!(correlation = %correlation, attempt, "Withdrawal not found yet, retrying");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }
        warn!(correlation = %correlation, attempts = self.lookup_attempts, "Webhook for unknown withdrawal");
        Err(ReconcileError::UnknownReference(correlation.to_string()))
    }
}

fn reason_or(details: &EventDetails, fallback: &str) -> String {
    details
        .reason
        .clone()
        .unwrap_or_else(|| fallback.to_string())
}
