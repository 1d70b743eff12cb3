use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Bucket, LedgerError, PayoutRecipient, ProviderAccount, Wallet};
use crate::core_types::Reference;
use crate::earnings::{AppliedEarning, EarningEntry, EarningKind};
use crate::money::Amount;
use crate::store::LedgerStore;
use crate::withdrawal::{SettleOutcome, Settlement, WithdrawalRecord, WithdrawalStatus};

/// Wallet ledger service.
///
/// Validates amounts, logs every transition with structured fields and
/// delegates the atomic work to the configured [`LedgerStore`].
pub struct WalletLedger {
    store: Arc<dyn LedgerStore>,
}

fn positive(amount: Amount) -> Result<Amount, LedgerError> {
    if amount.is_positive() {
        Ok(amount)
    } else {
        Err(LedgerError::InvalidAmount)
    }
}

impl WalletLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn account(&self, uid: &str) -> Result<Option<ProviderAccount>, LedgerError> {
        self.store.account(uid).await
    }

    /// Current balances; a provider without a wallet yet reads as all zeros.
    pub async fn balance(&self, uid: &str) -> Result<Wallet, LedgerError> {
        Ok(self
            .store
            .account(uid)
            .await?
            .map(|a| a.wallet)
            .unwrap_or_default())
    }

    pub async fn credit(
        &self,
        uid: &str,
        amount: Amount,
        bucket: Bucket,
    ) -> Result<Wallet, LedgerError> {
        let amount = positive(amount)?;
        let wallet = self.store.credit(uid, amount, bucket).await?;
        info!(uid = %uid, amount = %amount, bucket = ?bucket, "Wallet credited");
        Ok(wallet)
    }

    pub async fn release(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError> {
        let amount = positive(amount)?;
        let wallet = self.store.release(uid, amount).await?;
        info!(uid = %uid, amount = %amount, "Pending released to available");
        Ok(wallet)
    }

    pub async fn reserve(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError> {
        let amount = positive(amount)?;
        let wallet = self.store.reserve(uid, amount).await?;
        debug!(uid = %uid, amount = %amount, available = %wallet.available, "Balance reserved");
        Ok(wallet)
    }

    pub async fn refund(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError> {
        let amount = positive(amount)?;
        let wallet = self.store.refund(uid, amount).await?;
        info!(uid = %uid, amount = %amount, available = %wallet.available, "Balance refunded");
        Ok(wallet)
    }

    pub async fn apply_earning(
        &self,
        entry: &EarningEntry,
    ) -> Result<Option<AppliedEarning>, LedgerError> {
        if entry.kind == EarningKind::Accrued {
            positive(entry.amount)?;
        }
        self.store.apply_earning(entry).await
    }

    pub async fn set_pin_hash(&self, uid: &str, pin_hash: &str) -> Result<(), LedgerError> {
        self.store.set_pin_hash(uid, pin_hash).await
    }

    pub async fn set_recipient(
        &self,
        uid: &str,
        recipient: &PayoutRecipient,
    ) -> Result<(), LedgerError> {
        self.store.set_recipient(uid, recipient).await
    }

    /// Debit `record.total` and persist `record` (INITIATING) atomically.
    pub async fn reserve_for_withdrawal(
        &self,
        record: &WithdrawalRecord,
    ) -> Result<Wallet, LedgerError> {
        positive(record.amount)?;
        positive(record.total)?;
        let wallet = self.store.reserve_and_record(record).await?;
        info!(
            reference = %record.reference,
            uid = %record.uid,
            total = %record.total,
            available = %wallet.available,
            "Withdrawal reserved"
        );
        Ok(wallet)
    }

    pub async fn mark_submitted(
        &self,
        reference: &Reference,
        transfer_code: &str,
    ) -> Result<bool, LedgerError> {
        let moved = self.store.mark_submitted(reference, transfer_code).await?;
        if moved {
            info!(reference = %reference, transfer_code = %transfer_code, "Withdrawal submitted to gateway");
        } else {
            debug!(reference = %reference, transfer_code = %transfer_code, "Transfer code stored on advanced record");
        }
        Ok(moved)
    }

    /// Move a withdrawal to a terminal status. Idempotent: a record that is
    /// already terminal is returned unchanged as [`SettleOutcome::AlreadyFinal`].
    pub async fn settle(
        &self,
        reference: &Reference,
        settlement: &Settlement,
    ) -> Result<SettleOutcome, LedgerError> {
        if !settlement.status.is_terminal() {
            return Err(LedgerError::InvalidTransition(format!(
                "settle requires a terminal status, got {}",
                settlement.status
            )));
        }
        let outcome = self.store.settle(reference, settlement).await?;
        let record = outcome.record();
        match &outcome {
            SettleOutcome::Applied(_) => info!(
                reference = %reference,
                uid = %record.uid,
                status = %record.status,
                refunded = settlement.status.refunds(),
                total = %record.total,
                "Withdrawal settled"
            ),
            SettleOutcome::AlreadyFinal(_) => {
                if record.status != settlement.status {
                    warn!(
                        reference = %reference,
                        current = %record.status,
                        requested = %settlement.status,
                        "Conflicting settlement ignored for final withdrawal"
                    );
                } else {
                    debug!(reference = %reference, status = %record.status, "Duplicate settlement ignored");
                }
            }
        }
        Ok(outcome)
    }

    pub async fn withdrawal(
        &self,
        reference: &Reference,
    ) -> Result<Option<WithdrawalRecord>, LedgerError> {
        self.store.withdrawal(reference).await
    }

    pub async fn withdrawal_by_transfer_code(
        &self,
        transfer_code: &str,
    ) -> Result<Option<WithdrawalRecord>, LedgerError> {
        self.store.withdrawal_by_transfer_code(transfer_code).await
    }

    pub async fn withdrawals_for(
        &self,
        uid: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, LedgerError> {
        self.store.withdrawals_for(uid, limit).await
    }

    pub async fn find_stale(
        &self,
        status: WithdrawalStatus,
        before: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, LedgerError> {
        self.store.find_stale(status, before, limit).await
    }

    pub async fn increment_retry(&self, reference: &Reference) -> Result<(), LedgerError> {
        self.store.increment_retry(reference).await
    }
}
