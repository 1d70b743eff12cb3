//! Ledger storage backends
//!
//! Every mutating method is atomic per provider: either all of its effects
//! are visible or none are. The wallet ledger and the withdrawal tracker are
//! the only callers.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core_types::{ProviderId, Reference};
use crate::earnings::{AppliedEarning, EarningEntry};
use crate::money::Amount;
use crate::wallet::{Bucket, LedgerError, PayoutRecipient, ProviderAccount, Wallet};
use crate::withdrawal::{SettleOutcome, Settlement, WithdrawalRecord, WithdrawalStatus};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    async fn health_check(&self) -> Result<(), LedgerError>;

    // === Accounts ===

    async fn account(&self, uid: &str) -> Result<Option<ProviderAccount>, LedgerError>;

    /// Store the PIN hash, creating the account if absent.
    async fn set_pin_hash(&self, uid: &str, pin_hash: &str) -> Result<(), LedgerError>;

    /// Store the payout recipient, creating the account if absent.
    async fn set_recipient(
        &self,
        uid: &str,
        recipient: &PayoutRecipient,
    ) -> Result<(), LedgerError>;

    // === Wallet primitives ===

    /// Add to one bucket, creating the wallet if absent.
    async fn credit(&self, uid: &str, amount: Amount, bucket: Bucket)
    -> Result<Wallet, LedgerError>;

    /// Move `amount` from pending to available.
    async fn release(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError>;

    /// Conditional check-and-decrement of available.
    async fn reserve(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError>;

    async fn refund(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError>;

    /// Apply a booking earning once per (booking, kind).
    /// `Released` requires the booking's `Accrued` entry for the same uid and
    /// moves exactly its amount, else `EarningNotAccrued`.
    /// Returns `None` when the entry was already applied.
    async fn apply_earning(
        &self,
        entry: &EarningEntry,
    ) -> Result<Option<AppliedEarning>, LedgerError>;

    // === Withdrawals ===

    /// Reserve `record.total` and insert `record` in one transaction.
    async fn reserve_and_record(&self, record: &WithdrawalRecord) -> Result<Wallet, LedgerError>;

    /// Store the gateway transfer code. Moves INITIATING to PENDING; a record
    /// already past INITIATING only gains the code. Returns whether the status moved.
    async fn mark_submitted(
        &self,
        reference: &Reference,
        transfer_code: &str,
    ) -> Result<bool, LedgerError>;

    /// CAS a non-terminal record to `settlement.status`, refunding `total`
    /// in the same transaction when that status refunds.
    async fn settle(
        &self,
        reference: &Reference,
        settlement: &Settlement,
    ) -> Result<SettleOutcome, LedgerError>;

    async fn withdrawal(&self, reference: &Reference)
    -> Result<Option<WithdrawalRecord>, LedgerError>;

    async fn withdrawal_by_transfer_code(
        &self,
        transfer_code: &str,
    ) -> Result<Option<WithdrawalRecord>, LedgerError>;

    /// Newest first
    async fn withdrawals_for(
        &self,
        uid: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, LedgerError>;

    /// Records in `status` not updated since `before`, oldest first.
    async fn find_stale(
        &self,
        status: WithdrawalStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, LedgerError>;

    async fn increment_retry(&self, reference: &Reference) -> Result<(), LedgerError>;
}

pub(crate) fn not_found(uid: &str) -> LedgerError {
    LedgerError::ProviderNotFound(ProviderId::from(uid))
}
