//! In-memory ledger store
//!
//! One mutex per provider guards that provider's wallet, credentials,
//! withdrawals and applied earnings together, so every operation on one
//! provider is serialized and multi-field updates are all-or-nothing.
//! Used for local development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{LedgerStore, not_found};
use crate::core_types::{ProviderId, Reference};
use crate::earnings::{AppliedEarning, EarningEntry, EarningKind};
use crate::money::Amount;
use crate::wallet::{Bucket, LedgerError, PayoutRecipient, ProviderAccount, Wallet};
use crate::withdrawal::{SettleOutcome, Settlement, WithdrawalRecord, WithdrawalStatus};

struct AccountState {
    account: ProviderAccount,
    withdrawals: HashMap<Reference, WithdrawalRecord>,
    /// Applied earnings and the amount each moved
    earnings: HashMap<(String, EarningKind), Amount>,
}

impl AccountState {
    fn new(uid: &str) -> Self {
        Self {
            account: ProviderAccount::new(uid),
            withdrawals: HashMap::new(),
            earnings: HashMap::new(),
        }
    }
}

type Slot = Arc<Mutex<AccountState>>;

#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<ProviderId, Slot>,
    by_reference: DashMap<Reference, ProviderId>,
    by_transfer_code: DashMap<String, Reference>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, uid: &str) -> Option<Slot> {
        self.accounts.get(uid).map(|e| e.value().clone())
    }

    fn slot_or_create(&self, uid: &str) -> Slot {
        self.accounts
            .entry(uid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AccountState::new(uid))))
            .value()
            .clone()
    }

    fn slot_for_reference(&self, reference: &Reference) -> Option<Slot> {
        let uid = self.by_reference.get(reference).map(|e| e.value().clone())?;
        self.slot(&uid)
    }

    fn all_slots(&self) -> Vec<Slot> {
        self.accounts.iter().map(|e| e.value().clone()).collect()
    }
}

// A panic while holding the lock cannot leave a half-applied update: every
// mutation computes new values first and assigns them last.
fn lock(slot: &Slot) -> MutexGuard<'_, AccountState> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn add(a: Amount, b: Amount) -> Result<Amount, LedgerError> {
    a.checked_add(b).ok_or(LedgerError::Overflow)
}

#[async_trait]
impl LedgerStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn account(&self, uid: &str) -> Result<Option<ProviderAccount>, LedgerError> {
        Ok(self.slot(uid).map(|slot| {
            let state = lock(&slot);
            state.account.clone()
        }))
    }

    async fn set_pin_hash(&self, uid: &str, pin_hash: &str) -> Result<(), LedgerError> {
        let slot = self.slot_or_create(uid);
        lock(&slot).account.pin_hash = Some(pin_hash.to_string());
        Ok(())
    }

    async fn set_recipient(
        &self,
        uid: &str,
        recipient: &PayoutRecipient,
    ) -> Result<(), LedgerError> {
        let slot = self.slot_or_create(uid);
        lock(&slot).account.recipient = Some(recipient.clone());
        Ok(())
    }

    async fn credit(
        &self,
        uid: &str,
        amount: Amount,
        bucket: Bucket,
    ) -> Result<Wallet, LedgerError> {
        let slot = self.slot_or_create(uid);
        let mut state = lock(&slot);
        let wallet = &mut state.account.wallet;
        match bucket {
            Bucket::Pending => wallet.pending = add(wallet.pending, amount)?,
            Bucket::Lifetime => wallet.lifetime = add(wallet.lifetime, amount)?,
        }
        Ok(*wallet)
    }

    async fn release(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError> {
        let slot = self.slot(uid).ok_or_else(|| not_found(uid))?;
        let mut state = lock(&slot);
        let wallet = &mut state.account.wallet;
        if wallet.pending < amount {
            return Err(LedgerError::InsufficientPending);
        }
        let available = add(wallet.available, amount)?;
        wallet.pending = Amount::new(wallet.pending.units() - amount.units());
        wallet.available = available;
        Ok(*wallet)
    }

    async fn reserve(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError> {
        let slot = self.slot(uid).ok_or_else(|| not_found(uid))?;
        let mut state = lock(&slot);
        let wallet = &mut state.account.wallet;
        if wallet.available < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        wallet.available = Amount::new(wallet.available.units() - amount.units());
        Ok(*wallet)
    }

    async fn refund(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError> {
        let slot = self.slot(uid).ok_or_else(|| not_found(uid))?;
        let mut state = lock(&slot);
        let wallet = &mut state.account.wallet;
        wallet.available = add(wallet.available, amount)?;
        Ok(*wallet)
    }

    async fn apply_earning(
        &self,
        entry: &EarningEntry,
    ) -> Result<Option<AppliedEarning>, LedgerError> {
        let not_accrued = || LedgerError::EarningNotAccrued(entry.booking_id.clone());
        let slot = match entry.kind {
            EarningKind::Accrued => self.slot_or_create(&entry.uid),
            EarningKind::Released => self.slot(&entry.uid).ok_or_else(not_accrued)?,
        };
        let mut state = lock(&slot);
        let key = (entry.booking_id.clone(), entry.kind);
        if state.earnings.contains_key(&key) {
            return Ok(None);
        }

        let wallet = state.account.wallet;
        let (updated, amount) = match entry.kind {
            EarningKind::Accrued => (
                Wallet {
                    pending: add(wallet.pending, entry.amount)?,
                    lifetime: add(wallet.lifetime, entry.amount)?,
                    ..wallet
                },
                entry.amount,
            ),
            EarningKind::Released => {
                let accrued = state
                    .earnings
                    .get(&(entry.booking_id.clone(), EarningKind::Accrued))
                    .copied()
                    .ok_or_else(not_accrued)?;
                if wallet.pending < accrued {
                    return Err(LedgerError::InsufficientPending);
                }
                (
                    Wallet {
                        pending: Amount::new(wallet.pending.units() - accrued.units()),
                        available: add(wallet.available, accrued)?,
                        ..wallet
                    },
                    accrued,
                )
            }
        };
        state.account.wallet = updated;
        state.earnings.insert(key, amount);
        Ok(Some(AppliedEarning {
            wallet: updated,
            amount,
        }))
    }

    async fn reserve_and_record(&self, record: &WithdrawalRecord) -> Result<Wallet, LedgerError> {
        let slot = self.slot(&record.uid).ok_or_else(|| not_found(&record.uid))?;
        let mut state = lock(&slot);

        if self.by_reference.contains_key(&record.reference) {
            return Err(LedgerError::DuplicateReference(record.reference.to_string()));
        }
        let wallet = &mut state.account.wallet;
        if wallet.available < record.total {
            return Err(LedgerError::InsufficientBalance);
        }
        wallet.available = Amount::new(wallet.available.units() - record.total.units());
        let after = *wallet;

        state
            .withdrawals
            .insert(record.reference.clone(), record.clone());
        self.by_reference
            .insert(record.reference.clone(), record.uid.clone());
        Ok(after)
    }

    async fn mark_submitted(
        &self,
        reference: &Reference,
        transfer_code: &str,
    ) -> Result<bool, LedgerError> {
        let slot = self
            .slot_for_reference(reference)
            .ok_or_else(|| LedgerError::WithdrawalNotFound(reference.to_string()))?;
        let mut state = lock(&slot);
        let record = state
            .withdrawals
            .get_mut(reference)
            .ok_or_else(|| LedgerError::WithdrawalNotFound(reference.to_string()))?;

        if record.transfer_code.is_none() {
            record.transfer_code = Some(transfer_code.to_string());
            self.by_transfer_code
                .insert(transfer_code.to_string(), reference.clone());
        }
        let moved = record.status == WithdrawalStatus::Initiating;
        if moved {
            record.status = WithdrawalStatus::Pending;
        }
        record.updated_at = Utc::now();
        Ok(moved)
    }

    async fn settle(
        &self,
        reference: &Reference,
        settlement: &Settlement,
    ) -> Result<SettleOutcome, LedgerError> {
        let slot = self
            .slot_for_reference(reference)
            .ok_or_else(|| LedgerError::WithdrawalNotFound(reference.to_string()))?;
        let mut state = lock(&slot);
        let current = state
            .withdrawals
            .get(reference)
            .cloned()
            .ok_or_else(|| LedgerError::WithdrawalNotFound(reference.to_string()))?;

        if current.status.is_terminal() {
            return Ok(SettleOutcome::AlreadyFinal(current));
        }

        let mut updated = current;
        updated.finalize(settlement, Utc::now());
        let wallet = state.account.wallet;
        let available = if settlement.status.refunds() {
            add(wallet.available, updated.total)?
        } else {
            wallet.available
        };

        state.account.wallet.available = available;
        if let Some(code) = &updated.transfer_code {
            self.by_transfer_code
                .entry(code.clone())
                .or_insert_with(|| reference.clone());
        }
        state.withdrawals.insert(reference.clone(), updated.clone());
        Ok(SettleOutcome::Applied(updated))
    }

    async fn withdrawal(
        &self,
        reference: &Reference,
    ) -> Result<Option<WithdrawalRecord>, LedgerError> {
        Ok(self
            .slot_for_reference(reference)
            .and_then(|slot| {
                let state = lock(&slot);
                state.withdrawals.get(reference).cloned()
            }))
    }

    async fn withdrawal_by_transfer_code(
        &self,
        transfer_code: &str,
    ) -> Result<Option<WithdrawalRecord>, LedgerError> {
        let reference = match self.by_transfer_code.get(transfer_code) {
            Some(e) => e.value().clone(),
            None => return Ok(None),
        };
        self.withdrawal(&reference).await
    }

    async fn withdrawals_for(
        &self,
        uid: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, LedgerError> {
        let Some(slot) = self.slot(uid) else {
            return Ok(Vec::new());
        };
        let mut records: Vec<WithdrawalRecord> =
            lock(&slot).withdrawals.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn find_stale(
        &self,
        status: WithdrawalStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, LedgerError> {
        let mut stale: Vec<WithdrawalRecord> = self
            .all_slots()
            .iter()
            .flat_map(|slot| {
                lock(slot)
                    .withdrawals
                    .values()
                    .filter(|r| r.status == status && r.updated_at < before)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn increment_retry(&self, reference: &Reference) -> Result<(), LedgerError> {
        let slot = self
            .slot_for_reference(reference)
            .ok_or_else(|| LedgerError::WithdrawalNotFound(reference.to_string()))?;
        let mut state = lock(&slot);
        if let Some(record) = state.withdrawals.get_mut(reference) {
            record.retry_count += 1;
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{PayoutMethod, Rail};

    fn record(uid: &str, total: i64) -> WithdrawalRecord {
        WithdrawalRecord::initiating(
            Reference::generate(),
            uid.to_string(),
            Amount::new(total - 20),
            Amount::new(20),
            Amount::new(total),
            PayoutMethod::Mobile,
            Rail::Paystack,
            "KENYA".to_string(),
        )
    }

    async fn funded(available: i64) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .credit("p1", Amount::new(available), Bucket::Pending)
            .await
            .unwrap();
        store.release("p1", Amount::new(available)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_reserve_and_record_is_all_or_nothing() {
        let store = funded(100).await;
        let too_big = record("p1", 150);
        assert_eq!(
            store.reserve_and_record(&too_big).await,
            Err(LedgerError::InsufficientBalance)
        );
        assert!(store.withdrawal(&too_big.reference).await.unwrap().is_none());
        assert_eq!(
            store.account("p1").await.unwrap().unwrap().wallet.available,
            Amount::new(100)
        );

        let ok = record("p1", 70);
        let wallet = store.reserve_and_record(&ok).await.unwrap();
        assert_eq!(wallet.available, Amount::new(30));
        assert!(store.withdrawal(&ok.reference).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = funded(500).await;
        let r = record("p1", 70);
        store.reserve_and_record(&r).await.unwrap();
        assert!(matches!(
            store.reserve_and_record(&r).await,
            Err(LedgerError::DuplicateReference(_))
        ));
        assert_eq!(
            store.account("p1").await.unwrap().unwrap().wallet.available,
            Amount::new(430)
        );
    }

    #[tokio::test]
    async fn test_settle_refunds_once() {
        let store = funded(100).await;
        let r = record("p1", 70);
        store.reserve_and_record(&r).await.unwrap();

        let first = store
            .settle(&r.reference, &Settlement::failed("transfer.failed"))
            .await
            .unwrap();
        assert!(first.applied());
        let second = store
            .settle(&r.reference, &Settlement::failed("transfer.failed"))
            .await
            .unwrap();
        assert!(!second.applied());

        let account = store.account("p1").await.unwrap().unwrap();
        assert_eq!(account.wallet.available, Amount::new(100));
        assert_eq!(second.record().status, WithdrawalStatus::Failed);
        assert!(second.record().failed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_submitted_after_final_keeps_status() {
        let store = funded(100).await;
        let r = record("p1", 70);
        store.reserve_and_record(&r).await.unwrap();
        store
            .settle(&r.reference, &Settlement::success(None))
            .await
            .unwrap();

        let moved = store.mark_submitted(&r.reference, "TRF_1").await.unwrap();
        assert!(!moved);
        let stored = store
            .withdrawal_by_transfer_code("TRF_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, WithdrawalStatus::Success);
    }

    #[tokio::test]
    async fn test_find_stale_filters_status_and_age() {
        let store = funded(1000).await;
        let a = record("p1", 100);
        let b = record("p1", 100);
        store.reserve_and_record(&a).await.unwrap();
        store.reserve_and_record(&b).await.unwrap();
        store.mark_submitted(&b.reference, "TRF_B").await.unwrap();

        let future = Utc::now() + chrono::Duration::seconds(5);
        let initiating = store
            .find_stale(WithdrawalStatus::Initiating, future, 10)
            .await
            .unwrap();
        assert_eq!(initiating.len(), 1);
        assert_eq!(initiating[0].reference, a.reference);

        let past = Utc::now() - chrono::Duration::seconds(60);
        assert!(
            store
                .find_stale(WithdrawalStatus::Initiating, past, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_release_moves_only_accrued_amount() {
        let store = MemoryStore::new();
        let accrue_a = EarningEntry {
            booking_id: "bk-a".to_string(),
            uid: "p1".to_string(),
            kind: EarningKind::Accrued,
            amount: Amount::new(500),
        };
        store.apply_earning(&accrue_a).await.unwrap();

        // bk-b was never accepted
        let release_b = EarningEntry {
            booking_id: "bk-b".to_string(),
            kind: EarningKind::Released,
            amount: Amount::new(500),
            ..accrue_a.clone()
        };
        assert_eq!(
            store.apply_earning(&release_b).await,
            Err(LedgerError::EarningNotAccrued("bk-b".to_string()))
        );

        let release_a = EarningEntry {
            kind: EarningKind::Released,
            amount: Amount::ZERO,
            ..accrue_a
        };
        let applied = store.apply_earning(&release_a).await.unwrap().unwrap();
        assert_eq!(applied.amount, Amount::new(500));
        assert_eq!(applied.wallet.pending, Amount::ZERO);
        assert_eq!(applied.wallet.available, Amount::new(500));
        assert!(store.apply_earning(&release_a).await.unwrap().is_none());
    }
}
