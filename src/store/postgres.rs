//! PostgreSQL ledger store
//!
//! Balance changes are single conditional `UPDATE ... RETURNING` statements,
//! so the row lock serializes concurrent operations on one provider and the
//! `CHECK (available >= 0)` constraint backs the conditional guard.
//! Multi-row operations (reserve + record, settle + refund, earning + wallet)
//! run in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use std::sync::Arc;

use super::{LedgerStore, not_found};
use crate::core_types::{PayoutMethod, Rail, Reference};
use crate::db::Database;
use crate::earnings::{AppliedEarning, EarningEntry, EarningKind};
use crate::money::Amount;
use crate::wallet::{Bucket, LedgerError, PayoutRecipient, ProviderAccount, Wallet};
use crate::withdrawal::{SettleOutcome, Settlement, WithdrawalRecord, WithdrawalStatus};

const WITHDRAWAL_COLUMNS: &str = "reference, uid, amount, fee, total, method, rail, region, \
     status, transfer_code, failure_reason, retry_count, created_at, updated_at, \
     completed_at, failed_at";

const WALLET_COLUMNS: &str = "available, pending, lifetime";

pub struct PgStore {
    db: Arc<Database>,
}

impl PgStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn row_to_wallet(row: &PgRow) -> Result<Wallet, LedgerError> {
        Ok(Wallet {
            available: Amount::new(row.try_get("available")?),
            pending: Amount::new(row.try_get("pending")?),
            lifetime: Amount::new(row.try_get("lifetime")?),
        })
    }

    fn row_to_record(row: &PgRow) -> Result<WithdrawalRecord, LedgerError> {
        let status_id: i16 = row.try_get("status")?;
        let method_id: i16 = row.try_get("method")?;
        let rail_id: i16 = row.try_get("rail")?;
        let reference: String = row.try_get("reference")?;

        Ok(WithdrawalRecord {
            reference: Reference::from(reference),
            uid: row.try_get("uid")?,
            amount: Amount::new(row.try_get("amount")?),
            fee: Amount::new(row.try_get("fee")?),
            total: Amount::new(row.try_get("total")?),
            method: PayoutMethod::from_id(method_id)
                .ok_or_else(|| LedgerError::Storage(format!("Unknown method id: {}", method_id)))?,
            rail: Rail::from_id(rail_id)
                .ok_or_else(|| LedgerError::Storage(format!("Unknown rail id: {}", rail_id)))?,
            region: row.try_get("region")?,
            status: WithdrawalStatus::from_id(status_id)
                .ok_or_else(|| LedgerError::Storage(format!("Unknown status id: {}", status_id)))?,
            transfer_code: row.try_get("transfer_code")?,
            failure_reason: row.try_get("failure_reason")?,
            retry_count: row.try_get("retry_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
            failed_at: row.try_get("failed_at")?,
        })
    }

    async fn wallet_exists(
        tx: &mut Transaction<'_, Postgres>,
        uid: &str,
    ) -> Result<bool, LedgerError> {
        let found = sqlx::query_scalar::<_, i32>("SELECT 1 FROM provider_wallets_tb WHERE uid = $1")
            .bind(uid)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(found.is_some())
    }

    /// Conditional decrement of `column` inside `tx`. Maps a missed guard to
    /// `insufficient` or ProviderNotFound.
    async fn guarded_move(
        tx: &mut Transaction<'_, Postgres>,
        sql: &str,
        uid: &str,
        amount: Amount,
        insufficient: LedgerError,
    ) -> Result<Wallet, LedgerError> {
        let row = sqlx::query(sql)
            .bind(amount.units())
            .bind(uid)
            .fetch_optional(&mut **tx)
            .await?;
        if let Some(row) = row {
            return Self::row_to_wallet(&row);
        }
        if Self::wallet_exists(tx, uid).await? {
            Err(insufficient)
        } else {
            Err(not_found(uid))
        }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

const RESERVE_SQL: &str = "UPDATE provider_wallets_tb \
     SET available = available - $1, updated_at = NOW() \
     WHERE uid = $2 AND available >= $1 \
     RETURNING available, pending, lifetime";

const RELEASE_SQL: &str = "UPDATE provider_wallets_tb \
     SET pending = pending - $1, available = available + $1, updated_at = NOW() \
     WHERE uid = $2 AND pending >= $1 \
     RETURNING available, pending, lifetime";

#[async_trait]
impl LedgerStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> Result<(), LedgerError> {
        Ok(self.db.health_check().await?)
    }

    async fn account(&self, uid: &str) -> Result<Option<ProviderAccount>, LedgerError> {
        let row = sqlx::query(
            "SELECT uid, available, pending, lifetime, pin_hash, recipient \
             FROM provider_wallets_tb WHERE uid = $1",
        )
        .bind(uid)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let recipient: Option<String> = row.try_get("recipient")?;
        let recipient = match recipient {
            Some(json) => Some(
                serde_json::from_str::<PayoutRecipient>(&json)
                    .map_err(|e| LedgerError::Storage(format!("Corrupt recipient: {}", e)))?,
            ),
            None => None,
        };

        Ok(Some(ProviderAccount {
            uid: row.try_get("uid")?,
            wallet: Self::row_to_wallet(&row)?,
            pin_hash: row.try_get("pin_hash")?,
            recipient,
        }))
    }

    async fn set_pin_hash(&self, uid: &str, pin_hash: &str) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO provider_wallets_tb (uid, pin_hash) VALUES ($1, $2) \
             ON CONFLICT (uid) DO UPDATE SET pin_hash = EXCLUDED.pin_hash, updated_at = NOW()",
        )
        .bind(uid)
        .bind(pin_hash)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn set_recipient(
        &self,
        uid: &str,
        recipient: &PayoutRecipient,
    ) -> Result<(), LedgerError> {
        let json = serde_json::to_string(recipient)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO provider_wallets_tb (uid, recipient) VALUES ($1, $2) \
             ON CONFLICT (uid) DO UPDATE SET recipient = EXCLUDED.recipient, updated_at = NOW()",
        )
        .bind(uid)
        .bind(json)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn credit(
        &self,
        uid: &str,
        amount: Amount,
        bucket: Bucket,
    ) -> Result<Wallet, LedgerError> {
        let column = match bucket {
            Bucket::Pending => "pending",
            Bucket::Lifetime => "lifetime",
        };
        let sql = format!(
            "INSERT INTO provider_wallets_tb (uid, {col}) VALUES ($1, $2) \
             ON CONFLICT (uid) DO UPDATE \
             SET {col} = provider_wallets_tb.{col} + EXCLUDED.{col}, updated_at = NOW() \
             RETURNING {ret}",
            col = column,
            ret = WALLET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(uid)
            .bind(amount.units())
            .fetch_one(self.db.pool())
            .await?;
        Self::row_to_wallet(&row)
    }

    async fn release(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError> {
        let mut tx = self.db.pool().begin().await?;
        let wallet =
            Self::guarded_move(&mut tx, RELEASE_SQL, uid, amount, LedgerError::InsufficientPending)
                .await?;
        tx.commit().await?;
        Ok(wallet)
    }

    async fn reserve(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError> {
        let mut tx = self.db.pool().begin().await?;
        let wallet =
            Self::guarded_move(&mut tx, RESERVE_SQL, uid, amount, LedgerError::InsufficientBalance)
                .await?;
        tx.commit().await?;
        Ok(wallet)
    }

    async fn refund(&self, uid: &str, amount: Amount) -> Result<Wallet, LedgerError> {
        let row = sqlx::query(
            "UPDATE provider_wallets_tb SET available = available + $1, updated_at = NOW() \
             WHERE uid = $2 RETURNING available, pending, lifetime",
        )
        .bind(amount.units())
        .bind(uid)
        .fetch_optional(self.db.pool())
        .await?;
        match row {
            Some(row) => Self::row_to_wallet(&row),
            None => Err(not_found(uid)),
        }
    }

    async fn apply_earning(
        &self,
        entry: &EarningEntry,
    ) -> Result<Option<AppliedEarning>, LedgerError> {
        let mut tx = self.db.pool().begin().await?;

        // Released moves what was accrued for this booking and provider
        let amount = match entry.kind {
            EarningKind::Accrued => entry.amount,
            EarningKind::Released => {
                let accrued: Option<i64> = sqlx::query_scalar(
                    "SELECT amount FROM booking_earnings_tb \
                     WHERE booking_id = $1 AND kind = $2 AND uid = $3 FOR SHARE",
                )
                .bind(&entry.booking_id)
                .bind(EarningKind::Accrued.id())
                .bind(&entry.uid)
                .fetch_optional(&mut *tx)
                .await?;
                Amount::new(
                    accrued.ok_or_else(|| LedgerError::EarningNotAccrued(entry.booking_id.clone()))?,
                )
            }
        };

        let inserted = sqlx::query(
            "INSERT INTO booking_earnings_tb (booking_id, kind, uid, amount) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (booking_id, kind) DO NOTHING",
        )
        .bind(&entry.booking_id)
        .bind(entry.kind.id())
        .bind(&entry.uid)
        .bind(amount.units())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let wallet = match entry.kind {
            EarningKind::Accrued => {
                let row = sqlx::query(
                    "INSERT INTO provider_wallets_tb (uid, pending, lifetime) VALUES ($1, $2, $2) \
                     ON CONFLICT (uid) DO UPDATE \
                     SET pending = provider_wallets_tb.pending + EXCLUDED.pending, \
                         lifetime = provider_wallets_tb.lifetime + EXCLUDED.lifetime, \
                         updated_at = NOW() \
                     RETURNING available, pending, lifetime",
                )
                .bind(&entry.uid)
                .bind(amount.units())
                .fetch_one(&mut *tx)
                .await?;
                Self::row_to_wallet(&row)?
            }
            // Dropping tx on error rolls back the earnings row too
            EarningKind::Released => {
                Self::guarded_move(
                    &mut tx,
                    RELEASE_SQL,
                    &entry.uid,
                    amount,
                    LedgerError::InsufficientPending,
                )
                .await?
            }
        };

        tx.commit().await?;
        Ok(Some(AppliedEarning { wallet, amount }))
    }

    async fn reserve_and_record(&self, record: &WithdrawalRecord) -> Result<Wallet, LedgerError> {
        let mut tx = self.db.pool().begin().await?;

        let wallet = Self::guarded_move(
            &mut tx,
            RESERVE_SQL,
            &record.uid,
            record.total,
            LedgerError::InsufficientBalance,
        )
        .await?;

        let insert = sqlx::query(&format!(
            "INSERT INTO withdrawals_tb ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            WITHDRAWAL_COLUMNS
        ))
        .bind(record.reference.as_str())
        .bind(&record.uid)
        .bind(record.amount.units())
        .bind(record.fee.units())
        .bind(record.total.units())
        .bind(record.method.id())
        .bind(record.rail.id())
        .bind(&record.region)
        .bind(record.status.id())
        .bind(&record.transfer_code)
        .bind(&record.failure_reason)
        .bind(record.retry_count)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .bind(record.failed_at)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(LedgerError::DuplicateReference(record.reference.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        Ok(wallet)
    }

    async fn mark_submitted(
        &self,
        reference: &Reference,
        transfer_code: &str,
    ) -> Result<bool, LedgerError> {
        let previous: Option<i16> = sqlx::query_scalar(
            r#"
            WITH prev AS (
                SELECT reference, status FROM withdrawals_tb WHERE reference = $2 FOR UPDATE
            )
            UPDATE withdrawals_tb w
            SET transfer_code = COALESCE(w.transfer_code, $1),
                status = CASE WHEN w.status = 0 THEN 10::smallint ELSE w.status END,
                updated_at = NOW()
            FROM prev
            WHERE w.reference = prev.reference
            RETURNING prev.status
            "#,
        )
        .bind(transfer_code)
        .bind(reference.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        match previous {
            Some(status) => Ok(status == WithdrawalStatus::Initiating.id()),
            None => Err(LedgerError::WithdrawalNotFound(reference.to_string())),
        }
    }

    async fn settle(
        &self,
        reference: &Reference,
        settlement: &Settlement,
    ) -> Result<SettleOutcome, LedgerError> {
        let now = Utc::now();
        let (completed_at, failed_at) = if settlement.status == WithdrawalStatus::Success {
            (Some(now), None)
        } else {
            (None, Some(now))
        };

        let mut tx = self.db.pool().begin().await?;

        // CAS: only open records (INITIATING, PENDING) can settle
        let row = sqlx::query(&format!(
            "UPDATE withdrawals_tb \
             SET status = $1, \
                 failure_reason = COALESCE($2, failure_reason), \
                 transfer_code = COALESCE(transfer_code, $3), \
                 completed_at = COALESCE($4, completed_at), \
                 failed_at = COALESCE($5, failed_at), \
                 updated_at = $6 \
             WHERE reference = $7 AND status IN (0, 10) \
             RETURNING {}",
            WITHDRAWAL_COLUMNS
        ))
        .bind(settlement.status.id())
        .bind(&settlement.reason)
        .bind(&settlement.transfer_code)
        .bind(completed_at)
        .bind(failed_at)
        .bind(now)
        .bind(reference.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return match self.withdrawal(reference).await? {
                Some(record) => Ok(SettleOutcome::AlreadyFinal(record)),
                None => Err(LedgerError::WithdrawalNotFound(reference.to_string())),
            };
        };
        let record = Self::row_to_record(&row)?;

        if settlement.status.refunds() {
            sqlx::query(
                "UPDATE provider_wallets_tb SET available = available + $1, updated_at = NOW() \
                 WHERE uid = $2",
            )
            .bind(record.total.units())
            .bind(&record.uid)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(SettleOutcome::Applied(record))
    }

    async fn withdrawal(
        &self,
        reference: &Reference,
    ) -> Result<Option<WithdrawalRecord>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM withdrawals_tb WHERE reference = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(reference.as_str())
        .fetch_optional(self.db.pool())
        .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn withdrawal_by_transfer_code(
        &self,
        transfer_code: &str,
    ) -> Result<Option<WithdrawalRecord>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM withdrawals_tb WHERE transfer_code = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(transfer_code)
        .fetch_optional(self.db.pool())
        .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn withdrawals_for(
        &self,
        uid: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM withdrawals_tb WHERE uid = $1 ORDER BY created_at DESC LIMIT $2",
            WITHDRAWAL_COLUMNS
        ))
        .bind(uid)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn find_stale(
        &self,
        status: WithdrawalStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM withdrawals_tb \
             WHERE status = $1 AND updated_at < $2 \
             ORDER BY updated_at ASC LIMIT $3",
            WITHDRAWAL_COLUMNS
        ))
        .bind(status.id())
        .bind(before)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn increment_retry(&self, reference: &Reference) -> Result<(), LedgerError> {
        sqlx::query(
            "UPDATE withdrawals_tb SET retry_count = retry_count + 1, updated_at = NOW() \
             WHERE reference = $1",
        )
        .bind(reference.as_str())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}
