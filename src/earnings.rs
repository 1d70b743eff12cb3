//! Booking earnings
//!
//! Booking status transitions that move money:
//! - `accepted`: credit the provider's share to pending and lifetime
//! - `completed`: release the share accrued for that booking from pending
//!   to available. A booking that was never accepted releases nothing.
//!
//! Each (booking, transition) applies at most once, so redelivered booking
//! events are harmless.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::core_types::ProviderId;
use crate::money::Amount;
use crate::wallet::{LedgerError, Wallet, WalletLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Accepted,
    Rejected,
    Completed,
}

/// Ledger effect of a booking transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum EarningKind {
    /// pending += share, lifetime += share
    Accrued = 1,
    /// pending -= share, available += share
    Released = 2,
}

impl EarningKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EarningKind::Accrued => "ACCRUED",
            EarningKind::Released => "RELEASED",
        }
    }
}

impl fmt::Display for EarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarningEntry {
    pub booking_id: String,
    pub uid: ProviderId,
    pub kind: EarningKind,
    /// Share to accrue. Ignored for `Released`, which moves exactly the
    /// amount accrued for the same booking.
    pub amount: Amount,
}

/// Wallet after an earning, and the amount that moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedEarning {
    pub wallet: Wallet,
    pub amount: Amount,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingStatusChange {
    pub booking_id: String,
    pub provider_uid: ProviderId,
    pub total: Amount,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EarningsOutcome {
    Applied { kind: EarningKind, share: Amount, wallet: Wallet },
    AlreadyApplied { kind: EarningKind },
    /// Transition does not move money
    NoEffect,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EarningsError {
    #[error("Booking id is required")]
    MissingBookingId,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EarningsError {
    pub fn code(&self) -> &'static str {
        match self {
            EarningsError::MissingBookingId => "MISSING_BOOKING_ID",
            EarningsError::Ledger(e) => e.code(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            EarningsError::MissingBookingId => 400,
            EarningsError::Ledger(e) => e.http_status(),
        }
    }
}

pub struct EarningsService {
    ledger: Arc<WalletLedger>,
    credit_fraction_bps: u32,
}

impl EarningsService {
    pub fn new(ledger: Arc<WalletLedger>, credit_fraction_bps: u32) -> Self {
        Self {
            ledger,
            credit_fraction_bps,
        }
    }

    /// Provider's share of a booking total, floored to whole units.
    pub fn share_of(&self, total: Amount) -> Amount {
        total.share_bps(self.credit_fraction_bps)
    }

    pub async fn apply(&self, change: &BookingStatusChange) -> Result<EarningsOutcome, EarningsError> {
        if change.booking_id.trim().is_empty() {
            return Err(EarningsError::MissingBookingId);
        }
        let kind = match change.status {
            BookingStatus::Accepted => EarningKind::Accrued,
            BookingStatus::Completed => EarningKind::Released,
            other => {
                debug!(booking_id = %change.booking_id, status = ?other, "Booking transition has no ledger effect");
                return Ok(EarningsOutcome::NoEffect);
            }
        };

        // Released amounts come from the stored accrual, not from this event
        let share = match kind {
            EarningKind::Accrued => self.share_of(change.total),
            EarningKind::Released => Amount::ZERO,
        };
        if kind == EarningKind::Accrued && !share.is_positive() {
            return Ok(EarningsOutcome::NoEffect);
        }

        let entry = EarningEntry {
            booking_id: change.booking_id.clone(),
            uid: change.provider_uid.clone(),
            kind,
            amount: share,
        };

        match self.ledger.apply_earning(&entry).await? {
            Some(AppliedEarning { wallet, amount }) => {
                info!(
                    booking_id = %entry.booking_id,
                    uid = %entry.uid,
                    kind = %kind,
                    share = %amount,
                    "Booking earning applied"
                );
                Ok(EarningsOutcome::Applied {
                    kind,
                    share: amount,
                    wallet,
                })
            }
            None => {
                debug!(booking_id = %entry.booking_id, kind = %kind, "Booking earning already applied");
                Ok(EarningsOutcome::AlreadyApplied { kind })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> (EarningsService, Arc<WalletLedger>) {
        let ledger = Arc::new(WalletLedger::new(Arc::new(MemoryStore::new())));
        (EarningsService::new(ledger.clone(), 5_000), ledger)
    }

    fn change(status: BookingStatus) -> BookingStatusChange {
        BookingStatusChange {
            booking_id: "b-1".to_string(),
            provider_uid: "prov-1".to_string(),
            total: Amount::new(1001),
            status,
        }
    }

    #[tokio::test]
    async fn test_accept_then_complete() {
        let (svc, ledger) = service();

        let out = svc.apply(&change(BookingStatus::Accepted)).await.unwrap();
        assert!(matches!(out, EarningsOutcome::Applied { share, .. } if share == Amount::new(500)));
        let w = ledger.balance("prov-1").await.unwrap();
        assert_eq!(w.pending, Amount::new(500));
        assert_eq!(w.lifetime, Amount::new(500));
        assert_eq!(w.available, Amount::ZERO);

        svc.apply(&change(BookingStatus::Completed)).await.unwrap();
        let w = ledger.balance("prov-1").await.unwrap();
        assert_eq!(w.pending, Amount::ZERO);
        assert_eq!(w.available, Amount::new(500));
        assert_eq!(w.lifetime, Amount::new(500));
    }

    #[tokio::test]
    async fn test_redelivered_transition_applies_once() {
        let (svc, ledger) = service();
        svc.apply(&change(BookingStatus::Accepted)).await.unwrap();
        let again = svc.apply(&change(BookingStatus::Accepted)).await.unwrap();
        assert_eq!(
            again,
            EarningsOutcome::AlreadyApplied {
                kind: EarningKind::Accrued
            }
        );
        assert_eq!(
            ledger.balance("prov-1").await.unwrap().lifetime,
            Amount::new(500)
        );
    }

    #[tokio::test]
    async fn test_completion_without_accrual_is_rejected() {
        let (svc, ledger) = service();
        svc.apply(&change(BookingStatus::Accepted)).await.unwrap();

        let mut other = change(BookingStatus::Completed);
        other.booking_id = "b-2".to_string();
        let err = svc.apply(&other).await.unwrap_err();
        assert_eq!(
            err,
            EarningsError::Ledger(LedgerError::EarningNotAccrued("b-2".to_string()))
        );

        // The accrued booking still releases in full
        let w = ledger.balance("prov-1").await.unwrap();
        assert_eq!(w.pending, Amount::new(500));
        assert_eq!(w.available, Amount::ZERO);
        svc.apply(&change(BookingStatus::Completed)).await.unwrap();
        assert_eq!(ledger.balance("prov-1").await.unwrap().available, Amount::new(500));
    }

    #[tokio::test]
    async fn test_release_uses_accrued_amount() {
        let (svc, ledger) = service();
        svc.apply(&change(BookingStatus::Accepted)).await.unwrap();

        // Completion reports a different total; the accrued 500 moves
        let mut completed = change(BookingStatus::Completed);
        completed.total = Amount::new(4000);
        let out = svc.apply(&completed).await.unwrap();
        assert!(matches!(out, EarningsOutcome::Applied { share, .. } if share == Amount::new(500)));

        let w = ledger.balance("prov-1").await.unwrap();
        assert_eq!(w.pending, Amount::ZERO);
        assert_eq!(w.available, Amount::new(500));
    }

    #[tokio::test]
    async fn test_completion_for_other_provider_is_rejected() {
        let (svc, ledger) = service();
        svc.apply(&change(BookingStatus::Accepted)).await.unwrap();
        ledger
            .credit("prov-2", Amount::new(300), crate::wallet::Bucket::Pending)
            .await
            .unwrap();

        let mut hijack = change(BookingStatus::Completed);
        hijack.provider_uid = "prov-2".to_string();
        let err = svc.apply(&hijack).await.unwrap_err();
        assert!(matches!(err, EarningsError::Ledger(LedgerError::EarningNotAccrued(_))));
        assert_eq!(ledger.balance("prov-2").await.unwrap().pending, Amount::new(300));
    }

    #[tokio::test]
    async fn test_other_statuses_ignored() {
        let (svc, _) = service();
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Rejected,
        ] {
            assert_eq!(svc.apply(&change(status)).await.unwrap(), EarningsOutcome::NoEffect);
        }
    }
}
