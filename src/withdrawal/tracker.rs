//! Withdrawal Request Tracker
//!
//! Owns the withdrawal lifecycle from request to gateway hand-off:
//!
//! ```text
//! verify PIN -> fee -> reserve + INITIATING record -> gateway
//!     accepted        -> PENDING (transfer code stored)
//!     definitive no   -> FAILED + refund
//!     timeout/unknown -> stays INITIATING for reconciliation
//! ```
//!
//! The wallet is debited before the gateway is called, so a concurrent
//! request can never spend the same balance twice.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::WithdrawError;
use super::pin;
use super::{Settlement, WithdrawalRecord, WithdrawalStatus};
use crate::core_types::{PayoutMethod, Reference};
use crate::fee::FeeSchedule;
use crate::money::Amount;
use crate::payout::{PayoutError, PayoutRequest, PayoutRouter, TransferLookup};
use crate::wallet::WalletLedger;

pub struct WithdrawalTracker {
    ledger: Arc<WalletLedger>,
    fees: Arc<FeeSchedule>,
    router: PayoutRouter,
    region: String,
    transfer_reason: String,
}

impl WithdrawalTracker {
    pub fn new(
        ledger: Arc<WalletLedger>,
        fees: Arc<FeeSchedule>,
        router: PayoutRouter,
        region: impl Into<String>,
        transfer_reason: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            fees,
            router,
            region: region.into(),
            transfer_reason: transfer_reason.into(),
        }
    }

    pub fn ledger(&self) -> &Arc<WalletLedger> {
        &self.ledger
    }

    pub fn router(&self) -> &PayoutRouter {
        &self.router
    }

    /// Request a payout of `amount` to the provider's registered recipient.
    pub async fn initiate(
        &self,
        uid: &str,
        amount: Amount,
        method: PayoutMethod,
        pin: &str,
    ) -> Result<WithdrawalRecord, WithdrawError> {
        if !amount.is_positive() {
            return Err(WithdrawError::InvalidAmount);
        }

        let account = self
            .ledger
            .account(uid)
            .await?
            .ok_or_else(|| WithdrawError::ProviderNotFound(uid.to_string()))?;

        let pin_ok = account
            .pin_hash
            .as_deref()
            .is_some_and(|hash| pin::verify_pin(pin, hash));
        if !pin_ok {
            warn!(uid = %uid, "Withdrawal rejected: invalid PIN");
            return Err(WithdrawError::InvalidPin);
        }

        let fee = self.fees.fee(amount, method, &self.region)?;
        let total = amount
            .checked_add(fee)
            .ok_or(WithdrawError::InvalidAmount)?;

        let gateway = self
            .router
            .for_method(method)
            .map_err(|e| WithdrawError::TransferInitiationFailed(e.to_string()))?;
        let recipient = account
            .recipient
            .filter(|r| r.method == method && gateway.recipient_ready(r))
            .ok_or(WithdrawError::NoPayoutRecipient)?;

        let record = WithdrawalRecord::initiating(
            Reference::generate(),
            uid.to_string(),
            amount,
            fee,
            total,
            method,
            gateway.rail(),
            self.region.clone(),
        );
        self.ledger.reserve_for_withdrawal(&record).await?;

        let request = PayoutRequest {
            reference: record.reference.clone(),
            uid: record.uid.clone(),
            amount: total,
            requested: amount,
            fee,
            recipient,
            reason: self.transfer_reason.clone(),
        };

        match gateway.initiate(&request).await {
            Ok(receipt) => {
                // The transfer is live; a storage hiccup here must not look like a failure
                if let Err(e) = self
                    .ledger
                    .mark_submitted(&record.reference, &receipt.transfer_code)
                    .await
                {
                    error!(
                        reference = %record.reference,
                        transfer_code = %receipt.transfer_code,
                        error = %e,
                        "Failed to store transfer code"
                    );
                }
                Ok(self.current(record, Some(receipt.transfer_code)).await)
            }
            Err(e) if e.is_definitive() => {
                warn!(
                    reference = %record.reference,
                    uid = %uid,
                    error = %e,
                    "Gateway rejected withdrawal, refunding"
                );
                if let Err(settle_err) = self
                    .ledger
                    .settle(&record.reference, &Settlement::failed(e.to_string()))
                    .await
                {
                    // Recovery finds the INITIATING record and retries the refund
                    error!(
                        reference = %record.reference,
                        error = %settle_err,
                        "Refund after rejection failed"
                    );
                }
                Err(WithdrawError::TransferInitiationFailed(rejection_message(&e)))
            }
            Err(e) => {
                warn!(
                    reference = %record.reference,
                    uid = %uid,
                    error = %e,
                    "Gateway outcome unknown, withdrawal left for reconciliation"
                );
                Err(WithdrawError::GatewayTimeout {
                    reference: record.reference,
                })
            }
        }
    }

    /// Re-read after hand-off; a webhook may already have finalized it.
    async fn current(
        &self,
        mut record: WithdrawalRecord,
        transfer_code: Option<String>,
    ) -> WithdrawalRecord {
        match self.ledger.withdrawal(&record.reference).await {
            Ok(Some(stored)) => stored,
            Ok(None) | Err(_) => {
                record.status = WithdrawalStatus::Pending;
                record.transfer_code = transfer_code;
                record
            }
        }
    }

    pub async fn get(&self, reference: &Reference) -> Result<WithdrawalRecord, WithdrawError> {
        self.ledger
            .withdrawal(reference)
            .await?
            .ok_or_else(|| WithdrawError::WithdrawalNotFound(reference.to_string()))
    }

    /// Newest first
    pub async fn history(
        &self,
        uid: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, WithdrawError> {
        Ok(self.ledger.withdrawals_for(uid, limit).await?)
    }

    /// Ask the rail about an unresolved withdrawal and apply the answer.
    /// Returns true when the record advanced.
    pub async fn resolve(&self, record: &WithdrawalRecord) -> Result<bool, WithdrawError> {
        let lookup = match self.router.gateway(record.rail) {
            Ok(gateway) => gateway.lookup(&record.reference).await,
            Err(e) => Err(e),
        };

        let advanced = match lookup {
            Ok(TransferLookup::NotFound) if record.status == WithdrawalStatus::Initiating => {
                // References are single-use, so the transfer can no longer appear
                self.ledger
                    .settle(
                        &record.reference,
                        &Settlement::failed("transfer never reached the gateway"),
                    )
                    .await?
                    .applied()
            }
            Ok(TransferLookup::Pending {
                transfer_code: Some(code),
            }) if record.status == WithdrawalStatus::Initiating => {
                self.ledger.mark_submitted(&record.reference, &code).await?
            }
            Ok(TransferLookup::Succeeded { transfer_code }) => self
                .ledger
                .settle(&record.reference, &Settlement::success(transfer_code))
                .await?
                .applied(),
            Ok(TransferLookup::Failed { reason }) => self
                .ledger
                .settle(&record.reference, &Settlement::failed(reason))
                .await?
                .applied(),
            Ok(other) => {
                debug!(reference = %record.reference, lookup = ?other, "Withdrawal still unresolved");
                self.ledger.increment_retry(&record.reference).await?;
                false
            }
            Err(e) => {
                warn!(reference = %record.reference, rail = %record.rail, error = %e, "Transfer lookup failed");
                self.ledger.increment_retry(&record.reference).await?;
                false
            }
        };

        if advanced {
            info!(reference = %record.reference, from = %record.status, "Withdrawal resolved by lookup");
        }
        Ok(advanced)
    }
}

fn rejection_message(e: &PayoutError) -> String {
    match e {
        PayoutError::Rejected { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Rail;
    use crate::payout::mock::{MockBehavior, MockGateway};
    use crate::store::MemoryStore;
    use crate::wallet::{Bucket, PayoutRecipient};

    struct Fixture {
        tracker: WithdrawalTracker,
        gateway: Arc<MockGateway>,
    }

    async fn fixture(balance: i64) -> Fixture {
        let ledger = Arc::new(WalletLedger::new(Arc::new(MemoryStore::new())));
        let gateway = Arc::new(MockGateway::new(Rail::Paystack));
        let router = PayoutRouter::new(Rail::Paystack, Rail::Paystack).with_gateway(gateway.clone());
        let tracker = WithdrawalTracker::new(
            ledger.clone(),
            Arc::new(FeeSchedule::default()),
            router,
            "KENYA",
            "Provider withdrawal",
        );

        ledger
            .set_pin_hash("p1", &pin::hash_pin("2468").unwrap())
            .await
            .unwrap();
        ledger
            .set_recipient(
                "p1",
                &PayoutRecipient {
                    method: PayoutMethod::Mobile,
                    rail: Rail::Paystack,
                    name: "Jane".to_string(),
                    account_number: "0712345678".to_string(),
                    bank_code: Some("MPESA".to_string()),
                    recipient_code: Some("RCP_p1".to_string()),
                },
            )
            .await
            .unwrap();
        if balance > 0 {
            ledger
                .credit("p1", Amount::new(balance), Bucket::Pending)
                .await
                .unwrap();
            ledger.release("p1", Amount::new(balance)).await.unwrap();
        }
        Fixture { tracker, gateway }
    }

    async fn available(f: &Fixture) -> Amount {
        f.tracker.ledger().balance("p1").await.unwrap().available
    }

    #[tokio::test]
    async fn test_initiate_debits_total_and_sends_total() {
        let f = fixture(100).await;
        let record = f
            .tracker
            .initiate("p1", Amount::new(50), PayoutMethod::Mobile, "2468")
            .await
            .unwrap();

        assert_eq!(record.fee, Amount::new(20));
        assert_eq!(record.total, Amount::new(70));
        assert_eq!(record.status, WithdrawalStatus::Pending);
        assert_eq!(
            record.transfer_code,
            Some(MockGateway::transfer_code_for(&record.reference))
        );
        assert_eq!(available(&f).await, Amount::new(30));

        let sent = f.gateway.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].amount, Amount::new(70));
        assert_eq!(sent[0].requested, Amount::new(50));
        assert_eq!(sent[0].fee, Amount::new(20));
    }

    #[tokio::test]
    async fn test_wrong_pin_changes_nothing() {
        let f = fixture(100).await;
        let err = f
            .tracker
            .initiate("p1", Amount::new(50), PayoutMethod::Mobile, "0000")
            .await
            .unwrap_err();
        assert_eq!(err, WithdrawError::InvalidPin);
        assert_eq!(err.http_status(), 401);
        assert_eq!(available(&f).await, Amount::new(100));
        assert!(f.tracker.history("p1", 50).await.unwrap().is_empty());
        assert_eq!(f.gateway.initiate_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let f = fixture(0).await;
        let err = f
            .tracker
            .initiate("ghost", Amount::new(50), PayoutMethod::Mobile, "2468")
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::ProviderNotFound(_)));
    }

    #[tokio::test]
    async fn test_insufficient_balance_never_calls_gateway() {
        let f = fixture(60).await;
        let err = f
            .tracker
            .initiate("p1", Amount::new(50), PayoutMethod::Mobile, "2468")
            .await
            .unwrap_err();
        assert_eq!(err, WithdrawError::InsufficientBalance);
        assert_eq!(f.gateway.initiate_count(), 0);
        assert_eq!(available(&f).await, Amount::new(60));
    }

    #[tokio::test]
    async fn test_method_without_recipient() {
        let f = fixture(100).await;
        let err = f
            .tracker
            .initiate("p1", Amount::new(50), PayoutMethod::Bank, "2468")
            .await
            .unwrap_err();
        assert_eq!(err, WithdrawError::NoPayoutRecipient);
    }

    #[tokio::test]
    async fn test_rejection_refunds() {
        let f = fixture(100).await;
        f.gateway
            .set_behavior(MockBehavior::Reject("Insufficient merchant balance".into()));
        let err = f
            .tracker
            .initiate("p1", Amount::new(50), PayoutMethod::Mobile, "2468")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WithdrawError::TransferInitiationFailed("Insufficient merchant balance".into())
        );
        assert_eq!(available(&f).await, Amount::new(100));

        let history = f.tracker.history("p1", 50).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, WithdrawalStatus::Failed);
        assert!(history[0].failed_at.is_some());
    }

    #[tokio::test]
    async fn test_timeout_keeps_reservation() {
        let f = fixture(100).await;
        f.gateway.set_behavior(MockBehavior::Timeout);
        let err = f
            .tracker
            .initiate("p1", Amount::new(50), PayoutMethod::Mobile, "2468")
            .await
            .unwrap_err();
        let WithdrawError::GatewayTimeout { reference } = err else {
            panic!("expected timeout, got {:?}", err);
        };
        let record = f.tracker.get(&reference).await.unwrap();
        assert_eq!(record.status, WithdrawalStatus::Initiating);
        assert_eq!(available(&f).await, Amount::new(30));
    }

    #[tokio::test]
    async fn test_resolve_not_found_refunds_initiating() {
        let f = fixture(100).await;
        f.gateway.set_behavior(MockBehavior::Timeout);
        let Err(WithdrawError::GatewayTimeout { reference }) = f
            .tracker
            .initiate("p1", Amount::new(50), PayoutMethod::Mobile, "2468")
            .await
        else {
            panic!("expected timeout");
        };

        f.gateway.set_lookup(Ok(TransferLookup::NotFound));
        let record = f.tracker.get(&reference).await.unwrap();
        assert!(f.tracker.resolve(&record).await.unwrap());
        assert_eq!(
            f.tracker.get(&reference).await.unwrap().status,
            WithdrawalStatus::Failed
        );
        assert_eq!(available(&f).await, Amount::new(100));
    }

    #[tokio::test]
    async fn test_resolve_unknown_increments_retry() {
        let f = fixture(100).await;
        let record = f
            .tracker
            .initiate("p1", Amount::new(50), PayoutMethod::Mobile, "2468")
            .await
            .unwrap();
        f.gateway.set_lookup(Ok(TransferLookup::Unknown));
        assert!(!f.tracker.resolve(&record).await.unwrap());
        let stored = f.tracker.get(&record.reference).await.unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.status, WithdrawalStatus::Pending);
    }

    #[tokio::test]
    async fn test_get_unknown_reference() {
        let f = fixture(0).await;
        let err = f.tracker.get(&Reference::from("nope")).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }
}
