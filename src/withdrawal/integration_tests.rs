//! Integration Tests for the withdrawal lifecycle
//!
//! Tracker, reconciler and recovery worker wired together over the
//! in-memory store, with the mock gateway standing in for the rail.

use std::sync::Arc;

use crate::config::WebhookConfig;
use crate::core_types::{PayoutMethod, Rail};
use crate::fee::FeeSchedule;
use crate::money::Amount;
use crate::payout::mock::{MockBehavior, MockGateway};
use crate::payout::{PayoutRouter, TransferLookup};
use crate::settlement::{
    Correlation, EventDetails, ReconcileOutcome, SettlementEvent, SettlementReconciler,
};
use crate::store::MemoryStore;
use crate::wallet::{Bucket, PayoutRecipient, WalletLedger};
use crate::withdrawal::{
    RecoveryWorker, WithdrawError, WithdrawalStatus, WithdrawalTracker, WorkerConfig, pin,
};

const PIN: &str = "9090";

struct TestHarness {
    ledger: Arc<WalletLedger>,
    tracker: Arc<WithdrawalTracker>,
    reconciler: SettlementReconciler,
    gateway: Arc<MockGateway>,
}

impl TestHarness {
    async fn new(balance: i64) -> Self {
        let ledger = Arc::new(WalletLedger::new(Arc::new(MemoryStore::new())));
        let gateway = Arc::new(MockGateway::new(Rail::Paystack));
        let router = PayoutRouter::new(Rail::Paystack, Rail::Paystack).with_gateway(gateway.clone());
        let tracker = Arc::new(WithdrawalTracker::new(
            ledger.clone(),
            Arc::new(FeeSchedule::default()),
            router,
            "KENYA",
            "Provider withdrawal",
        ));
        let reconciler = SettlementReconciler::new(
            ledger.clone(),
            &WebhookConfig {
                lookup_attempts: 1,
                lookup_backoff_ms: 1,
                mpesa_callback_token: None,
            },
        );

        ledger
            .set_pin_hash("prov-1", &pin::hash_pin(PIN).unwrap())
            .await
            .unwrap();
        ledger
            .set_recipient(
                "prov-1",
                &PayoutRecipient {
                    method: PayoutMethod::Mobile,
                    rail: Rail::Paystack,
                    name: "Jane Wanjiku".to_string(),
                    account_number: "0712345678".to_string(),
                    bank_code: Some("MPESA".to_string()),
                    recipient_code: Some("RCP_prov-1".to_string()),
                },
            )
            .await
            .unwrap();
        // Earnings arrive as pending and are released on booking completion
        ledger
            .credit("prov-1", Amount::new(balance), Bucket::Pending)
            .await
            .unwrap();
        ledger.release("prov-1", Amount::new(balance)).await.unwrap();

        Self {
            ledger,
            tracker,
            reconciler,
            gateway,
        }
    }

    async fn available(&self) -> Amount {
        self.ledger.balance("prov-1").await.unwrap().available
    }

    fn event_for(reference: &crate::core_types::Reference) -> EventDetails {
        EventDetails {
            rail: Rail::Paystack,
            correlation: Correlation::Reference(reference.clone()),
            transfer_code: None,
            claimed_uid: Some("prov-1".to_string()),
            reason: None,
        }
    }
}

// ========================================================================
// Happy Path Tests
// ========================================================================

/// Flow: INITIATING -> PENDING -> SUCCESS
#[tokio::test]
async fn test_withdraw_then_success_webhook() {
    let h = TestHarness::new(100).await;

    let record = h
        .tracker
        .initiate("prov-1", Amount::new(50), PayoutMethod::Mobile, PIN)
        .await
        .unwrap();
    assert_eq!(record.fee, Amount::new(20));
    assert_eq!(record.total, Amount::new(70));
    assert_eq!(record.status, WithdrawalStatus::Pending);
    assert_eq!(h.available().await, Amount::new(30));

    let outcome = h
        .reconciler
        .apply(SettlementEvent::Succeeded(TestHarness::event_for(
            &record.reference,
        )))
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied(ref r) if r.status == WithdrawalStatus::Success));
    // Success never refunds
    assert_eq!(h.available().await, Amount::new(30));
}

// ========================================================================
// Failure and Refund Tests
// ========================================================================

/// available=100, withdraw 50 (fee 20), then transfer.failed: back to 100
#[tokio::test]
async fn test_failed_webhook_refunds_total() {
    let h = TestHarness::new(100).await;
    let record = h
        .tracker
        .initiate("prov-1", Amount::new(50), PayoutMethod::Mobile, PIN)
        .await
        .unwrap();
    assert_eq!(h.available().await, Amount::new(30));

    let mut details = TestHarness::event_for(&record.reference);
    details.reason = Some("Account details invalid".to_string());
    h.reconciler
        .apply(SettlementEvent::Failed(details))
        .await
        .unwrap();

    assert_eq!(h.available().await, Amount::new(100));
    let stored = h.tracker.get(&record.reference).await.unwrap();
    assert_eq!(stored.status, WithdrawalStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some("Account details invalid"));
}

#[tokio::test]
async fn test_wrong_pin_leaves_no_trace() {
    let h = TestHarness::new(100).await;
    let err = h
        .tracker
        .initiate("prov-1", Amount::new(50), PayoutMethod::Mobile, "1111")
        .await
        .unwrap_err();
    assert_eq!(err, WithdrawError::InvalidPin);
    assert_eq!(h.available().await, Amount::new(100));
    assert!(h.tracker.history("prov-1", 50).await.unwrap().is_empty());
    assert_eq!(h.gateway.initiate_count(), 0);
}

// ========================================================================
// Concurrency Tests
// ========================================================================

/// Two withdrawals whose combined total exceeds available: exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initiates_one_wins() {
    let h = TestHarness::new(100).await;

    let t1 = h.tracker.clone();
    let t2 = h.tracker.clone();
    let a = tokio::spawn(async move {
        t1.initiate("prov-1", Amount::new(50), PayoutMethod::Mobile, PIN)
            .await
    });
    let b = tokio::spawn(async move {
        t2.initiate("prov-1", Amount::new(50), PayoutMethod::Mobile, PIN)
            .await
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let insufficient = results
        .iter()
        .filter(|r| matches!(r, Err(WithdrawError::InsufficientBalance)))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(insufficient, 1);
    assert_eq!(h.available().await, Amount::new(30));
    assert_eq!(h.gateway.initiate_count(), 1);
}

// ========================================================================
// Idempotency and Ordering Tests
// ========================================================================

#[tokio::test]
async fn test_duplicate_success_applies_once() {
    let h = TestHarness::new(200).await;
    let record = h
        .tracker
        .initiate("prov-1", Amount::new(50), PayoutMethod::Mobile, PIN)
        .await
        .unwrap();

    let event = SettlementEvent::Succeeded(TestHarness::event_for(&record.reference));
    let first = h.reconciler.apply(event.clone()).await.unwrap();
    let second = h.reconciler.apply(event).await.unwrap();
    assert!(matches!(first, ReconcileOutcome::Applied(_)));
    let ReconcileOutcome::AlreadyFinal(r) = second else {
        panic!("expected AlreadyFinal");
    };
    assert_eq!(r.completed_at, h.tracker.get(&record.reference).await.unwrap().completed_at);
    assert_eq!(h.available().await, Amount::new(130));
}

#[tokio::test]
async fn test_failure_after_success_is_noop() {
    let h = TestHarness::new(100).await;
    let record = h
        .tracker
        .initiate("prov-1", Amount::new(50), PayoutMethod::Mobile, PIN)
        .await
        .unwrap();

    h.reconciler
        .apply(SettlementEvent::Succeeded(TestHarness::event_for(
            &record.reference,
        )))
        .await
        .unwrap();
    let late = h
        .reconciler
        .apply(SettlementEvent::Failed(TestHarness::event_for(
            &record.reference,
        )))
        .await
        .unwrap();
    assert!(matches!(late, ReconcileOutcome::AlreadyFinal(ref r) if r.status == WithdrawalStatus::Success));
    assert_eq!(h.available().await, Amount::new(30));
}

// ========================================================================
// Timeout and Recovery Tests
// ========================================================================

/// A timed-out initiation keeps its reservation; the success webhook that
/// arrives while the record is still INITIATING is applied.
#[tokio::test]
async fn test_timeout_then_success_webhook() {
    let h = TestHarness::new(100).await;
    h.gateway.set_behavior(MockBehavior::Timeout);

    let err = h
        .tracker
        .initiate("prov-1", Amount::new(50), PayoutMethod::Mobile, PIN)
        .await
        .unwrap_err();
    let WithdrawError::GatewayTimeout { reference } = err else {
        panic!("expected GatewayTimeout, got {:?}", err);
    };
    assert_eq!(
        h.tracker.get(&reference).await.unwrap().status,
        WithdrawalStatus::Initiating
    );
    assert_eq!(h.available().await, Amount::new(30));

    let mut details = TestHarness::event_for(&reference);
    details.transfer_code = Some("TRF_late".to_string());
    h.reconciler
        .apply(SettlementEvent::Succeeded(details))
        .await
        .unwrap();

    let stored = h.tracker.get(&reference).await.unwrap();
    assert_eq!(stored.status, WithdrawalStatus::Success);
    assert_eq!(stored.transfer_code.as_deref(), Some("TRF_late"));
    assert_eq!(h.available().await, Amount::new(30));
}

/// A timed-out initiation the gateway never saw is refunded by recovery.
#[tokio::test]
async fn test_timeout_then_recovery_refunds() {
    let h = TestHarness::new(100).await;
    h.gateway.set_behavior(MockBehavior::Timeout);
    let Err(WithdrawError::GatewayTimeout { reference }) = h
        .tracker
        .initiate("prov-1", Amount::new(50), PayoutMethod::Mobile, PIN)
        .await
    else {
        panic!("expected GatewayTimeout");
    };

    h.gateway.set_lookup(Ok(TransferLookup::NotFound));
    let worker = RecoveryWorker::new(
        h.tracker.clone(),
        WorkerConfig {
            scan_interval: std::time::Duration::from_millis(10),
            stale_threshold: std::time::Duration::ZERO,
            pending_poll: std::time::Duration::from_secs(3600),
            batch_size: 10,
        },
    );
    assert_eq!(worker.scan_and_recover().await.unwrap(), 1);

    assert_eq!(
        h.tracker.get(&reference).await.unwrap().status,
        WithdrawalStatus::Failed
    );
    assert_eq!(h.available().await, Amount::new(100));
}

#[tokio::test]
async fn test_unreachable_gateway_refunds_immediately() {
    let h = TestHarness::new(100).await;
    h.gateway.set_behavior(MockBehavior::Unreachable);
    let err = h
        .tracker
        .initiate("prov-1", Amount::new(50), PayoutMethod::Mobile, PIN)
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::TransferInitiationFailed(_)));
    assert_eq!(err.http_status(), 500);
    assert_eq!(h.available().await, Amount::new(100));
}
