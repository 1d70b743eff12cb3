//! Settlement Reconciler
//!
//! Webhook authentication, payload normalization and the idempotent
//! application of gateway outcomes to withdrawal records.

pub mod event;
pub mod reconciler;
pub mod signature;

pub use event::{
    Correlation, EventDetails, SettlementEvent, WebhookError, parse_mpesa_result,
    parse_mpesa_timeout, parse_paystack,
};
pub use reconciler::{ReconcileError, ReconcileOutcome, SettlementReconciler};
