//! Withdrawal Tracker
//!
//! Turns a provider's withdrawal request into a reserved balance, an
//! outbound transfer and a durable record, and drives that record to a
//! terminal status.
//!
//! # Status machine
//!
//! ```text
//! INITIATING(0) --accepted--> PENDING(10) --webhook--> SUCCESS(40)
//!      |                          |                    FAILED(-10)   refund
//!      |                          +------------------> TIMED_OUT(-20) refund
//!      +--rejected / lookup NotFound--> FAILED(-10)  refund
//! ```
//!
//! Terminal records never change again, which makes every settlement path
//! idempotent under duplicate and out-of-order delivery.

pub mod error;
pub mod pin;
pub mod state;
pub mod tracker;
pub mod types;
pub mod worker;

#[cfg(test)]
mod integration_tests;

pub use error::WithdrawError;
pub use state::WithdrawalStatus;
pub use tracker::WithdrawalTracker;
pub use types::{SettleOutcome, Settlement, WithdrawalRecord};
pub use worker::{RecoveryWorker, WorkerConfig};
