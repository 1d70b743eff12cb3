//! Payout Ledger - provider wallets, withdrawals and gateway settlement
//!
//! # Modules
//!
//! - [`core_types`] - Identifiers and enums shared across modules
//! - [`money`] - Whole-shilling amount type
//! - [`fee`] - Region/method withdrawal fee schedule
//! - [`wallet`] - Provider accounts and the three-bucket wallet ledger
//! - [`store`] - Storage trait with in-memory and Postgres backends
//! - [`earnings`] - Booking transitions credited as provider earnings
//! - [`payout`] - Paystack and M-Pesa payout adapters
//! - [`withdrawal`] - Withdrawal tracker and recovery worker
//! - [`settlement`] - Webhook parsing, signatures and reconciliation
//! - [`account`] - PIN and payout recipient management
//! - [`server`] - HTTP API

// Core types - must be first!
pub mod core_types;
pub mod money;

pub mod config;
pub mod logging;

pub mod db;
pub mod store;

pub mod account;
pub mod earnings;
pub mod fee;
pub mod payout;
pub mod settlement;
pub mod wallet;
pub mod withdrawal;

pub mod server;

// Convenient re-exports at crate root
pub use core_types::{PayoutMethod, ProviderId, Rail, Reference};
pub use money::Amount;
pub use wallet::{LedgerError, Wallet, WalletLedger};
pub use withdrawal::{WithdrawError, WithdrawalStatus, WithdrawalTracker};
