//! Wallet Ledger
//!
//! Owns every mutation of provider wallets. Other modules never touch wallet
//! fields directly; they call the atomic operations on [`WalletLedger`].
//!
//! # Invariants
//! - `available >= 0` and `pending >= 0` after every operation
//! - `lifetime` never decreases
//! - A withdrawal's reserve and its record are created together or not at all
//! - A withdrawal is refunded at most once, in the same transaction as its
//!   transition to FAILED or TIMED_OUT

pub mod error;
pub mod ledger;
pub mod types;

pub use error::LedgerError;
pub use ledger::WalletLedger;
pub use types::{Bucket, PayoutRecipient, ProviderAccount, Wallet};
