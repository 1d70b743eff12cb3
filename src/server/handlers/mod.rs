//! HTTP handlers, one module per route group

pub mod earnings;
pub mod health;
pub mod wallet;
pub mod webhook;
pub mod withdraw;

pub use earnings::booking_transition;
pub use health::health_check;
pub use wallet::{get_wallet, register_recipient, set_pin};
pub use webhook::{mpesa_result, mpesa_timeout, paystack_webhook};
pub use withdraw::{create_withdrawal, get_withdrawal, list_withdrawals};
