//! Withdrawal error types

use thiserror::Error;

use crate::core_types::Reference;
use crate::fee::FeeError;
use crate::money::MoneyError;
use crate::wallet::LedgerError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WithdrawError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Invalid withdrawal PIN")]
    InvalidPin,

    #[error("PIN must be 4 to 8 digits")]
    InvalidPinFormat,

    #[error("Amount must be a positive whole number")]
    InvalidAmount,

    #[error("Unsupported region: {0}")]
    UnsupportedRegion(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("No payout recipient configured for this method")]
    NoPayoutRecipient,

    #[error("Transfer initiation failed: {0}")]
    TransferInitiationFailed(String),

    #[error("Gateway did not answer in time; withdrawal {reference} is pending reconciliation")]
    GatewayTimeout { reference: Reference },

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl WithdrawError {
    pub fn code(&self) -> &'static str {
        match self {
            WithdrawError::ProviderNotFound(_) => "PROVIDER_NOT_FOUND",
            WithdrawError::InvalidPin => "INVALID_PIN",
            WithdrawError::InvalidPinFormat => "INVALID_PIN_FORMAT",
            WithdrawError::InvalidAmount => "INVALID_AMOUNT",
            WithdrawError::UnsupportedRegion(_) => "UNSUPPORTED_REGION",
            WithdrawError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            WithdrawError::NoPayoutRecipient => "NO_PAYOUT_RECIPIENT",
            WithdrawError::TransferInitiationFailed(_) => "TRANSFER_INITIATION_FAILED",
            WithdrawError::GatewayTimeout { .. } => "GATEWAY_TIMEOUT",
            WithdrawError::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            WithdrawError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            WithdrawError::InvalidPinFormat
            | WithdrawError::InvalidAmount
            | WithdrawError::UnsupportedRegion(_)
            | WithdrawError::InsufficientBalance
            | WithdrawError::NoPayoutRecipient => 400,
            WithdrawError::InvalidPin => 401,
            WithdrawError::ProviderNotFound(_) | WithdrawError::WithdrawalNotFound(_) => 404,
            WithdrawError::TransferInitiationFailed(_) | WithdrawError::Storage(_) => 500,
            WithdrawError::GatewayTimeout { .. } => 504,
        }
    }
}

impl From<LedgerError> for WithdrawError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InvalidAmount | LedgerError::Overflow => WithdrawError::InvalidAmount,
            LedgerError::InsufficientBalance => WithdrawError::InsufficientBalance,
            LedgerError::ProviderNotFound(uid) => WithdrawError::ProviderNotFound(uid),
            LedgerError::WithdrawalNotFound(r) => WithdrawError::WithdrawalNotFound(r),
            other => WithdrawError::Storage(other.to_string()),
        }
    }
}

impl From<FeeError> for WithdrawError {
    fn from(e: FeeError) -> Self {
        match e {
            FeeError::InvalidAmount => WithdrawError::InvalidAmount,
            FeeError::UnsupportedRegion(region) => WithdrawError::UnsupportedRegion(region),
            FeeError::InvalidSchedule(msg) => WithdrawError::Storage(msg),
        }
    }
}

impl From<MoneyError> for WithdrawError {
    fn from(_: MoneyError) -> Self {
        WithdrawError::InvalidAmount
    }
}
