//! Ledger error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Insufficient pending balance")]
    InsufficientPending,

    #[error("Booking {0} has no accrued earning for this provider")]
    EarningNotAccrued(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(String),

    #[error("Duplicate withdrawal reference: {0}")]
    DuplicateReference(String),

    #[error("Amount would cause overflow")]
    Overflow,

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            LedgerError::InsufficientPending => "INSUFFICIENT_PENDING",
            LedgerError::EarningNotAccrued(_) => "EARNING_NOT_ACCRUED",
            LedgerError::ProviderNotFound(_) => "PROVIDER_NOT_FOUND",
            LedgerError::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            LedgerError::DuplicateReference(_) => "DUPLICATE_REFERENCE",
            LedgerError::Overflow => "OVERFLOW",
            LedgerError::InvalidTransition(_) => "INVALID_STATE_TRANSITION",
            LedgerError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::InvalidAmount
            | LedgerError::InsufficientBalance
            | LedgerError::InsufficientPending
            | LedgerError::Overflow => 400,
            LedgerError::ProviderNotFound(_) | LedgerError::WithdrawalNotFound(_) => 404,
            LedgerError::DuplicateReference(_) | LedgerError::EarningNotAccrued(_) => 409,
            LedgerError::InvalidTransition(_) | LedgerError::Storage(_) => 500,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}
