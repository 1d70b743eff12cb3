//! Provider withdrawal credentials
//!
//! Setting the withdrawal PIN and registering the payout recipient. Both
//! create the provider account when it does not exist yet.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::core_types::{PayoutMethod, ProviderId};
use crate::payout::{PayoutError, PayoutRouter, RecipientRegistration};
use crate::wallet::{LedgerError, PayoutRecipient, WalletLedger};
use crate::withdrawal::{WithdrawError, pin};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("PIN must be 4 to 8 digits")]
    InvalidPinFormat,

    #[error("PIN confirmation does not match")]
    PinMismatch,

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error(transparent)]
    Gateway(#[from] PayoutError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("PIN hashing failed: {0}")]
    Hashing(String),
}

impl AccountError {
    pub fn code(&self) -> &'static str {
        match self {
            AccountError::InvalidPinFormat => "INVALID_PIN_FORMAT",
            AccountError::PinMismatch => "PIN_MISMATCH",
            AccountError::InvalidRecipient(_) => "INVALID_RECIPIENT",
            AccountError::Gateway(PayoutError::Rejected { .. }) => "RECIPIENT_REJECTED",
            AccountError::Gateway(PayoutError::Unsupported { .. }) => "UNSUPPORTED_METHOD",
            AccountError::Gateway(_) => "GATEWAY_ERROR",
            AccountError::Ledger(e) => e.code(),
            AccountError::Hashing(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AccountError::InvalidPinFormat
            | AccountError::PinMismatch
            | AccountError::InvalidRecipient(_)
            | AccountError::Gateway(PayoutError::Rejected { .. })
            | AccountError::Gateway(PayoutError::Unsupported { .. }) => 400,
            AccountError::Gateway(PayoutError::NotConfigured(_)) => 500,
            AccountError::Gateway(_) => 502,
            AccountError::Ledger(e) => e.http_status(),
            AccountError::Hashing(_) => 500,
        }
    }
}

impl From<WithdrawError> for AccountError {
    fn from(e: WithdrawError) -> Self {
        match e {
            WithdrawError::InvalidPinFormat => AccountError::InvalidPinFormat,
            other => AccountError::Hashing(other.to_string()),
        }
    }
}

/// Recipient fields as submitted by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientDetails {
    pub method: PayoutMethod,
    pub name: String,
    pub account_number: String,
    pub bank_code: Option<String>,
}

pub struct AccountService {
    ledger: Arc<WalletLedger>,
    router: PayoutRouter,
}

impl AccountService {
    pub fn new(ledger: Arc<WalletLedger>, router: PayoutRouter) -> Self {
        Self { ledger, router }
    }

    pub async fn set_pin(&self, uid: &str, pin: &str, confirm: &str) -> Result<(), AccountError> {
        pin::validate_pin_format(pin)?;
        if pin != confirm {
            return Err(AccountError::PinMismatch);
        }
        let hash = pin::hash_pin(pin)?;
        self.ledger.set_pin_hash(uid, &hash).await?;
        info!(uid = %uid, "Withdrawal PIN set");
        Ok(())
    }

    /// Register with the rail serving `details.method` and store the result.
    pub async fn register_recipient(
        &self,
        uid: &str,
        details: RecipientDetails,
    ) -> Result<PayoutRecipient, AccountError> {
        let name = details.name.trim();
        let account_number = details.account_number.trim();
        if name.is_empty() {
            return Err(AccountError::InvalidRecipient("name is required".into()));
        }
        if account_number.is_empty() {
            return Err(AccountError::InvalidRecipient(
                "account number is required".into(),
            ));
        }

        let gateway = self.router.for_method(details.method)?;
        let registration = RecipientRegistration {
            uid: ProviderId::from(uid),
            method: details.method,
            name: name.to_string(),
            account_number: account_number.to_string(),
            bank_code: details
                .bank_code
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        };
        let recipient = gateway.register_recipient(&registration).await?;
        self.ledger.set_recipient(uid, &recipient).await?;

        info!(
            uid = %uid,
            method = %recipient.method,
            rail = %recipient.rail,
            "Payout recipient registered"
        );
        Ok(recipient)
    }
}
