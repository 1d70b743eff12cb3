//! Payout Gateway Adapters
//!
//! One adapter per external rail. Adapters speak the rail's wire format and
//! return normalized results; nothing outside this module sees gateway JSON.
//!
//! # Error classification
//! The tracker refunds only on a *definitive* failure (the gateway said no, or
//! the request never left this process). A timeout or an unreadable response
//! leaves the outcome unknown; the withdrawal stays provisional until a
//! webhook or the recovery worker resolves it.

pub mod mpesa;
pub mod paystack;

pub use mpesa::MpesaGateway;
pub use paystack::PaystackGateway;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::core_types::{PayoutMethod, ProviderId, Rail, Reference};
use crate::money::Amount;
use crate::wallet::PayoutRecipient;

/// Transfer to initiate on a rail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRequest {
    pub reference: Reference,
    pub uid: ProviderId,
    /// Amount sent to the gateway (withdrawal total)
    pub amount: Amount,
    /// Amount the provider asked for, carried as metadata
    pub requested: Amount,
    pub fee: Amount,
    pub recipient: PayoutRecipient,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReceipt {
    /// Gateway transaction id (Paystack transfer_code, M-Pesa ConversationID)
    pub transfer_code: String,
    pub gateway_status: String,
}

/// Gateway's view of a transfer, used by the recovery worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferLookup {
    /// The gateway never received this reference
    NotFound,
    Pending { transfer_code: Option<String> },
    Succeeded { transfer_code: Option<String> },
    Failed { reason: String },
    /// The rail cannot answer; wait for its callback
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRegistration {
    pub uid: ProviderId,
    pub method: PayoutMethod,
    pub name: String,
    pub account_number: String,
    pub bank_code: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayoutError {
    #[error("Gateway rejected request: {message}")]
    Rejected { status: Option<u16>, message: String },

    #[error("Gateway unreachable: {0}")]
    Unreachable(String),

    #[error("Gateway request timed out")]
    Timeout,

    #[error("Unexpected gateway response: {0}")]
    Unexpected(String),

    #[error("{rail} rail does not support {what}")]
    Unsupported { rail: Rail, what: &'static str },

    #[error("No adapter configured for rail: {0}")]
    NotConfigured(Rail),
}

impl PayoutError {
    /// True when the transfer certainly did not happen.
    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            PayoutError::Rejected { .. }
                | PayoutError::Unreachable(_)
                | PayoutError::Unsupported { .. }
                | PayoutError::NotConfigured(_)
        )
    }
}

impl From<reqwest::Error> for PayoutError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PayoutError::Timeout
        } else if e.is_connect() || e.is_builder() {
            PayoutError::Unreachable(e.to_string())
        } else {
            PayoutError::Unexpected(e.to_string())
        }
    }
}

/// Adapter for one payment rail.
#[async_trait]
pub trait PayoutGateway: Send + Sync {
    fn rail(&self) -> Rail;

    /// Whether `recipient` carries what this rail needs to pay it.
    fn recipient_ready(&self, recipient: &PayoutRecipient) -> bool;

    /// Start a transfer. Never retried internally: a second call could pay twice.
    async fn initiate(&self, request: &PayoutRequest) -> Result<PayoutReceipt, PayoutError>;

    /// Ask the gateway what happened to `reference`.
    async fn lookup(&self, reference: &Reference) -> Result<TransferLookup, PayoutError>;

    /// Register a payout destination with the gateway.
    async fn register_recipient(
        &self,
        registration: &RecipientRegistration,
    ) -> Result<PayoutRecipient, PayoutError>;
}

/// Routes each payout method to the rail configured for it.
#[derive(Clone)]
pub struct PayoutRouter {
    rails: HashMap<Rail, Arc<dyn PayoutGateway>>,
    mobile: Rail,
    bank: Rail,
}

impl PayoutRouter {
    pub fn new(mobile: Rail, bank: Rail) -> Self {
        Self {
            rails: HashMap::new(),
            mobile,
            bank,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PayoutGateway>) -> Self {
        self.rails.insert(gateway.rail(), gateway);
        self
    }

    pub fn rail_for(&self, method: PayoutMethod) -> Rail {
        match method {
            PayoutMethod::Mobile => self.mobile,
            PayoutMethod::Bank => self.bank,
        }
    }

    pub fn gateway(&self, rail: Rail) -> Result<Arc<dyn PayoutGateway>, PayoutError> {
        self.rails
            .get(&rail)
            .cloned()
            .ok_or(PayoutError::NotConfigured(rail))
    }

    pub fn for_method(&self, method: PayoutMethod) -> Result<Arc<dyn PayoutGateway>, PayoutError> {
        self.gateway(self.rail_for(method))
    }
}
