use serde::{Deserialize, Serialize};

use crate::core_types::{PayoutMethod, ProviderId, Rail};
use crate::money::Amount;

/// Provider balance buckets.
///
/// `available >= 0` and `pending >= 0` hold after every operation;
/// `lifetime` never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Wallet {
    pub available: Amount,
    pub pending: Amount,
    pub lifetime: Amount,
}

/// Buckets that accept a plain credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Pending,
    Lifetime,
}

/// Where a provider's payouts are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRecipient {
    pub method: PayoutMethod,
    pub rail: Rail,
    pub name: String,
    /// Phone number (mobile) or account number (bank)
    pub account_number: String,
    #[serde(default)]
    pub bank_code: Option<String>,
    /// Gateway-issued recipient handle, when the rail needs one
    #[serde(default)]
    pub recipient_code: Option<String>,
}

/// Wallet plus the withdrawal credentials stored alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAccount {
    pub uid: ProviderId,
    pub wallet: Wallet,
    /// Argon2 PHC string
    pub pin_hash: Option<String>,
    pub recipient: Option<PayoutRecipient>,
}

impl ProviderAccount {
    pub fn new(uid: impl Into<ProviderId>) -> Self {
        Self {
            uid: uid.into(),
            wallet: Wallet::default(),
            pin_hash: None,
            recipient: None,
        }
    }
}
