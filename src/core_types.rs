//! Core types used throughout the service
//!
//! Identifiers and small enums shared by the ledger, the withdrawal tracker
//! and the gateway adapters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Provider ID - the marketplace account uid that owns a wallet.
pub type ProviderId = String;

/// Withdrawal reference - our identity for a withdrawal request.
///
/// # Constraints:
/// - Generated once per request from a CSPRNG (UUID v4, 32 hex chars)
/// - Never reused, even after the withdrawal fails
/// - Sent to the gateway so webhooks can be correlated back
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Reference {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the provider wants to be paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutMethod {
    Mobile,
    Bank,
}

impl PayoutMethod {
    #[inline]
    pub fn id(&self) -> i16 {
        match self {
            PayoutMethod::Mobile => 1,
            PayoutMethod::Bank => 2,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(PayoutMethod::Mobile),
            2 => Some(PayoutMethod::Bank),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutMethod::Mobile => "mobile",
            PayoutMethod::Bank => "bank",
        }
    }
}

impl fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" => Ok(PayoutMethod::Mobile),
            "bank" => Ok(PayoutMethod::Bank),
            other => Err(format!("unsupported payout method: {}", other)),
        }
    }
}

/// External payment rail that carries a payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rail {
    Paystack,
    Mpesa,
}

impl Rail {
    #[inline]
    pub fn id(&self) -> i16 {
        match self {
            Rail::Paystack => 1,
            Rail::Mpesa => 2,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Rail::Paystack),
            2 => Some(Rail::Mpesa),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rail::Paystack => "paystack",
            Rail::Mpesa => "mpesa",
        }
    }
}

impl fmt::Display for Rail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
