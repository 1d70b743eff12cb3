use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::WithdrawalStatus;
use crate::core_types::{PayoutMethod, ProviderId, Rail, Reference};
use crate::money::Amount;

/// One withdrawal request. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRecord {
    pub reference: Reference,
    pub uid: ProviderId,
    /// Amount the provider asked for
    pub amount: Amount,
    /// Fee computed at request time, immutable afterwards
    pub fee: Amount,
    /// `amount + fee`: debited from the wallet and sent to the gateway
    pub total: Amount,
    pub method: PayoutMethod,
    pub rail: Rail,
    pub region: String,
    pub status: WithdrawalStatus,
    pub transfer_code: Option<String>,
    pub failure_reason: Option<String>,
    #[serde(skip)]
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl WithdrawalRecord {
    /// A fresh record in the provisional state.
    #[allow(clippy::too_many_arguments)]
    pub fn initiating(
        reference: Reference,
        uid: ProviderId,
        amount: Amount,
        fee: Amount,
        total: Amount,
        method: PayoutMethod,
        rail: Rail,
        region: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            reference,
            uid,
            amount,
            fee,
            total,
            method,
            rail,
            region,
            status: WithdrawalStatus::Initiating,
            transfer_code: None,
            failure_reason: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Apply a terminal transition in place. Storage backends share this so
    /// both stamp the same fields.
    pub(crate) fn finalize(&mut self, settlement: &Settlement, now: DateTime<Utc>) {
        self.status = settlement.status;
        self.updated_at = now;
        if self.transfer_code.is_none() {
            self.transfer_code = settlement.transfer_code.clone();
        }
        if settlement.status == WithdrawalStatus::Success {
            self.completed_at = Some(now);
        } else {
            self.failed_at = Some(now);
            self.failure_reason = settlement.reason.clone();
        }
    }
}

/// Requested terminal transition for a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Must be terminal
    pub status: WithdrawalStatus,
    pub reason: Option<String>,
    /// Gateway transaction id, stored if the record has none yet
    pub transfer_code: Option<String>,
}

impl Settlement {
    pub fn success(transfer_code: Option<String>) -> Self {
        Self {
            status: WithdrawalStatus::Success,
            reason: None,
            transfer_code,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: WithdrawalStatus::Failed,
            reason: Some(reason.into()),
            transfer_code: None,
        }
    }

    pub fn timed_out(reason: impl Into<String>) -> Self {
        Self {
            status: WithdrawalStatus::TimedOut,
            reason: Some(reason.into()),
            transfer_code: None,
        }
    }

    pub fn with_transfer_code(mut self, code: Option<String>) -> Self {
        self.transfer_code = code;
        self
    }
}

/// Result of a settle attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Transition applied (and refund, when the status refunds)
    Applied(WithdrawalRecord),
    /// Record was already terminal; nothing changed
    AlreadyFinal(WithdrawalRecord),
}

impl SettleOutcome {
    pub fn record(&self) -> &WithdrawalRecord {
        match self {
            SettleOutcome::Applied(r) | SettleOutcome::AlreadyFinal(r) => r,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, SettleOutcome::Applied(_))
    }
}
