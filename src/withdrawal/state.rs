//! Withdrawal status machine
//!
//! Status IDs are stored as SMALLINT.
//! Terminal states: SUCCESS (40), FAILED (-10), TIMED_OUT (-20)

use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum WithdrawalStatus {
    /// Wallet debited and record persisted; gateway outcome not yet known
    Initiating = 0,

    /// Gateway accepted the transfer, awaiting its webhook
    Pending = 10,

    /// Terminal: gateway confirmed the payout
    Success = 40,

    /// Terminal: rejected, failed or reversed. Total refunded.
    Failed = -10,

    /// Terminal: gateway queue timeout. Total refunded.
    TimedOut = -20,
}

impl WithdrawalStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Success | WithdrawalStatus::Failed | WithdrawalStatus::TimedOut
        )
    }

    /// Entering this status returns the reserved total to `available`.
    #[inline]
    pub fn refunds(&self) -> bool {
        matches!(self, WithdrawalStatus::Failed | WithdrawalStatus::TimedOut)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawalStatus::Initiating),
            10 => Some(WithdrawalStatus::Pending),
            40 => Some(WithdrawalStatus::Success),
            -10 => Some(WithdrawalStatus::Failed),
            -20 => Some(WithdrawalStatus::TimedOut),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Initiating => "INITIATING",
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Success => "SUCCESS",
            WithdrawalStatus::Failed => "FAILED",
            WithdrawalStatus::TimedOut => "TIMED_OUT",
        }
    }

    /// Status as shown to providers. The provisional state reads as pending.
    pub fn public_name(&self) -> &'static str {
        match self {
            WithdrawalStatus::Initiating | WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Success => "success",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::TimedOut => "timeout",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for WithdrawalStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.public_name())
    }
}

impl TryFrom<i16> for WithdrawalStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        WithdrawalStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(WithdrawalStatus::Success.is_terminal());
        assert!(WithdrawalStatus::Failed.is_terminal());
        assert!(WithdrawalStatus::TimedOut.is_terminal());
        assert!(!WithdrawalStatus::Initiating.is_terminal());
        assert!(!WithdrawalStatus::Pending.is_terminal());
    }

    #[test]
    fn test_only_failures_refund() {
        assert!(WithdrawalStatus::Failed.refunds());
        assert!(WithdrawalStatus::TimedOut.refunds());
        assert!(!WithdrawalStatus::Success.refunds());
        assert!(!WithdrawalStatus::Pending.refunds());
    }

    #[test]
    fn test_invalid_status_id() {
        assert_eq!(WithdrawalStatus::from_id(-20), Some(WithdrawalStatus::TimedOut));
        assert!(WithdrawalStatus::from_id(20).is_none());
    }

    #[test]
    fn test_provisional_reads_as_pending() {
        assert_eq!(WithdrawalStatus::Initiating.public_name(), "pending");
        assert_eq!(
            serde_json::to_string(&WithdrawalStatus::TimedOut).unwrap(),
            "\"timeout\""
        );
    }
}
