//! Money Module
//!
//! Ledger amounts are whole currency units (KES shillings) held in an `i64`.
//! All conversions between client input, ledger storage and gateway wire
//! formats go through this module.
//!
//! ## Internal Representation
//! - `Amount(i64)`: whole units, never fractional
//! - Client input arrives as `Decimal` and must have no fractional part
//! - Minor units (x100) exist only on the Paystack wire, see [`Amount::to_minor_units`]
//!
//! ## Usage
//! ```rust
//! use payout_ledger::money::Amount;
//! use rust_decimal::Decimal;
//!
//! let amount = Amount::from_decimal(Decimal::from(1500)).unwrap();
//! assert_eq!(amount.to_minor_units().unwrap(), 150_000);
//! ```

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Minor units per whole unit on the card/transfer gateway wire.
pub const MINOR_UNITS_PER_UNIT: i64 = 100;

/// Basis-point denominator for fractional shares (10_000 = 100%).
pub const BPS_DENOMINATOR: i64 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount must be a whole number of units")]
    Fractional,

    #[error("Amount too large, would overflow")]
    Overflow,
}

/// Whole-unit ledger amount.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    #[inline]
    pub const fn new(units: i64) -> Self {
        Self(units)
    }

    #[inline]
    pub const fn units(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Parse a client-supplied amount. Rejects zero, negative and fractional values.
    pub fn from_decimal(value: Decimal) -> Result<Amount, MoneyError> {
        if value <= Decimal::ZERO {
            return Err(MoneyError::InvalidAmount);
        }
        if !value.fract().is_zero() {
            return Err(MoneyError::Fractional);
        }
        value.to_i64().map(Amount).ok_or(MoneyError::Overflow)
    }

    /// Convert to gateway minor units (cents).
    pub fn to_minor_units(self) -> Result<i64, MoneyError> {
        self.0
            .checked_mul(MINOR_UNITS_PER_UNIT)
            .ok_or(MoneyError::Overflow)
    }

    /// `floor(self * bps / 10_000)`, used for earnings shares.
    pub fn share_bps(self, bps: u32) -> Amount {
        let scaled = (self.0 as i128 * bps as i128) / BPS_DENOMINATOR as i128;
        Amount(scaled.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_from_decimal_whole_units() {
        assert_eq!(Amount::from_decimal(Decimal::from(50)), Ok(Amount::new(50)));
        assert_eq!(
            Amount::from_decimal(Decimal::from_str("1500.00").unwrap()),
            Ok(Amount::new(1500))
        );
    }

    #[test]
    fn test_from_decimal_rejects_bad_input() {
        assert_eq!(
            Amount::from_decimal(Decimal::ZERO),
            Err(MoneyError::InvalidAmount)
        );
        assert_eq!(
            Amount::from_decimal(Decimal::from(-5)),
            Err(MoneyError::InvalidAmount)
        );
        assert_eq!(
            Amount::from_decimal(Decimal::from_str("10.5").unwrap()),
            Err(MoneyError::Fractional)
        );
        assert_eq!(
            Amount::from_decimal(Decimal::MAX),
            Err(MoneyError::Overflow)
        );
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(Amount::new(70).to_minor_units(), Ok(7000));
        assert_eq!(Amount::new(i64::MAX).to_minor_units(), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_share_floors() {
        assert_eq!(Amount::new(101).share_bps(5000), Amount::new(50));
        assert_eq!(Amount::new(1000).share_bps(10_000), Amount::new(1000));
        assert_eq!(Amount::new(3).share_bps(3333), Amount::new(0));
    }
}
