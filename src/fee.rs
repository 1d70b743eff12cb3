//! Withdrawal fee schedule
//!
//! Fees are looked up per region and payout method. A method is either a flat
//! fee or a tiered table where the first tier whose `up_to` is at least the
//! amount applies (upper bounds inclusive), with `above` covering everything
//! past the last tier.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core_types::PayoutMethod;
use crate::money::Amount;

/// Region used when a provider has no explicit region.
pub const DEFAULT_REGION: &str = "KENYA";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("No fee schedule for region: {0}")]
    UnsupportedRegion(String),

    #[error("Invalid fee schedule: {0}")]
    InvalidSchedule(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    pub up_to: Amount,
    pub fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodFees {
    Flat { fee: Amount },
    Tiered { tiers: Vec<FeeTier>, above: Amount },
}

impl MethodFees {
    fn fee_for(&self, amount: Amount) -> Amount {
        match self {
            MethodFees::Flat { fee } => *fee,
            MethodFees::Tiered { tiers, above } => tiers
                .iter()
                .find(|tier| amount <= tier.up_to)
                .map(|tier| tier.fee)
                .unwrap_or(*above),
        }
    }

    fn validate(&self, label: &str) -> Result<(), FeeError> {
        match self {
            MethodFees::Flat { fee } => {
                if fee.units() < 0 {
                    return Err(FeeError::InvalidSchedule(format!("{}: negative fee", label)));
                }
            }
            MethodFees::Tiered { tiers, above } => {
                if tiers.is_empty() {
                    return Err(FeeError::InvalidSchedule(format!("{}: no tiers", label)));
                }
                let mut prev: Option<Amount> = None;
                for tier in tiers {
                    if tier.fee.units() < 0 || !tier.up_to.is_positive() {
                        return Err(FeeError::InvalidSchedule(format!(
                            "{}: tier up_to={} fee={}",
                            label, tier.up_to, tier.fee
                        )));
                    }
                    if let Some(p) = prev
                        && tier.up_to <= p
                    {
                        return Err(FeeError::InvalidSchedule(format!(
                            "{}: tiers must be strictly increasing",
                            label
                        )));
                    }
                    prev = Some(tier.up_to);
                }
                if above.units() < 0 {
                    return Err(FeeError::InvalidSchedule(format!("{}: negative fee", label)));
                }
            }
        }
        Ok(())
    }
}

/// Fees for one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFees {
    pub mobile: MethodFees,
    pub bank: MethodFees,
}

impl RegionFees {
    fn for_method(&self, method: PayoutMethod) -> &MethodFees {
        match method {
            PayoutMethod::Mobile => &self.mobile,
            PayoutMethod::Bank => &self.bank,
        }
    }
}

/// Validated, immutable fee schedule. Region keys are stored upper-case.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    regions: HashMap<String, RegionFees>,
}

impl FeeSchedule {
    pub fn new(regions: HashMap<String, RegionFees>) -> Result<Self, FeeError> {
        let mut normalized = HashMap::with_capacity(regions.len());
        for (region, fees) in regions {
            let key = region.trim().to_ascii_uppercase();
            fees.mobile.validate(&format!("{}.mobile", key))?;
            fees.bank.validate(&format!("{}.bank", key))?;
            normalized.insert(key, fees);
        }
        Ok(Self {
            regions: normalized,
        })
    }

    /// Fee for withdrawing `amount` via `method` in `region`.
    pub fn fee(
        &self,
        amount: Amount,
        method: PayoutMethod,
        region: &str,
    ) -> Result<Amount, FeeError> {
        if !amount.is_positive() {
            return Err(FeeError::InvalidAmount);
        }
        let fees = self
            .regions
            .get(&region.trim().to_ascii_uppercase())
            .ok_or_else(|| FeeError::UnsupportedRegion(region.to_string()))?;
        Ok(fees.for_method(method).fee_for(amount))
    }
}

/// Kenyan schedule used when the config file does not provide one.
pub fn default_regions() -> HashMap<String, RegionFees> {
    let tier = |up_to: i64, fee: i64| FeeTier {
        up_to: Amount::new(up_to),
        fee: Amount::new(fee),
    };
    let kenya = RegionFees {
        mobile: MethodFees::Tiered {
            tiers: vec![
                tier(1_500, 20),
                tier(20_000, 40),
                tier(40_000, 140),
                tier(999_999, 180),
            ],
            above: Amount::new(350),
        },
        bank: MethodFees::Flat {
            fee: Amount::new(80),
        },
    };
    HashMap::from([(DEFAULT_REGION.to_string(), kenya)])
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            regions: default_regions(),
        }
    }
}
