//! Fee computation results.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RatingError;

/// Output of a charge model for one aggregate. Amounts are in major currency units.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeeResult {
    pub amount: Decimal,
    pub unit_amount: Decimal,
    pub units: Decimal,
    pub breakdown: BTreeMap<String, Decimal>,
}

impl FeeResult {
    pub fn new(amount: Decimal, units: Decimal) -> Self {
        // Zero without units, or when the ratio is not representable.
        let unit_amount = amount.checked_div(units).unwrap_or_default();

        Self {
            amount,
            unit_amount,
            units,
            breakdown: BTreeMap::new(),
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn with_breakdown(mut self, key: impl Into<String>, value: Decimal) -> Self {
        self.breakdown.insert(key.into(), value);
        self
    }

    /// Amount in currency subunits, rounded half away from zero.
    pub fn amount_cents(&self, currency: &str) -> Result<i64, RatingError> {
        to_subunits(self.amount, currency)
    }
}

/// Manual override of a computed fee.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeeAdjustment {
    pub units: Option<Decimal>,
    pub unit_amount: Option<Decimal>,
}

/// Number of decimal places of the currency's smallest unit.
pub fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Convert a major-unit amount to subunits of the currency.
pub fn to_subunits(amount: Decimal, currency: &str) -> Result<i64, RatingError> {
    let exponent = currency_exponent(currency);
    let scaled = amount
        .checked_mul(Decimal::from(10_i64.pow(exponent)))
        .ok_or(RatingError::AmountOutOfRange(amount))?;

    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(RatingError::AmountOutOfRange(amount))
}
