//! Charge model definitions.
//!
//! A charge owns exactly one pricing model. Models arrive from the plan
//! catalogue as a `(kind, properties)` pair where properties is a loosely typed
//! JSON object; [`ChargeModel::from_properties`] is the boundary that turns it
//! into a typed variant or rejects it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::RatingError;

/// Pricing model discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeModelKind {
    Standard,
    Package,
    Percentage,
    Graduated,
    GraduatedPercentage,
    Volume,
    ProratedGraduated,
}

impl ChargeModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeModelKind::Standard => "standard",
            ChargeModelKind::Package => "package",
            ChargeModelKind::Percentage => "percentage",
            ChargeModelKind::Graduated => "graduated",
            ChargeModelKind::GraduatedPercentage => "graduated_percentage",
            ChargeModelKind::Volume => "volume",
            ChargeModelKind::ProratedGraduated => "prorated_graduated",
        }
    }

    /// Models without a stable per-unit quantity.
    pub fn is_percentage(&self) -> bool {
        matches!(
            self,
            ChargeModelKind::Percentage | ChargeModelKind::GraduatedPercentage
        )
    }
}

impl FromStr for ChargeModelKind {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(ChargeModelKind::Standard),
            "package" => Ok(ChargeModelKind::Package),
            "percentage" => Ok(ChargeModelKind::Percentage),
            "graduated" => Ok(ChargeModelKind::Graduated),
            "graduated_percentage" => Ok(ChargeModelKind::GraduatedPercentage),
            "volume" => Ok(ChargeModelKind::Volume),
            "prorated_graduated" => Ok(ChargeModelKind::ProratedGraduated),
            other => Err(RatingError::InvalidChargeModel(format!(
                "unknown charge model '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ChargeModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One contiguous usage range of a tiered model.
///
/// A tier covers `(lower_bound, to_value]`, where the first tier starts at 0
/// and every other tier starts right after the previous `to_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub from_value: Decimal,
    pub to_value: Option<Decimal>,
    #[serde(default)]
    pub flat_amount: Decimal,
    #[serde(default)]
    pub per_unit_amount: Decimal,
    /// Percent points, graduated percentage tiers only.
    #[serde(default)]
    pub rate_fraction: Option<Decimal>,
}

impl Tier {
    pub fn new(
        from_value: i64,
        to_value: Option<i64>,
        per_unit_amount: Decimal,
        flat_amount: Decimal,
    ) -> Self {
        Self {
            from_value: Decimal::from(from_value),
            to_value: to_value.map(Decimal::from),
            flat_amount,
            per_unit_amount,
            rate_fraction: None,
        }
    }

    /// Exclusive lower bound of the tier on the cumulative usage axis.
    pub fn lower_bound(&self) -> Decimal {
        if self.from_value.is_zero() {
            Decimal::ZERO
        } else {
            self.from_value - Decimal::ONE
        }
    }

    /// Whether a cumulative value has entered this tier.
    pub fn is_occupied_by(&self, value: Decimal) -> bool {
        value > self.lower_bound()
    }

    /// Whether a cumulative value ends inside this tier.
    pub fn contains(&self, value: Decimal) -> bool {
        self.is_occupied_by(value) && self.to_value.is_none_or(|to| value <= to)
    }
}

/// Pricing model of a charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "charge_model", rename_all = "snake_case")]
pub enum ChargeModel {
    Standard {
        unit_amount: Decimal,
    },
    Package {
        block_amount: Decimal,
        block_size: Decimal,
        #[serde(default)]
        free_units: Decimal,
    },
    Percentage {
        rate_fraction: Decimal,
        #[serde(default)]
        fixed_amount: Decimal,
    },
    Graduated {
        tiers: Vec<Tier>,
    },
    GraduatedPercentage {
        tiers: Vec<Tier>,
    },
    Volume {
        tiers: Vec<Tier>,
    },
    ProratedGraduated {
        tiers: Vec<Tier>,
    },
}

impl ChargeModel {
    pub fn kind(&self) -> ChargeModelKind {
        match self {
            ChargeModel::Standard { .. } => ChargeModelKind::Standard,
            ChargeModel::Package { .. } => ChargeModelKind::Package,
            ChargeModel::Percentage { .. } => ChargeModelKind::Percentage,
            ChargeModel::Graduated { .. } => ChargeModelKind::Graduated,
            ChargeModel::GraduatedPercentage { .. } => ChargeModelKind::GraduatedPercentage,
            ChargeModel::Volume { .. } => ChargeModelKind::Volume,
            ChargeModel::ProratedGraduated { .. } => ChargeModelKind::ProratedGraduated,
        }
    }

    pub fn tiers(&self) -> Option<&[Tier]> {
        match self {
            ChargeModel::Graduated { tiers }
            | ChargeModel::GraduatedPercentage { tiers }
            | ChargeModel::Volume { tiers }
            | ChargeModel::ProratedGraduated { tiers } => Some(tiers),
            _ => None,
        }
    }

    /// Build a typed model from a catalogue property bag.
    ///
    /// Numeric properties may be JSON numbers or decimal strings.
    pub fn from_properties(kind: &str, properties: &Value) -> Result<Self, RatingError> {
        let kind = ChargeModelKind::from_str(kind)?;
        let props = properties.as_object().ok_or_else(|| {
            RatingError::InvalidChargeModel(format!("{} properties must be an object", kind))
        })?;

        let model = match kind {
            ChargeModelKind::Standard => ChargeModel::Standard {
                unit_amount: required_decimal(props, "amount")?,
            },
            ChargeModelKind::Package => ChargeModel::Package {
                block_amount: required_decimal(props, "amount")?,
                block_size: required_decimal(props, "package_size")?,
                free_units: optional_decimal(props, "free_units")?.unwrap_or_default(),
            },
            ChargeModelKind::Percentage => ChargeModel::Percentage {
                rate_fraction: required_decimal(props, "rate")? / Decimal::ONE_HUNDRED,
                fixed_amount: optional_decimal(props, "fixed_amount")?.unwrap_or_default(),
            },
            ChargeModelKind::Graduated => ChargeModel::Graduated {
                tiers: parse_tiers(props, "graduated_ranges", false)?,
            },
            ChargeModelKind::GraduatedPercentage => ChargeModel::GraduatedPercentage {
                tiers: parse_tiers(props, "graduated_percentage_ranges", true)?,
            },
            ChargeModelKind::Volume => ChargeModel::Volume {
                tiers: parse_tiers(props, "volume_ranges", false)?,
            },
            ChargeModelKind::ProratedGraduated => ChargeModel::ProratedGraduated {
                tiers: parse_tiers(props, "graduated_ranges", false)?,
            },
        };

        model.validate()?;
        Ok(model)
    }

    /// Check numeric and structural invariants of the model.
    pub fn validate(&self) -> Result<(), RatingError> {
        match self {
            ChargeModel::Standard { .. } => Ok(()),
            ChargeModel::Package {
                block_size,
                free_units,
                ..
            } => {
                if *block_size <= Decimal::ZERO {
                    return Err(RatingError::InvalidChargeModel(
                        "package_size must be positive".to_string(),
                    ));
                }
                if free_units.is_sign_negative() {
                    return Err(RatingError::InvalidChargeModel(
                        "free_units cannot be negative".to_string(),
                    ));
                }
                Ok(())
            }
            ChargeModel::Percentage { rate_fraction, .. } => {
                if rate_fraction.is_sign_negative() {
                    return Err(RatingError::InvalidChargeModel(
                        "rate cannot be negative".to_string(),
                    ));
                }
                Ok(())
            }
            ChargeModel::GraduatedPercentage { tiers } => {
                validate_tiers(tiers)?;
                if let Some(position) = tiers.iter().position(|t| t.rate_fraction.is_none()) {
                    return Err(RatingError::InvalidChargeModel(format!(
                        "tier {} is missing its rate",
                        position + 1
                    )));
                }
                Ok(())
            }
            ChargeModel::Graduated { tiers }
            | ChargeModel::Volume { tiers }
            | ChargeModel::ProratedGraduated { tiers } => validate_tiers(tiers),
        }
    }
}

/// Tiers must cover `[0, ∞)` without gaps or overlaps.
pub fn validate_tiers(tiers: &[Tier]) -> Result<(), RatingError> {
    let first = tiers
        .first()
        .ok_or_else(|| RatingError::InvalidChargeModel("at least one tier is required".into()))?;

    if !first.from_value.is_zero() {
        return Err(RatingError::InvalidChargeModel(
            "first tier must start at 0".to_string(),
        ));
    }

    for (index, pair) in tiers.windows(2).enumerate() {
        let (current, next) = (&pair[0], &pair[1]);
        let to_value = current.to_value.ok_or_else(|| {
            RatingError::InvalidChargeModel(format!(
                "tier {} is unbounded but is not the last tier",
                index + 1
            ))
        })?;

        if to_value < current.from_value {
            return Err(RatingError::InvalidChargeModel(format!(
                "tier {} ends before it starts",
                index + 1
            )));
        }

        if to_value + Decimal::ONE != next.from_value {
            return Err(RatingError::InvalidChargeModel(format!(
                "tier {} must start at {}",
                index + 2,
                to_value + Decimal::ONE
            )));
        }
    }

    if tiers.last().is_some_and(|t| t.to_value.is_some()) {
        return Err(RatingError::InvalidChargeModel(
            "last tier must be unbounded".to_string(),
        ));
    }

    for (index, tier) in tiers.iter().enumerate() {
        if tier.flat_amount.is_sign_negative() || tier.per_unit_amount.is_sign_negative() {
            return Err(RatingError::InvalidChargeModel(format!(
                "tier {} has a negative amount",
                index + 1
            )));
        }
    }

    Ok(())
}

type Props = serde_json::Map<String, Value>;

fn decimal_from_value(key: &str, value: &Value) -> Result<Decimal, RatingError> {
    let parsed = match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    };

    parsed.ok_or_else(|| RatingError::InvalidChargeModel(format!("{} must be numeric", key)))
}

fn required_decimal(props: &Props, key: &str) -> Result<Decimal, RatingError> {
    match props.get(key) {
        Some(Value::Null) | None => Err(RatingError::InvalidChargeModel(format!(
            "{} is required",
            key
        ))),
        Some(value) => decimal_from_value(key, value),
    }
}

fn optional_decimal(props: &Props, key: &str) -> Result<Option<Decimal>, RatingError> {
    match props.get(key) {
        Some(Value::Null) | None => Ok(None),
        Some(value) => decimal_from_value(key, value).map(Some),
    }
}

fn parse_tiers(props: &Props, key: &str, with_rate: bool) -> Result<Vec<Tier>, RatingError> {
    let ranges = props
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| RatingError::InvalidChargeModel(format!("{} must be a list", key)))?;

    ranges
        .iter()
        .map(|range| {
            let range = range.as_object().ok_or_else(|| {
                RatingError::InvalidChargeModel(format!("{} entries must be objects", key))
            })?;

            Ok(Tier {
                from_value: required_decimal(range, "from_value")?,
                to_value: optional_decimal(range, "to_value")?,
                flat_amount: optional_decimal(range, "flat_amount")?.unwrap_or_default(),
                per_unit_amount: if with_rate {
                    optional_decimal(range, "fixed_amount")?.unwrap_or_default()
                } else {
                    required_decimal(range, "per_unit_amount")?
                },
                rate_fraction: if with_rate {
                    Some(required_decimal(range, "rate")?)
                } else {
                    None
                },
            })
        })
        .collect()
}
