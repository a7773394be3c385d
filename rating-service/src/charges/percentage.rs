use rust_decimal::Decimal;

use super::{add, mul};
use crate::error::RatingError;
use crate::models::{FeeResult, UsageAggregate};

/// `fixed_amount` scales with the aggregated value here, unlike the per-event
/// fee of graduated percentage tiers.
pub(super) fn apply(
    rate_fraction: Decimal,
    fixed_amount: Decimal,
    aggregate: &UsageAggregate,
) -> Result<FeeResult, RatingError> {
    let value = aggregate.value;
    let amount = add(mul(value, rate_fraction)?, mul(fixed_amount, value)?)?;

    Ok(FeeResult::new(amount, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_and_fixed_amount_both_scale_with_value() {
        let aggregate = UsageAggregate::new(Decimal::from(200), 4);
        let fee = apply(Decimal::new(5, 2), Decimal::new(1, 1), &aggregate).unwrap();
        // 200 × 0.05 + 0.1 × 200
        assert_eq!(fee.amount, Decimal::from(30));
    }

    #[test]
    fn zero_value_is_free() {
        let fee = apply(
            Decimal::new(5, 2),
            Decimal::ONE,
            &UsageAggregate::new(Decimal::ZERO, 3),
        )
        .unwrap();
        assert_eq!(fee.amount, Decimal::ZERO);
    }
}
