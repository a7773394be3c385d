//! Tier resolution on the cumulative usage axis.

use rust_decimal::Decimal;

use crate::models::Tier;

/// Portion of a cumulative value that falls inside one tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierSpan<'a> {
    /// Zero-based position of the tier.
    pub index: usize,
    pub tier: &'a Tier,
    pub units: Decimal,
}

/// Locates and apportions cumulative values across an ordered tier list.
///
/// Tiers are expected to satisfy [`crate::models::validate_tiers`].
#[derive(Debug, Clone, Copy)]
pub struct RangeResolver<'a> {
    tiers: &'a [Tier],
}

impl<'a> RangeResolver<'a> {
    pub fn new(tiers: &'a [Tier]) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &'a [Tier] {
        self.tiers
    }

    /// Spans consumed by `value`, one per occupied tier, lowest tier first.
    ///
    /// The walk stops at the tier containing `value`, so tiers above it are
    /// never returned. `value = 0` occupies no tier.
    pub fn resolve(&self, value: Decimal) -> Vec<TierSpan<'a>> {
        let mut spans = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            if !tier.is_occupied_by(value) {
                break;
            }

            let upper = match tier.to_value {
                Some(to) => to.min(value),
                None => value,
            };
            let units = (upper - tier.lower_bound()).max(Decimal::ZERO);
            spans.push(TierSpan { index, tier, units });

            if tier.contains(value) {
                break;
            }
        }

        spans
    }

    /// The single tier in which `value` ends.
    pub fn containing_tier(&self, value: Decimal) -> Option<(usize, &'a Tier)> {
        self.tiers
            .iter()
            .enumerate()
            .find(|(_, tier)| tier.contains(value))
    }

    /// Width of the intersection between `[start, end]` and a tier.
    pub fn overlap(tier: &Tier, start: Decimal, end: Decimal) -> Decimal {
        let (low, high) = if start <= end { (start, end) } else { (end, start) };
        let high = match tier.to_value {
            Some(to) => high.min(to),
            None => high,
        };
        let low = low.max(tier.lower_bound());

        // `low` is never negative, so only an empty intersection can overflow.
        high.checked_sub(low)
            .unwrap_or(Decimal::ZERO)
            .max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> Vec<Tier> {
        vec![
            Tier::new(0, Some(10), Decimal::ONE, Decimal::ZERO),
            Tier::new(11, Some(50), Decimal::ONE, Decimal::ZERO),
            Tier::new(51, None, Decimal::ONE, Decimal::ZERO),
        ]
    }

    fn units(spans: &[TierSpan<'_>]) -> Vec<Decimal> {
        spans.iter().map(|s| s.units).collect()
    }

    #[test]
    fn zero_occupies_nothing() {
        let tiers = tiers();
        assert!(RangeResolver::new(&tiers).resolve(Decimal::ZERO).is_empty());
    }

    #[test]
    fn spans_stop_at_containing_tier() {
        let tiers = tiers();
        let resolver = RangeResolver::new(&tiers);

        assert_eq!(units(&resolver.resolve(Decimal::from(10))), vec![Decimal::from(10)]);
        assert_eq!(
            units(&resolver.resolve(Decimal::from(11))),
            vec![Decimal::from(10), Decimal::ONE]
        );
        assert_eq!(
            units(&resolver.resolve(Decimal::from(75))),
            vec![Decimal::from(10), Decimal::from(40), Decimal::from(25)]
        );
    }

    #[test]
    fn spans_sum_to_value() {
        let tiers = tiers();
        let resolver = RangeResolver::new(&tiers);

        let mut value = Decimal::ZERO;
        while value <= Decimal::from(120) {
            let total: Decimal = resolver.resolve(value).iter().map(|s| s.units).sum();
            assert_eq!(total, value, "coverage mismatch at {}", value);
            value += Decimal::new(25, 2);
        }
    }

    #[test]
    fn fractional_value_between_boundaries_lands_in_upper_tier() {
        let tiers = tiers();
        let resolver = RangeResolver::new(&tiers);
        let (index, _) = resolver.containing_tier(Decimal::new(105, 1)).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn overlap_is_direction_agnostic() {
        let tiers = tiers();
        let second = &tiers[1];
        assert_eq!(
            RangeResolver::overlap(second, Decimal::from(5), Decimal::from(20)),
            Decimal::from(10)
        );
        assert_eq!(
            RangeResolver::overlap(second, Decimal::from(20), Decimal::from(5)),
            Decimal::from(10)
        );
        assert_eq!(
            RangeResolver::overlap(second, Decimal::ZERO, Decimal::from(4)),
            Decimal::ZERO
        );
    }
}
