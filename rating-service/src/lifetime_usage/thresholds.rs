//! Threshold crossing detection.
//!
//! "Already billed" is answered only by the applied records passed in: a fixed
//! threshold is billed once it has any applied record, a recurring occurrence
//! with target `T` once an applied record of the recurring threshold carries a
//! lifetime amount of at least `T`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    AppliedUsageThreshold, ThresholdCompletion, ThresholdCrossing, UsageThreshold,
};

pub struct ThresholdCrossingDetector<'a> {
    /// Non-recurring thresholds, ascending by amount.
    fixed: Vec<&'a UsageThreshold>,
    recurring: Option<&'a UsageThreshold>,
    applied: &'a [AppliedUsageThreshold],
}

impl<'a> ThresholdCrossingDetector<'a> {
    pub fn new(thresholds: &'a [UsageThreshold], applied: &'a [AppliedUsageThreshold]) -> Self {
        let mut fixed: Vec<&UsageThreshold> = thresholds.iter().filter(|t| !t.recurring).collect();
        fixed.sort_by_key(|t| t.amount_cents);

        let recurring = thresholds
            .iter()
            .filter(|t| t.recurring && t.amount_cents > 0)
            .min_by_key(|t| t.amount_cents);

        Self {
            fixed,
            recurring,
            applied,
        }
    }

    /// Amount the recurring threshold counts from.
    fn recurring_base(&self) -> i64 {
        self.fixed.last().map_or(0, |t| t.amount_cents)
    }

    /// Recurring occurrences only start once every fixed threshold is behind.
    fn all_fixed_passed(&self, total: i64) -> bool {
        self.fixed.iter().all(|t| t.amount_cents <= total)
    }

    fn applied_for(
        &self,
        usage_threshold_id: Uuid,
    ) -> impl Iterator<Item = &'a AppliedUsageThreshold> {
        self.applied
            .iter()
            .filter(move |a| a.usage_threshold_id == usage_threshold_id)
    }

    fn fixed_reached_at(&self, threshold: &UsageThreshold) -> Option<DateTime<Utc>> {
        self.applied_for(threshold.usage_threshold_id)
            .map(|a| a.created_at)
            .min()
    }

    fn recurring_reached_at(
        &self,
        threshold: &UsageThreshold,
        target: i64,
    ) -> Option<DateTime<Utc>> {
        self.applied_for(threshold.usage_threshold_id)
            .filter(|a| a.lifetime_usage_amount_cents >= target)
            .map(|a| a.created_at)
            .min()
    }

    /// Threshold occurrences reached by `total` and not billed yet, ascending
    /// by target amount. Reaching a threshold exactly counts as crossing it.
    pub fn passed_thresholds(&self, total: i64) -> Vec<ThresholdCrossing> {
        let mut crossings: Vec<ThresholdCrossing> = self
            .fixed
            .iter()
            .filter(|t| t.amount_cents <= total)
            .filter(|t| self.fixed_reached_at(t).is_none())
            .map(|t| ThresholdCrossing {
                usage_threshold: (*t).clone(),
                target_amount_cents: t.amount_cents,
            })
            .collect();

        if let Some(recurring) = self.recurring.filter(|_| self.all_fixed_passed(total)) {
            let base = self.recurring_base();
            let consumed = self
                .applied_for(recurring.usage_threshold_id)
                .map(|a| a.lifetime_usage_amount_cents)
                .max();
            let occurrences = (total - base) / recurring.amount_cents;

            for k in 1..=occurrences {
                let target = base + k * recurring.amount_cents;
                if consumed.is_some_and(|amount| amount >= target) {
                    continue;
                }
                crossings.push(ThresholdCrossing {
                    usage_threshold: recurring.clone(),
                    target_amount_cents: target,
                });
            }
        }

        crossings.sort_by_key(|c| c.target_amount_cents);
        crossings
    }

    /// Progress toward every threshold up to the next one ahead of `total`.
    pub fn completion_state(&self, total: i64) -> Vec<ThresholdCompletion> {
        let mut completions = Vec::new();
        let mut last_passed = 0_i64;

        for threshold in &self.fixed {
            if threshold.amount_cents <= total {
                completions.push(ThresholdCompletion {
                    usage_threshold_id: threshold.usage_threshold_id,
                    recurring: false,
                    target_amount_cents: threshold.amount_cents,
                    completion_ratio: Decimal::ONE,
                    reached_at: self.fixed_reached_at(threshold),
                });
                last_passed = threshold.amount_cents;
                continue;
            }

            completions.push(ThresholdCompletion {
                usage_threshold_id: threshold.usage_threshold_id,
                recurring: false,
                target_amount_cents: threshold.amount_cents,
                completion_ratio: ratio(total - last_passed, threshold.amount_cents - last_passed),
                reached_at: None,
            });
            return completions;
        }

        if let Some(recurring) = self.recurring {
            let base = self.recurring_base();
            let step = recurring.amount_cents;
            let occurrences = (total - base).max(0) / step;

            for k in 1..=occurrences {
                let target = base + k * step;
                completions.push(ThresholdCompletion {
                    usage_threshold_id: recurring.usage_threshold_id,
                    recurring: true,
                    target_amount_cents: target,
                    completion_ratio: Decimal::ONE,
                    reached_at: self.recurring_reached_at(recurring, target),
                });
            }

            let remainder = (total - base).max(0) % step;
            completions.push(ThresholdCompletion {
                usage_threshold_id: recurring.usage_threshold_id,
                recurring: true,
                target_amount_cents: base + (occurrences + 1) * step,
                completion_ratio: ratio(remainder, step),
                reached_at: None,
            });
        }

        completions
    }
}

/// `progress / span` clamped to `[0, 1]`.
fn ratio(progress: i64, span: i64) -> Decimal {
    if span <= 0 {
        return Decimal::ONE;
    }
    (Decimal::from(progress) / Decimal::from(span)).clamp(Decimal::ZERO, Decimal::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionLineage;
    use chrono::TimeZone;

    fn threshold(amount_cents: i64, recurring: bool) -> UsageThreshold {
        UsageThreshold {
            usage_threshold_id: Uuid::new_v4(),
            plan_id: Uuid::nil(),
            threshold_display_name: None,
            amount_cents,
            recurring,
        }
    }

    fn applied(
        threshold: &UsageThreshold,
        lifetime_usage_amount_cents: i64,
    ) -> AppliedUsageThreshold {
        let lineage = SubscriptionLineage {
            external_id: "sub_ext".to_string(),
            subscription_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        AppliedUsageThreshold::new(
            threshold.usage_threshold_id,
            Uuid::new_v4(),
            Uuid::new_v4(),
            &lineage,
            lifetime_usage_amount_cents,
        )
    }

    fn targets(crossings: &[ThresholdCrossing]) -> Vec<i64> {
        crossings.iter().map(|c| c.target_amount_cents).collect()
    }

    #[test]
    fn exact_amount_counts_as_crossed() {
        let thresholds = vec![threshold(1_000, false), threshold(5_000, false)];
        let detector = ThresholdCrossingDetector::new(&thresholds, &[]);

        assert!(detector.passed_thresholds(999).is_empty());
        assert_eq!(targets(&detector.passed_thresholds(1_000)), vec![1_000]);
        assert_eq!(targets(&detector.passed_thresholds(6_000)), vec![1_000, 5_000]);
    }

    #[test]
    fn passed_thresholds_is_idempotent_until_recorded() {
        let thresholds = vec![threshold(1_000, false), threshold(5_000, false)];
        let first = ThresholdCrossingDetector::new(&thresholds, &[]).passed_thresholds(6_000);
        let second = ThresholdCrossingDetector::new(&thresholds, &[]).passed_thresholds(6_000);
        assert_eq!(first, second);

        let recorded = vec![applied(&thresholds[0], 6_000)];
        let after = ThresholdCrossingDetector::new(&thresholds, &recorded).passed_thresholds(6_000);
        assert_eq!(targets(&after), vec![5_000]);
    }

    #[test]
    fn recurring_occurrences_above_largest_fixed() {
        let thresholds = vec![threshold(100_000, false), threshold(50_000, true)];
        let recorded = vec![applied(&thresholds[0], 120_000)];
        let detector = ThresholdCrossingDetector::new(&thresholds, &recorded);

        let crossings = detector.passed_thresholds(230_000);
        assert_eq!(targets(&crossings), vec![150_000, 200_000]);
        assert!(crossings.iter().all(|c| c.usage_threshold.recurring));

        let completions = detector.completion_state(230_000);
        let in_progress = completions.last().unwrap();
        assert_eq!(in_progress.target_amount_cents, 250_000);
        assert_eq!(in_progress.completion_ratio, Decimal::new(6, 1));
        assert_eq!(in_progress.reached_at, None);
    }

    #[test]
    fn recurring_progress_counts_from_the_base() {
        let thresholds = vec![threshold(120_000, false), threshold(50_000, true)];
        let recorded = vec![applied(&thresholds[0], 120_000)];
        let detector = ThresholdCrossingDetector::new(&thresholds, &recorded);

        let completions = detector.completion_state(230_000);
        let in_progress = completions.last().unwrap();
        assert_eq!(in_progress.target_amount_cents, 270_000);
        assert_eq!(in_progress.completion_ratio, Decimal::new(2, 1));
    }

    #[test]
    fn recurring_occurrence_consumed_by_applied_amount() {
        let thresholds = vec![threshold(100_000, false), threshold(50_000, true)];
        let recorded = vec![
            applied(&thresholds[0], 100_000),
            applied(&thresholds[1], 160_000),
        ];
        let detector = ThresholdCrossingDetector::new(&thresholds, &recorded);

        assert_eq!(targets(&detector.passed_thresholds(230_000)), vec![200_000]);
    }

    #[test]
    fn recurring_waits_for_every_fixed_threshold() {
        let thresholds = vec![
            threshold(1_000, false),
            threshold(10_000, false),
            threshold(500, true),
        ];
        let detector = ThresholdCrossingDetector::new(&thresholds, &[]);

        assert_eq!(targets(&detector.passed_thresholds(9_999)), vec![1_000]);
        assert_eq!(
            targets(&detector.passed_thresholds(11_000)),
            vec![1_000, 10_000, 10_500, 11_000]
        );
    }

    #[test]
    fn recurring_without_fixed_counts_from_zero() {
        let thresholds = vec![threshold(300, true)];
        let detector = ThresholdCrossingDetector::new(&thresholds, &[]);
        assert_eq!(targets(&detector.passed_thresholds(700)), vec![300, 600]);
    }

    #[test]
    fn completion_ratio_of_next_fixed_threshold() {
        let thresholds = vec![threshold(1_000, false), threshold(5_000, false)];
        let recorded = vec![applied(&thresholds[0], 1_200)];
        let detector = ThresholdCrossingDetector::new(&thresholds, &recorded);

        let completions = detector.completion_state(2_000);
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[0].completion_ratio, Decimal::ONE);
        assert_eq!(completions[0].reached_at, Some(recorded[0].created_at));
        assert_eq!(completions[1].completion_ratio, Decimal::new(25, 2));
        assert_eq!(completions[1].reached_at, None);
    }

    #[test]
    fn completion_ratio_from_zero_before_first_threshold() {
        let thresholds = vec![threshold(1_000, false)];
        let detector = ThresholdCrossingDetector::new(&thresholds, &[]);
        let completions = detector.completion_state(250);
        assert_eq!(completions[0].completion_ratio, Decimal::new(25, 2));
    }
}
