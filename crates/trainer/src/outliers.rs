//! Outlier detection over segment statistics
//!
//! Flags examples whose implied receipt coefficient sits more than
//! `threshold` standard deviations from their bucket mean and proposes a
//! receipt-rate override confined to the example's region. Suggestions are
//! advisory: they feed the rule-subset search and never touch the dataset.

use reimburse_core::{
    DerivedFeatures, Example, Feature, OverrideRule, Predicate, Predict, RateOverride,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::segment::{Band, BucketKey, Bucketing, SegmentStats, SegmentTable, Segmenter};

/// Outlier detection settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Deviation from the bucket mean, in standard deviations
    pub threshold_std_devs: f64,
    /// Spend-per-day band width used when the bucket has no spend band
    pub region_width: u32,
    /// Upper bound on merged candidate rules
    pub max_candidates: usize,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            threshold_std_devs: 2.0,
            region_width: 50,
            max_candidates: 8,
        }
    }
}

/// One flagged example
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierCandidate {
    pub index: usize,
    pub example: Example,
    pub bucket: BucketKey,
    pub implied: f64,
    pub segment_mean: f64,
    pub segment_std_dev: f64,
    /// Signed distance from the mean in standard deviations
    pub deviation: f64,
    pub suggestion: OverrideRule,
}

/// Flagged examples, most severe first
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutlierReport {
    pub outliers: Vec<OutlierCandidate>,
}

impl OutlierReport {
    pub fn len(&self) -> usize {
        self.outliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outliers.is_empty()
    }

    /// Merge suggestions sharing a predicate. The merged rate is the median
    /// of the members' implied coefficients, rounded to cents.
    pub fn candidate_rules(&self, max: usize) -> Vec<OverrideRule> {
        let mut groups: Vec<(&OverrideRule, Vec<f64>)> = Vec::new();
        for outlier in &self.outliers {
            match groups
                .iter_mut()
                .find(|(rule, _)| rule.predicate == outlier.suggestion.predicate)
            {
                Some((_, implied)) => implied.push(outlier.implied),
                None => groups.push((&outlier.suggestion, vec![outlier.implied])),
            }
        }

        groups
            .into_iter()
            .take(max)
            .map(|(rule, implied)| {
                let median = SegmentStats::from_values(&implied)
                    .map(|s| s.median)
                    .unwrap_or_default();
                OverrideRule::new(
                    rule.name.clone(),
                    rule.predicate.clone(),
                    RateOverride::receipt_rate(round_rate(median)),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutlierDetector {
    config: OutlierConfig,
}

impl OutlierDetector {
    pub fn new(config: OutlierConfig) -> Self {
        Self { config }
    }

    /// Examine supported buckets of `table` (built by `segmenter` over the
    /// same examples) and flag deviating members.
    #[instrument(skip_all, fields(examples = examples.len(), threshold = self.config.threshold_std_devs))]
    pub fn detect<B: Bucketing, P: Predict>(
        &self,
        segmenter: &Segmenter<B, P>,
        table: &SegmentTable,
        examples: &[Example],
    ) -> OutlierReport {
        let mut outliers: Vec<OutlierCandidate> = segmenter
            .assign(examples)
            .filter_map(|(index, bucket, implied)| {
                let stats = table.get(&bucket).filter(|s| table.is_supported(s))?;
                if stats.std_dev <= 0.0 {
                    return None;
                }
                let deviation = (implied - stats.mean) / stats.std_dev;
                if deviation.abs() <= self.config.threshold_std_devs {
                    return None;
                }
                let example = examples[index];
                Some(OutlierCandidate {
                    index,
                    example,
                    bucket,
                    implied,
                    segment_mean: stats.mean,
                    segment_std_dev: stats.std_dev,
                    deviation,
                    suggestion: self.suggest(&example, &bucket, implied),
                })
            })
            .collect();

        outliers.sort_by(|a, b| b.deviation.abs().total_cmp(&a.deviation.abs()));
        debug!("Flagged {} outliers", outliers.len());

        OutlierReport { outliers }
    }

    /// Override confined to the example's trip length and rate bands
    fn suggest(&self, example: &Example, bucket: &BucketKey, implied: f64) -> OverrideRule {
        let features = DerivedFeatures::derive(&example.input);
        let spend = bucket
            .spend
            .unwrap_or_else(|| Band::of(features.spend_per_day, self.config.region_width));

        let mut predicate = Predicate::days_eq(example.days()).within(
            Feature::SpendPerDay,
            spend.lower as f64,
            spend.upper() as f64,
        );
        if let Some(miles) = bucket.miles {
            predicate = predicate.within(
                Feature::MilesPerDay,
                miles.lower as f64,
                miles.upper() as f64,
            );
        }

        let region = BucketKey {
            days: Some(example.days()),
            spend: Some(spend),
            miles: bucket.miles,
        };
        OverrideRule::new(
            format!("outlier {region}"),
            predicate,
            RateOverride::receipt_rate(round_rate(implied)),
        )
    }
}

fn round_rate(rate: f64) -> f64 {
    (rate * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::BucketSpec;
    use reimburse_core::LinearRates;

    fn by_days() -> BucketSpec {
        BucketSpec {
            by_days: true,
            spend_width: None,
            miles_width: None,
        }
    }

    /// Eight 3-day trips paid at receipt rate 0.5 plus one paid at -0.5
    fn examples() -> Vec<Example> {
        let mut examples: Vec<Example> = (0..8)
            .map(|i| {
                let receipts = 100.0 + 10.0 * f64::from(i);
                Example::new(3, 0.0, receipts, 300.0 + 0.5 * receipts)
            })
            .collect();
        examples.push(Example::new(3, 0.0, 900.0, 300.0 - 0.5 * 900.0));
        examples
    }

    fn segmenter() -> Segmenter<BucketSpec, LinearRates> {
        Segmenter::new(by_days(), LinearRates::new(100.0, 0.0, 0.0), 3)
    }

    #[test]
    fn flags_deviating_member() {
        let examples = examples();
        let segmenter = segmenter();
        let table = segmenter.segment(&examples);
        let report = OutlierDetector::default().detect(&segmenter, &table, &examples);

        assert_eq!(report.len(), 1);
        let outlier = &report.outliers[0];
        assert_eq!(outlier.index, 8);
        assert!(outlier.deviation < -2.0);
        assert!((outlier.implied + 0.5).abs() < 1e-9);
        assert_eq!(
            outlier.suggestion.predicate.to_string(),
            "days == 3 && spend_per_day >= 300 && spend_per_day < 350"
        );
        assert_eq!(outlier.suggestion.rates.receipt_rate, Some(-0.5));
        assert_eq!(outlier.suggestion.name, "outlier 3d_300spend");
    }

    #[test]
    fn unsupported_buckets_are_ignored() {
        let examples = examples();
        let segmenter = Segmenter::new(by_days(), LinearRates::new(100.0, 0.0, 0.0), 50);
        let table = segmenter.segment(&examples);
        let report = OutlierDetector::default().detect(&segmenter, &table, &examples);
        assert!(report.is_empty());
    }

    #[test]
    fn zero_spread_flags_nothing() {
        let examples: Vec<Example> = (0..4)
            .map(|i| Example::new(2, 0.0, 50.0 + f64::from(i), 200.0))
            .collect();
        let segmenter = Segmenter::new(by_days(), LinearRates::new(100.0, 0.0, 0.0), 3);
        let table = segmenter.segment(&examples);
        let report = OutlierDetector::new(OutlierConfig {
            threshold_std_devs: 0.0,
            ..OutlierConfig::default()
        })
        .detect(&segmenter, &table, &examples);
        assert!(report.is_empty());
    }

    #[test]
    fn detection_leaves_examples_untouched() {
        let examples = examples();
        let before = examples.clone();
        let segmenter = segmenter();
        let table = segmenter.segment(&examples);
        let _ = OutlierDetector::default().detect(&segmenter, &table, &examples);
        assert_eq!(examples, before);
    }

    #[test]
    fn candidate_rules_merge_shared_regions() {
        let rule = |name: &str, rate: f64| {
            OverrideRule::new(name, Predicate::days_eq(4), RateOverride::receipt_rate(rate))
        };
        let candidate = |implied: f64, name: &str| OutlierCandidate {
            index: 0,
            example: Example::new(4, 0.0, 10.0, 10.0),
            bucket: BucketKey::default(),
            implied,
            segment_mean: 0.0,
            segment_std_dev: 1.0,
            deviation: 3.0,
            suggestion: rule(name, implied),
        };
        let report = OutlierReport {
            outliers: vec![candidate(0.1, "a"), candidate(0.3, "b"), candidate(0.2, "c")],
        };
        let rules = report.candidate_rules(5);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "a");
        assert_eq!(rules[0].rates.receipt_rate, Some(0.2));
        assert!(report.candidate_rules(0).is_empty());
    }
}
