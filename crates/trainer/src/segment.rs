//! Segmentation of examples into buckets
//!
//! Groups examples by trip length and spend / mileage bands and summarizes,
//! per bucket, the implied receipt coefficient relative to a base formula
//! that excludes the receipt term.

use reimburse_core::{
    DerivedFeatures, Example, Feature, OverrideRule, Predicate, Predict, RateOverride,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, instrument};

/// Half-open band `[lower, lower + width)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Band {
    pub lower: i64,
    pub width: u32,
}

impl Band {
    /// `floor(value / width) * width`
    pub fn of(value: f64, width: u32) -> Self {
        let width = width.max(1);
        let lower = (value / f64::from(width)).floor() as i64 * i64::from(width);
        Self { lower, width }
    }

    pub fn upper(&self) -> i64 {
        self.lower + i64::from(self.width)
    }
}

/// Discrete segment key; unset dimensions are not part of the bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BucketKey {
    pub days: Option<u32>,
    pub spend: Option<Band>,
    pub miles: Option<Band>,
}

impl BucketKey {
    /// Predicate matching exactly the trips that fall in this bucket
    pub fn predicate(&self) -> Predicate {
        let mut predicate = match self.days {
            Some(days) => Predicate::days_eq(days),
            None => Predicate::always(),
        };
        if let Some(band) = self.spend {
            predicate = predicate.within(
                Feature::SpendPerDay,
                band.lower as f64,
                band.upper() as f64,
            );
        }
        if let Some(band) = self.miles {
            predicate = predicate.within(
                Feature::MilesPerDay,
                band.lower as f64,
                band.upper() as f64,
            );
        }
        predicate
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(3);
        if let Some(days) = self.days {
            parts.push(format!("{days}d"));
        }
        if let Some(band) = self.spend {
            parts.push(format!("{}spend", band.lower));
        }
        if let Some(band) = self.miles {
            parts.push(format!("{}mpd", band.lower));
        }
        if parts.is_empty() {
            f.write_str("all")
        } else {
            f.write_str(&parts.join("_"))
        }
    }
}

/// Maps an example to its bucket
pub trait Bucketing {
    fn bucket(&self, example: &Example, features: &DerivedFeatures) -> BucketKey;
}

impl<F> Bucketing for F
where
    F: Fn(&Example, &DerivedFeatures) -> BucketKey,
{
    fn bucket(&self, example: &Example, features: &DerivedFeatures) -> BucketKey {
        self(example, features)
    }
}

/// Declarative bucketing: trip length and/or fixed-width rate bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketSpec {
    pub by_days: bool,
    pub spend_width: Option<u32>,
    pub miles_width: Option<u32>,
}

impl Default for BucketSpec {
    fn default() -> Self {
        Self {
            by_days: true,
            spend_width: Some(50),
            miles_width: None,
        }
    }
}

impl Bucketing for BucketSpec {
    fn bucket(&self, example: &Example, features: &DerivedFeatures) -> BucketKey {
        BucketKey {
            days: self.by_days.then_some(example.days()),
            spend: self
                .spend_width
                .map(|width| Band::of(features.spend_per_day, width)),
            miles: self
                .miles_width
                .map(|width| Band::of(features.miles_per_day, width)),
        }
    }
}

/// Receipt multiplier that makes `base + r * receipts` hit the expected value.
/// Undefined (None) when there are no receipts.
pub fn implied_coefficient<P: Predict + ?Sized>(example: &Example, base: &P) -> Option<f64> {
    if example.receipts() == 0.0 {
        return None;
    }
    Some((example.expected - base.predict_raw(&example.input)) / example.receipts())
}

/// Distribution of implied coefficients within one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; zero for a single member
    pub std_dev: f64,
    pub median: f64,
    pub q25: f64,
    pub q75: f64,
    pub min: f64,
    pub max: f64,
}

impl SegmentStats {
    /// Summarize values; `None` for an empty slice
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        // Summing in sorted order keeps the mean independent of input order
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let std_dev = if n > 1 {
            let ss: f64 = sorted.iter().map(|v| (v - mean) * (v - mean)).sum();
            (ss / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };

        Some(Self {
            count: n,
            mean,
            std_dev,
            median,
            q25: sorted[n / 4],
            q75: sorted[(3 * n) / 4],
            min: sorted[0],
            max: sorted[n - 1],
        })
    }
}

/// Printable row of a segment table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub bucket: String,
    pub stats: SegmentStats,
}

/// Per-bucket statistics for one base formula and bucketing rule
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTable {
    pub segments: BTreeMap<BucketKey, SegmentStats>,
    /// Examples without receipts (no implied coefficient)
    pub skipped: usize,
    pub min_support: usize,
}

impl SegmentTable {
    pub fn get(&self, key: &BucketKey) -> Option<&SegmentStats> {
        self.segments.get(key)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_supported(&self, stats: &SegmentStats) -> bool {
        stats.count >= self.min_support
    }

    /// Buckets with enough members to inform the search
    pub fn supported(&self) -> impl Iterator<Item = (&BucketKey, &SegmentStats)> + '_ {
        self.segments
            .iter()
            .filter(move |(_, stats)| self.is_supported(stats))
    }

    /// Supported buckets by descending support, then key
    pub fn ranked(&self) -> Vec<(&BucketKey, &SegmentStats)> {
        let mut ranked: Vec<_> = self.supported().collect();
        ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    pub fn summaries(&self) -> Vec<SegmentSummary> {
        self.ranked()
            .into_iter()
            .map(|(key, stats)| SegmentSummary {
                bucket: key.to_string(),
                stats: *stats,
            })
            .collect()
    }

    /// Pattern model: one receipt-rate override per supported bucket, set to
    /// the bucket median.
    pub fn to_override_rules(&self) -> Vec<OverrideRule> {
        self.ranked()
            .into_iter()
            .map(|(key, stats)| {
                OverrideRule::new(
                    key.to_string(),
                    key.predicate(),
                    RateOverride::receipt_rate(stats.median),
                )
            })
            .collect()
    }
}

/// Buckets examples and computes implied-coefficient statistics
#[derive(Debug, Clone)]
pub struct Segmenter<B, P> {
    bucketing: B,
    base: P,
    min_support: usize,
}

impl<B: Bucketing, P: Predict> Segmenter<B, P> {
    /// `base` should exclude the receipt term
    pub fn new(bucketing: B, base: P, min_support: usize) -> Self {
        Self {
            bucketing,
            base,
            min_support,
        }
    }

    pub fn min_support(&self) -> usize {
        self.min_support
    }

    pub fn bucket_of(&self, example: &Example) -> BucketKey {
        let features = DerivedFeatures::derive(&example.input);
        self.bucketing.bucket(example, &features)
    }

    pub fn implied(&self, example: &Example) -> Option<f64> {
        implied_coefficient(example, &self.base)
    }

    /// Bucket and implied coefficient of every example with receipts
    pub fn assign<'a>(
        &'a self,
        examples: &'a [Example],
    ) -> impl Iterator<Item = (usize, BucketKey, f64)> + 'a {
        examples.iter().enumerate().filter_map(move |(index, example)| {
            self.implied(example)
                .map(|implied| (index, self.bucket_of(example), implied))
        })
    }

    #[instrument(skip(self, examples), fields(examples = examples.len()))]
    pub fn segment(&self, examples: &[Example]) -> SegmentTable {
        let mut members: BTreeMap<BucketKey, Vec<f64>> = BTreeMap::new();
        for (_, key, implied) in self.assign(examples) {
            members.entry(key).or_default().push(implied);
        }
        let assigned: usize = members.values().map(Vec::len).sum();

        let segments: BTreeMap<_, _> = members
            .into_iter()
            .filter_map(|(key, values)| SegmentStats::from_values(&values).map(|s| (key, s)))
            .collect();

        debug!(
            "Segmented into {} buckets ({} with support >= {})",
            segments.len(),
            segments
                .values()
                .filter(|s| s.count >= self.min_support)
                .count(),
            self.min_support
        );

        SegmentTable {
            segments,
            skipped: examples.len() - assigned,
            min_support: self.min_support,
        }
    }
}
