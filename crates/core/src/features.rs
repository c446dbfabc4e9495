//! Derived per-trip features
//!
//! Pure arithmetic over a [`TripInput`]. Computed fresh on every evaluation;
//! formulas may redefine buckets, so nothing here is cached.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::TripInput;

/// Secondary quantities computed from the raw inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedFeatures {
    pub spend_per_day: f64,
    pub miles_per_day: f64,
    /// Zero when no miles were driven
    pub receipts_per_mile: f64,
}

impl DerivedFeatures {
    /// Derive features. `days >= 1` is guaranteed by validation at load time.
    pub fn derive(input: &TripInput) -> Self {
        let days = f64::from(input.days.max(1));
        Self {
            spend_per_day: input.receipts / days,
            miles_per_day: input.miles / days,
            receipts_per_mile: ratio_or_zero(input.receipts, input.miles),
        }
    }
}

fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// A scalar a rule predicate may test
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Days,
    Miles,
    Receipts,
    SpendPerDay,
    MilesPerDay,
    ReceiptsPerMile,
}

impl Feature {
    pub fn value(self, input: &TripInput, features: &DerivedFeatures) -> f64 {
        match self {
            Feature::Days => f64::from(input.days),
            Feature::Miles => input.miles,
            Feature::Receipts => input.receipts,
            Feature::SpendPerDay => features.spend_per_day,
            Feature::MilesPerDay => features.miles_per_day,
            Feature::ReceiptsPerMile => features.receipts_per_mile,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::Days => "days",
            Feature::Miles => "miles",
            Feature::Receipts => "receipts",
            Feature::SpendPerDay => "spend_per_day",
            Feature::MilesPerDay => "miles_per_day",
            Feature::ReceiptsPerMile => "receipts_per_mile",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_rates() {
        let features = DerivedFeatures::derive(&TripInput::new(8, 795.0, 1645.99));
        assert!((features.spend_per_day - 205.74875).abs() < 1e-9);
        assert!((features.miles_per_day - 99.375).abs() < 1e-9);
    }

    #[test]
    fn zero_miles_yields_zero_ratio() {
        let features = DerivedFeatures::derive(&TripInput::new(3, 0.0, 120.0));
        assert_eq!(features.miles_per_day, 0.0);
        assert_eq!(features.receipts_per_mile, 0.0);
        assert_eq!(features.spend_per_day, 40.0);
    }

    #[test]
    fn feature_lookup_matches_inputs() {
        let input = TripInput::new(4, 200.0, 100.0);
        let features = DerivedFeatures::derive(&input);
        assert_eq!(Feature::Days.value(&input, &features), 4.0);
        assert_eq!(Feature::MilesPerDay.value(&input, &features), 50.0);
        assert_eq!(Feature::SpendPerDay.value(&input, &features), 25.0);
        assert_eq!(Feature::ReceiptsPerMile.value(&input, &features), 0.5);
    }

    #[test]
    fn receipts_per_mile_is_addressable_by_name() {
        let feature: Feature = serde_json::from_str("\"receipts_per_mile\"").unwrap();
        assert_eq!(feature, Feature::ReceiptsPerMile);
        assert_eq!(feature.to_string(), "receipts_per_mile");
    }
}
