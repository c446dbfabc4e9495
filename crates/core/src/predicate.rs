//! Rule predicates over raw and derived features
//!
//! A predicate is plain data (a conjunction of comparisons) so rule sets can
//! be serialized, enumerated and combined by the search.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::features::{DerivedFeatures, Feature};
use crate::types::TripInput;

/// Comparison operator of a single condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Eq => lhs == rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

/// `feature <op> value`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub feature: Feature,
    pub op: Comparison,
    pub value: f64,
}

impl Condition {
    pub fn new(feature: Feature, op: Comparison, value: f64) -> Self {
        Self { feature, op, value }
    }

    pub fn matches(&self, input: &TripInput, features: &DerivedFeatures) -> bool {
        self.op.holds(self.feature.value(input, features), self.value)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.feature, self.op.symbol(), self.value)
    }
}

/// Conjunction of conditions. The empty predicate matches every trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn when(feature: Feature, op: Comparison, value: f64) -> Self {
        Self::always().and(feature, op, value)
    }

    pub fn days_eq(days: u32) -> Self {
        Self::when(Feature::Days, Comparison::Eq, f64::from(days))
    }

    pub fn days_at_least(days: u32) -> Self {
        Self::when(Feature::Days, Comparison::Ge, f64::from(days))
    }

    pub fn and(mut self, feature: Feature, op: Comparison, value: f64) -> Self {
        self.conditions.push(Condition::new(feature, op, value));
        self
    }

    /// `lower <= feature < upper`
    pub fn within(self, feature: Feature, lower: f64, upper: f64) -> Self {
        self.and(feature, Comparison::Ge, lower)
            .and(feature, Comparison::Lt, upper)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_always(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, input: &TripInput, features: &DerivedFeatures) -> bool {
        self.conditions.iter().all(|c| c.matches(input, features))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            return f.write_str("always");
        }
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                f.write_str(" && ")?;
            }
            write!(f, "{condition}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(predicate: &Predicate, days: u32, miles: f64, receipts: f64) -> bool {
        let input = TripInput::new(days, miles, receipts);
        predicate.matches(&input, &DerivedFeatures::derive(&input))
    }

    #[test]
    fn conjunction_requires_all_conditions() {
        let p = Predicate::days_eq(8).and(Feature::SpendPerDay, Comparison::Gt, 200.0);
        assert!(eval(&p, 8, 795.0, 1645.99));
        assert!(!eval(&p, 8, 795.0, 800.0));
        assert!(!eval(&p, 7, 795.0, 1645.99));
    }

    #[test]
    fn within_is_half_open() {
        let p = Predicate::always().within(Feature::SpendPerDay, 100.0, 150.0);
        assert!(eval(&p, 1, 0.0, 100.0));
        assert!(!eval(&p, 1, 0.0, 150.0));
    }

    #[test]
    fn receipts_per_mile_condition() {
        let p = Predicate::when(Feature::ReceiptsPerMile, Comparison::Gt, 2.0);
        assert!(eval(&p, 1, 100.0, 250.0));
        assert!(!eval(&p, 1, 100.0, 150.0));
        // no miles driven reads as a zero ratio
        assert!(!eval(&p, 1, 0.0, 150.0));
    }

    #[test]
    fn empty_predicate_always_matches() {
        assert!(eval(&Predicate::always(), 3, 1.0, 1.0));
        assert_eq!(Predicate::always().to_string(), "always");
    }

    #[test]
    fn renders_readable_conditions() {
        let p = Predicate::days_eq(11)
            .and(Feature::SpendPerDay, Comparison::Gt, 100.0)
            .and(Feature::SpendPerDay, Comparison::Lt, 120.0);
        assert_eq!(
            p.to_string(),
            "days == 11 && spend_per_day > 100 && spend_per_day < 120"
        );
    }
}
