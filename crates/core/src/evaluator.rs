//! Formula evaluation against labeled examples
//!
//! Scores any [`Predict`] implementation: per-example absolute error,
//! aggregate totals and the worst cases in stable order.

use serde::Serialize;

use crate::errors::{ModelError, Result};
use crate::formula::{Formula, LinearRates};
use crate::types::{Example, TripInput};

/// Errors below this count as exact matches
pub const EXACT_MATCH_TOLERANCE: f64 = 0.01;
/// Errors below this count as close matches
pub const CLOSE_MATCH_TOLERANCE: f64 = 1.0;

/// Anything that maps a trip to an unrounded amount
pub trait Predict {
    fn predict_raw(&self, input: &TripInput) -> f64;
}

impl Predict for Formula {
    fn predict_raw(&self, input: &TripInput) -> f64 {
        self.evaluate(input)
    }
}

impl Predict for LinearRates {
    fn predict_raw(&self, input: &TripInput) -> f64 {
        self.apply(input)
    }
}

impl<F> Predict for F
where
    F: Fn(&TripInput) -> f64,
{
    fn predict_raw(&self, input: &TripInput) -> f64 {
        self(input)
    }
}

/// One scored example
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCase {
    /// Position in the evaluated example slice
    pub index: usize,
    pub example: Example,
    pub predicted: f64,
    pub error: f64,
}

impl ScoredCase {
    /// `expected - predicted`
    pub fn residual(&self) -> f64 {
        self.example.expected - self.predicted
    }
}

/// Aggregate score of one candidate formula
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub count: usize,
    pub total_error: f64,
    pub mean_error: f64,
    pub max_error: f64,
    pub exact_matches: usize,
    pub close_matches: usize,
    /// Sorted by descending error; ties keep dataset order
    pub worst_cases: Vec<ScoredCase>,
}

impl EvaluationResult {
    /// Total error rounded to the nearest whole unit
    pub fn score(&self) -> i64 {
        self.total_error.round() as i64
    }
}

/// Total absolute error only, without building the case list
pub fn total_error<P: Predict + ?Sized>(predictor: &P, examples: &[Example]) -> f64 {
    examples
        .iter()
        .map(|example| (example.expected - predictor.predict_raw(&example.input)).abs())
        .sum()
}

/// Score `predictor` over `examples`, keeping the `worst_n` largest errors.
///
/// Fails on an empty example set rather than reporting a zero mean.
pub fn evaluate<P: Predict + ?Sized>(
    predictor: &P,
    examples: &[Example],
    worst_n: usize,
) -> Result<EvaluationResult> {
    if examples.is_empty() {
        return Err(ModelError::EmptyExampleSet);
    }

    let mut cases: Vec<ScoredCase> = examples
        .iter()
        .enumerate()
        .map(|(index, example)| {
            let predicted = predictor.predict_raw(&example.input);
            ScoredCase {
                index,
                example: *example,
                predicted,
                error: (example.expected - predicted).abs(),
            }
        })
        .collect();

    let total_error: f64 = cases.iter().map(|c| c.error).sum();
    let max_error = cases.iter().map(|c| c.error).fold(0.0, f64::max);
    let exact_matches = cases
        .iter()
        .filter(|c| c.error < EXACT_MATCH_TOLERANCE)
        .count();
    let close_matches = cases
        .iter()
        .filter(|c| c.error < CLOSE_MATCH_TOLERANCE)
        .count();

    // sort_by is stable: equal errors keep dataset order
    cases.sort_by(|a, b| b.error.total_cmp(&a.error));
    cases.truncate(worst_n);

    Ok(EvaluationResult {
        count: examples.len(),
        total_error,
        mean_error: total_error / examples.len() as f64,
        max_error,
        exact_matches,
        close_matches,
        worst_cases: cases,
    })
}
