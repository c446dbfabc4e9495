//! Reimbursement Core - formulas, evaluation and prediction
//!
//! Estimates a travel reimbursement from trip length, miles and receipts
//! with a rule-based piecewise-linear [`Formula`], and scores candidate
//! formulas against labeled examples.

pub mod errors;
pub mod evaluator;
pub mod features;
pub mod formula;
pub mod noise;
pub mod predicate;
pub mod predictor;
pub mod rounding;
pub mod types;

pub use errors::{ModelError, Result};
pub use evaluator::{evaluate, total_error, EvaluationResult, Predict, ScoredCase};
pub use features::{DerivedFeatures, Feature};
pub use formula::{
    Correction, CorrectionRule, Formula, FormulaBuilder, LinearRates, OverrideRule, RateOverride,
};
pub use noise::NoiseTerm;
pub use predicate::{Comparison, Condition, Predicate};
pub use predictor::ReimbursementPredictor;
pub use rounding::{round_currency, Amount};
pub use types::{Example, TripInput};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
