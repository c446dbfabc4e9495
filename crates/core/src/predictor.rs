//! Reimbursement predictor
//!
//! The selected formula exposed as a pure function of the three inputs.
//! No clock, no randomness, no shared state.

use tracing::debug;

use crate::errors::Result;
use crate::formula::Formula;
use crate::rounding::{round_currency, Amount};
use crate::types::TripInput;

#[derive(Debug, Clone, PartialEq)]
pub struct ReimbursementPredictor {
    formula: Formula,
}

impl Default for ReimbursementPredictor {
    fn default() -> Self {
        Self::new(Formula::fitted())
    }
}

impl ReimbursementPredictor {
    pub fn new(formula: Formula) -> Self {
        Self { formula }
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    /// Predict the rounded reimbursement for one trip
    pub fn predict(&self, days: u32, miles: f64, receipts: f64) -> Result<Amount> {
        self.predict_input(&TripInput::new(days, miles, receipts))
    }

    pub fn predict_input(&self, input: &TripInput) -> Result<Amount> {
        input.validate()?;
        let raw = self.formula.evaluate(input);
        debug!(formula = %self.formula.name, raw, "raw prediction");
        round_currency(raw)
    }
}
