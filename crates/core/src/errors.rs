//! Error types for the reimbursement core

use thiserror::Error;

/// Errors raised while validating inputs or scoring formulas
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// A labeled example failed validation
    #[error("invalid example field `{field}`: {reason}")]
    InvalidExample { field: &'static str, reason: String },

    /// A prediction input failed validation
    #[error("invalid trip input `{field}`: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// Aggregate statistics were requested over zero examples
    #[error("cannot evaluate over an empty example set: mean error is undefined")]
    EmptyExampleSet,

    /// Predicted value cannot be represented as a currency amount
    #[error("prediction {value} is not representable as a currency amount")]
    Unrepresentable { value: f64 },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, ModelError>;
