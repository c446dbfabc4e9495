//! Trip inputs and labeled examples
//!
//! Field names follow the dataset format so records deserialize directly.

use serde::{Deserialize, Serialize};

use crate::errors::{ModelError, Result};

/// The three raw inputs of a reimbursement request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripInput {
    #[serde(rename = "trip_duration_days")]
    pub days: u32,
    #[serde(rename = "miles_traveled")]
    pub miles: f64,
    #[serde(rename = "total_receipts_amount")]
    pub receipts: f64,
}

impl TripInput {
    pub fn new(days: u32, miles: f64, receipts: f64) -> Self {
        Self {
            days,
            miles,
            receipts,
        }
    }

    /// Check the invariants every formula relies on
    pub fn validate(&self) -> Result<()> {
        check_input(self).map_err(|(field, reason)| ModelError::InvalidInput { field, reason })
    }
}

/// A labeled example: trip input plus the amount the legacy system paid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input: TripInput,
    #[serde(rename = "expected_output")]
    pub expected: f64,
}

impl Example {
    pub fn new(days: u32, miles: f64, receipts: f64, expected: f64) -> Self {
        Self {
            input: TripInput::new(days, miles, receipts),
            expected,
        }
    }

    pub fn days(&self) -> u32 {
        self.input.days
    }

    pub fn miles(&self) -> f64 {
        self.input.miles
    }

    pub fn receipts(&self) -> f64 {
        self.input.receipts
    }

    /// Reject records that would break derived features or scoring
    pub fn validate(&self) -> Result<()> {
        check_input(&self.input)
            .map_err(|(field, reason)| ModelError::InvalidExample { field, reason })?;
        if !self.expected.is_finite() {
            return Err(ModelError::InvalidExample {
                field: "expected_output",
                reason: format!("must be finite, got {}", self.expected),
            });
        }
        Ok(())
    }
}

fn check_input(input: &TripInput) -> std::result::Result<(), (&'static str, String)> {
    if input.days < 1 {
        return Err(("trip_duration_days", "must be at least 1".to_string()));
    }
    for (field, value) in [
        ("miles_traveled", input.miles),
        ("total_receipts_amount", input.receipts),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err((field, format!("must be finite and non-negative, got {value}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_dataset_record() {
        let json = r#"{
            "input": {"trip_duration_days": 8, "miles_traveled": 795, "total_receipts_amount": 1645.99},
            "expected_output": 644.69
        }"#;
        let example: Example = serde_json::from_str(json).unwrap();
        assert_eq!(example.days(), 8);
        assert_eq!(example.miles(), 795.0);
        assert_eq!(example.receipts(), 1645.99);
        assert_eq!(example.expected, 644.69);
    }

    #[test]
    fn rejects_zero_days() {
        let err = Example::new(0, 10.0, 10.0, 100.0).validate().unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidExample {
                field: "trip_duration_days",
                ..
            }
        ));
    }

    #[test]
    fn rejects_negative_and_non_finite_amounts() {
        assert!(Example::new(1, -1.0, 10.0, 100.0).validate().is_err());
        assert!(Example::new(1, 1.0, f64::NAN, 100.0).validate().is_err());
        assert!(Example::new(1, 1.0, 1.0, f64::INFINITY).validate().is_err());
        assert!(TripInput::new(2, 0.0, 0.0).validate().is_ok());
    }
}
