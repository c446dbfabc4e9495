//! Currency rounding
//!
//! Policy: half-up (midpoint away from zero) at two decimal places, applied
//! to the shortest decimal representation of the raw value, so `644.685`
//! becomes `644.69`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{ModelError, Result};

pub const CURRENCY_DECIMALS: u32 = 2;

/// A rounded currency amount, always carrying exactly two decimal places
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round a raw prediction to a currency [`Amount`]
pub fn round_currency(raw: f64) -> Result<Amount> {
    if !raw.is_finite() {
        return Err(ModelError::Unrepresentable { value: raw });
    }
    // Display gives the shortest string that round-trips to `raw`; values
    // with more digits than a Decimal holds fall back to the binary value
    let decimal = Decimal::from_str(&raw.to_string())
        .or_else(|_| Decimal::try_from(raw))
        .map_err(|_| ModelError::Unrepresentable { value: raw })?;
    let mut rounded =
        decimal.round_dp_with_strategy(CURRENCY_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(CURRENCY_DECIMALS);
    Ok(Amount(rounded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rounded(raw: f64) -> String {
        round_currency(raw).unwrap().to_string()
    }

    #[test]
    fn midpoint_rounds_up() {
        assert_eq!(rounded(644.685), "644.69");
        assert_eq!(rounded(0.125), "0.13");
    }

    #[test]
    fn always_two_decimals() {
        assert_eq!(rounded(800.0), "800.00");
        assert_eq!(rounded(902.1), "902.10");
        assert_eq!(rounded(446.944), "446.94");
    }

    #[test]
    fn negative_midpoint_rounds_away_from_zero() {
        assert_eq!(rounded(-1.005), "-1.01");
    }

    #[test]
    fn rejects_non_finite() {
        assert!(round_currency(f64::NAN).is_err());
        assert!(round_currency(f64::INFINITY).is_err());
    }

    #[test]
    fn converts_back_to_float() {
        assert!((round_currency(2907.09).unwrap().to_f64() - 2907.09).abs() < 1e-9);
    }
}
