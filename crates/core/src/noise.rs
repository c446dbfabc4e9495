//! Deterministic jitter term
//!
//! Several historical formula variants add a small "variance" that looks
//! random but is a pure hash of the inputs. The integer arithmetic (floor,
//! modulo) is kept exact so a historical variant reproduces bit for bit.

use serde::{Deserialize, Serialize};

use crate::types::TripInput;

/// `h = (a*days + b*floor(miles) + c*floor(receipts*100)) mod m`,
/// contributing `(h - center) * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseTerm {
    pub day_weight: i64,
    pub mile_weight: i64,
    pub cent_weight: i64,
    pub modulus: i64,
    pub center: i64,
    pub scale: f64,
}

impl NoiseTerm {
    /// Variant shipped with the historical calculator: range [-10, 8]
    pub const DECIMAL: NoiseTerm = NoiseTerm {
        day_weight: 3,
        mile_weight: 7,
        cent_weight: 11,
        modulus: 10,
        center: 5,
        scale: 2.0,
    };

    /// Variant used by the later optimizer runs: range [-14.4, 12.6]
    pub const HEX: NoiseTerm = NoiseTerm {
        day_weight: 7,
        mile_weight: 11,
        cent_weight: 13,
        modulus: 16,
        center: 8,
        scale: 1.8,
    };

    /// Raw bucket in `[0, modulus)`
    pub fn hash(&self, input: &TripInput) -> i64 {
        let whole_miles = input.miles.floor() as i64;
        let cents = (input.receipts * 100.0).floor() as i64;
        let h = i64::from(input.days)
            .wrapping_mul(self.day_weight)
            .wrapping_add(whole_miles.wrapping_mul(self.mile_weight))
            .wrapping_add(cents.wrapping_mul(self.cent_weight));
        h.rem_euclid(self.modulus.max(1))
    }

    pub fn adjustment(&self, input: &TripInput) -> f64 {
        (self.hash(input) - self.center) as f64 * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let input = TripInput::new(5, 516.0, 1878.49);
        assert_eq!(NoiseTerm::HEX.hash(&input), NoiseTerm::HEX.hash(&input));
    }

    #[test]
    fn decimal_variant_matches_hand_computation() {
        // 3*1 + 7*10 + 11*floor(25.5*100) = 3 + 70 + 28050 = 28123 -> 3
        let input = TripInput::new(1, 10.9, 25.5);
        assert_eq!(NoiseTerm::DECIMAL.hash(&input), 3);
        assert_eq!(NoiseTerm::DECIMAL.adjustment(&input), -4.0);
    }

    #[test]
    fn cents_use_floating_floor() {
        // 1.15 * 100 is 114.99999999999999 in binary floating point
        let input = TripInput::new(0, 0.0, 1.15);
        assert_eq!(NoiseTerm::HEX.hash(&input), (114 * 13) % 16);
    }

    #[test]
    fn adjustment_stays_in_range() {
        for days in 1..20 {
            for miles in [0.0, 13.7, 500.0, 1082.0] {
                let input = TripInput::new(days, miles, 321.45);
                let adj = NoiseTerm::HEX.adjustment(&input);
                assert!((-14.4..=12.6 + 1e-9).contains(&adj));
            }
        }
    }
}
