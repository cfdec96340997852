//! Unit-to-pounds conversion.
//!
//! A fixed alias table maps every unit spelling the ledgers use to a
//! pounds-equivalent multiplier. Liquid units go through the pound-equivalent
//! density approximations used across the pipeline (a gallon weighs 8.34 lbs).

use std::collections::HashMap;
use std::sync::LazyLock;

use tracing::warn;

/// Alias groups and their pounds-per-unit multipliers.
const ALIAS_GROUPS: &[(&str, f64)] = &[
    ("ounce,ounces,oz", 0.0625),
    ("pound,pounds,lb,lbs", 1.0),
    ("g,gr,gram,grams", 0.002205),
    ("k,kg,kilo,kilos,kilogram,kilograms", 2.20462),
    ("liter,liters,ltr,lt,l", 2.20462),
    ("pt,pint,pints", 1.04),
    ("quarts,qt", 2.085),
    ("gal,gl,gall,gallon,gallons", 8.34),
];

static POUNDS_PER_UNIT: LazyLock<HashMap<&'static str, f64>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for (aliases, factor) in ALIAS_GROUPS {
        for alias in aliases.split(',') {
            map.insert(alias, *factor);
        }
    }
    map
});

/// Convert a weight in `unit` to pounds, rounded to 2 decimals.
///
/// Unknown units warn and return exactly 0.0 — an unrecognized unit zeroes
/// out rather than aborting the batch.
pub fn to_pounds(weight: f64, unit: &str) -> f64 {
    let key = unit.trim().to_lowercase();
    match POUNDS_PER_UNIT.get(key.as_str()) {
        Some(factor) => round_dp(weight * factor, 2),
        None => {
            warn!(unit, "unit not found in conversion table, weight contributes 0");
            0.0
        }
    }
}

/// Round to `places` decimal places.
pub(crate) fn round_dp(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_units_convert() {
        assert_eq!(to_pounds(1.0, "lbs"), 1.0);
        assert_eq!(to_pounds(16.0, "oz"), 1.0);
        assert_eq!(to_pounds(1.0, "gallon"), 8.34);
        assert_eq!(to_pounds(1000.0, "grams"), 2.21);
    }

    #[test]
    fn five_kilos_is_11_02_pounds() {
        assert_eq!(to_pounds(5.0, "kg"), 11.02);
    }

    #[test]
    fn lookup_is_case_and_whitespace_insensitive() {
        assert_eq!(to_pounds(5.0, " KG "), 11.02);
        assert_eq!(to_pounds(2.0, "Pints"), 2.08);
    }

    #[test]
    fn conversion_is_linear() {
        for unit in ["oz", "kg", "liters", "gal", "qt"] {
            let one = to_pounds(3.7, unit);
            let two = to_pounds(7.4, unit);
            assert!(
                (two - 2.0 * one).abs() < 0.011,
                "doubling {unit} broke linearity: {one} vs {two}"
            );
        }
    }

    #[test]
    fn unknown_unit_is_exactly_zero() {
        assert_eq!(to_pounds(100.0, "stone"), 0.0);
        assert_eq!(to_pounds(100.0, ""), 0.0);
    }

    #[test]
    fn round_dp_matches_contract() {
        assert_eq!(round_dp(6.8755, 4), 6.8755);
        assert_eq!(round_dp(1.0 / 3.0, 4), 0.3333);
        assert_eq!(round_dp(11.0231, 2), 11.02);
    }
}
