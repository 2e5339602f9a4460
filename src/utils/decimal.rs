//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;

/// Truncate a value to a number of decimal places, dropping trailing zeros.
///
/// Truncation, not banker's rounding: the exchange rejects orders with excess
/// precision, and rounding up a quantity could exceed available margin.
pub fn trunc_to_dp(value: Decimal, decimals: u32) -> Decimal {
    value.trunc_with_scale(decimals).normalize()
}

/// Smallest representable step at the given precision (e.g. 0.001 for 3 dp).
pub fn quantum(decimals: u32) -> Decimal {
    Decimal::new(1, decimals)
}

/// Safe division that returns zero if the divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trunc_drops_excess_digits() {
        assert_eq!(trunc_to_dp(dec!(0.123456), 3), dec!(0.123));
        assert_eq!(trunc_to_dp(dec!(50123.456), 2), dec!(50123.45));
        // Truncation, never rounding up
        assert_eq!(trunc_to_dp(dec!(0.9999), 3), dec!(0.999));
    }

    #[test]
    fn test_trunc_drops_trailing_zeros() {
        assert_eq!(trunc_to_dp(dec!(0.100), 3).to_string(), "0.1");
        assert_eq!(trunc_to_dp(dec!(42.000), 2).to_string(), "42");
    }

    #[test]
    fn test_trunc_noop_below_precision() {
        assert_eq!(trunc_to_dp(dec!(0.01), 3), dec!(0.01));
    }

    #[test]
    fn test_quantum() {
        assert_eq!(quantum(3), dec!(0.001));
        assert_eq!(quantum(0), dec!(1));
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
    }
}
