/// Money helpers. Every amount is a `BigDecimal` in the platform's base currency;
/// computed fees are rounded half-up to the minor unit and net amounts are taken by
/// subtraction, so `net + fee == amount` holds exactly.
use bigdecimal::{BigDecimal, RoundingMode};

pub const MINOR_UNIT_SCALE: i64 = 2;
/// Fee rates are stored as NUMERIC(5,4).
pub const RATE_SCALE: i64 = 4;

pub fn round_minor(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(MINOR_UNIT_SCALE, RoundingMode::HalfUp)
}

/// True when `value` has no significant digits beyond `scale` decimal places.
pub fn fits_scale(value: &BigDecimal, scale: i64) -> bool {
    value.with_scale_round(scale, RoundingMode::Down) == *value
}

pub fn is_minor_unit(amount: &BigDecimal) -> bool {
    fits_scale(amount, MINOR_UNIT_SCALE)
}

/// Splits `amount` into `(fee, net)` for a fee `rate` expressed as a fraction.
pub fn split_fee(amount: &BigDecimal, rate: &BigDecimal) -> (BigDecimal, BigDecimal) {
    let fee = round_minor(&(amount * rate));
    let net = amount - &fee;
    (fee, net)
}

/// Keeps the last four characters visible, e.g. `****************1234`.
pub fn mask_account(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

pub fn last_four(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let start = chars.len().saturating_sub(4);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    #[test]
    fn test_split_fee_twenty_percent() {
        let (fee, net) = split_fee(&dec("100000"), &dec("0.20"));
        assert_eq!(fee, dec("20000"));
        assert_eq!(net, dec("80000"));
    }

    #[test]
    fn test_split_fee_has_no_rounding_loss() {
        for raw in ["100.01", "333.33", "999.99", "12345.67", "150000"] {
            let amount = dec(raw);
            let (fee, net) = split_fee(&amount, &dec("0.07"));
            assert_eq!(&fee + &net, amount, "fee split drifted for {}", raw);
        }
    }

    #[test]
    fn test_round_minor_half_up() {
        assert_eq!(round_minor(&dec("10.005")), dec("10.01"));
        assert_eq!(round_minor(&dec("10.004")), dec("10.00"));
    }

    #[test]
    fn test_minor_unit_precision() {
        assert!(is_minor_unit(&dec("150")));
        assert!(is_minor_unit(&dec("150.50")));
        assert!(is_minor_unit(&dec("150.0100")));
        assert!(!is_minor_unit(&dec("150.005")));
        assert!(!is_minor_unit(&dec("-0.001")));
    }

    #[test]
    fn test_rate_scale() {
        assert!(fits_scale(&dec("0.1234"), RATE_SCALE));
        assert!(fits_scale(&dec("0.1"), RATE_SCALE));
        assert!(!fits_scale(&dec("0.123456"), RATE_SCALE));
    }

    #[test]
    fn test_mask_account() {
        assert_eq!(mask_account("0720123456789012345678"), "******************5678");
        assert_eq!(mask_account("1234"), "****");
        assert_eq!(mask_account(""), "");
    }

    #[test]
    fn test_last_four() {
        assert_eq!(last_four("4509953566233704"), "3704");
        assert_eq!(last_four("12"), "12");
    }
}
