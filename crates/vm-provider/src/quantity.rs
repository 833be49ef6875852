//! Kubernetes resource quantities.
//!
//! Quantities are held as exact rationals so conversions round exactly like
//! the API server does: a quantity's integer value is its ceiling.

use crate::error::ProviderError;
use std::str::FromStr;

const BYTES_PER_MB: i128 = 1024 * 1024;
const HZ_PER_MHZ: i128 = 1000 * 1000;

/// A parsed quantity such as `2Gi`, `500m` or `1.5e9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity {
    numerator: i128,
    denominator: i128,
}

impl Quantity {
    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }

    /// Integer value, rounded up.
    pub fn value(&self) -> i128 {
        ceil_div(self.numerator, self.denominator)
    }
}

fn ceil_div(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator.div_euclid(denominator);
    if numerator.rem_euclid(denominator) == 0 {
        quotient
    } else {
        quotient + 1
    }
}

fn invalid(value: &str, reason: &str) -> ProviderError {
    ProviderError::InvalidQuantity {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Multiplier of a suffix as `(numerator, denominator)`.
fn suffix_multiplier(suffix: &str) -> Option<(i128, i128)> {
    let binary = |power: u32| Some((1024_i128.pow(power), 1));
    let decimal = |exponent: i32| Some(decimal_multiplier(exponent));
    match suffix {
        "Ki" => binary(1),
        "Mi" => binary(2),
        "Gi" => binary(3),
        "Ti" => binary(4),
        "Pi" => binary(5),
        "Ei" => binary(6),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "" => decimal(0),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        _ => None,
    }
}

impl FromStr for Quantity {
    type Err = ProviderError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();
        if s.is_empty() {
            return Err(invalid(input, "empty quantity"));
        }

        let (negative, rest) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_len);
        if number.is_empty() || number == "." || number.matches('.').count() > 1 {
            return Err(invalid(input, "missing numeric part"));
        }

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.len() + fraction.len() > 30 {
            return Err(invalid(input, "too many digits"));
        }
        let digits = format!("{}{}", whole, fraction);
        let mut numerator: i128 = digits.parse().map_err(|_parse| invalid(input, "malformed number"))?;
        let mut denominator: i128 = 10_i128.pow(u32::try_from(fraction.len()).unwrap_or(0));

        // "1e3" is an exponent, "1E" is the exa suffix
        let exponent = suffix
            .strip_prefix(['e', 'E'])
            .filter(|e| !e.is_empty())
            .and_then(|e| e.parse::<i32>().ok());
        let (mult_num, mult_den) = match exponent {
            Some(exp) if exp.unsigned_abs() <= 18 => decimal_multiplier(exp),
            Some(_) => return Err(invalid(input, "exponent out of range")),
            None => suffix_multiplier(suffix).ok_or_else(|| invalid(input, "unknown suffix"))?,
        };

        numerator = numerator
            .checked_mul(mult_num)
            .ok_or_else(|| invalid(input, "value out of range"))?;
        denominator = denominator
            .checked_mul(mult_den)
            .ok_or_else(|| invalid(input, "value out of range"))?;
        if negative {
            numerator = -numerator;
        }

        Ok(Self {
            numerator,
            denominator,
        })
    }
}

fn decimal_multiplier(exponent: i32) -> (i128, i128) {
    if exponent >= 0 {
        (10_i128.pow(exponent.unsigned_abs()), 1)
    } else {
        (1, 10_i128.pow(exponent.unsigned_abs()))
    }
}

/// Parse a quantity string.
pub fn parse_quantity(value: &str) -> Result<Quantity, ProviderError> {
    value.parse()
}

/// Parse an optional quantity; an empty string means unset.
pub fn parse_optional_quantity(value: &str) -> Result<Option<Quantity>, ProviderError> {
    if value.trim().is_empty() {
        Ok(None)
    } else {
        parse_quantity(value).map(Some)
    }
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// Memory quantity in MB: ceil(bytes / 2^20).
pub fn memory_quantity_to_mb(quantity: &Quantity) -> i64 {
    saturate(ceil_div(quantity.value(), BYTES_PER_MB))
}

/// CPU quantity in MHz: ceil(Hz / 10^6).
pub fn cpu_quantity_to_mhz(quantity: &Quantity) -> i64 {
    saturate(ceil_div(quantity.value(), HZ_PER_MHZ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        parse_quantity(s).unwrap()
    }

    #[test]
    fn memory_rounds_up_to_whole_megabytes() {
        assert_eq!(memory_quantity_to_mb(&q("1500000000")), 1431);
        assert_eq!(memory_quantity_to_mb(&q("2Gi")), 2048);
        assert_eq!(memory_quantity_to_mb(&q("1Mi")), 1);
        assert_eq!(memory_quantity_to_mb(&q("1")), 1);
        assert_eq!(memory_quantity_to_mb(&q("0")), 0);
    }

    #[test]
    fn cpu_rounds_up_to_whole_megahertz() {
        assert_eq!(cpu_quantity_to_mhz(&q("2000M")), 2000);
        assert_eq!(cpu_quantity_to_mhz(&q("1.5G")), 1500);
        assert_eq!(cpu_quantity_to_mhz(&q("1000001")), 2);
        assert_eq!(cpu_quantity_to_mhz(&q("1500m")), 1);
    }

    #[test]
    fn value_is_ceiling() {
        assert_eq!(q("500m").value(), 1);
        assert_eq!(q("1.5").value(), 2);
        assert_eq!(q("1e3").value(), 1000);
        assert_eq!(q("1E").value(), 1_000_000_000_000_000_000);
        assert_eq!(q("-1.5").value(), -1);
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "Gi", "1.2.3", "12Qi", "--1", "1e"] {
            assert!(matches!(parse_quantity(bad), Err(ProviderError::InvalidQuantity { .. })), "{bad}");
        }
    }

    #[test]
    fn empty_optional_is_unset() {
        assert_eq!(parse_optional_quantity("").unwrap(), None);
        assert!(parse_optional_quantity("1Gi").unwrap().is_some());
    }
}
