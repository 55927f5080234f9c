//! Price decoding: digit code → base price → marked-up price.
//!
//! The mapping stage yields a string of digits whose last two digits are the
//! cents. Decoding is positional rather than arithmetic so that one- and
//! two-digit codes come out as sub-dollar amounts (`"5"` → 0.05,
//! `"42"` → 0.42) without any special casing in the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed multiplicative markup applied to every decoded price (10 %).
pub const MARKUP: f64 = 1.10;

/// A non-empty string made only of ASCII decimal digits.
///
/// This is the contract between the mapping service and [`decode_price`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DecodedCode(String);

impl DecodedCode {
    /// Validate `raw` as a digit-only code. Returns `None` for an empty
    /// string or any non-digit character (including whitespace).
    pub fn parse(raw: &str) -> Option<Self> {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render the code as a decimal string with two digits after the point.
    pub fn to_decimal_string(&self) -> String {
        let code = self.0.as_str();
        match code.len() {
            1 => format!("0.0{code}"),
            2 => format!("0.{code}"),
            n => format!("{}.{}", &code[..n - 2], &code[n - 2..]),
        }
    }
}

impl fmt::Display for DecodedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DecodedCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("not a digit-only code: {value:?}"))
    }
}

impl From<DecodedCode> for String {
    fn from(code: DecodedCode) -> Self {
        code.0
    }
}

/// Base price and marked-up price for one code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceResult {
    pub original_price: f64,
    pub final_price: f64,
}

/// Decode a digit code into a price.
///
/// Returns `None` when `code` is empty, contains anything but digits, or the
/// constructed decimal fails to parse. The final price is
/// `original * MARKUP` with no rounding; round only when displaying.
///
/// ```
/// use charleston_decoder::price::decode_price;
///
/// let p = decode_price("1299").unwrap();
/// assert_eq!(p.original_price, 12.99);
/// assert!(decode_price("12a").is_none());
/// ```
pub fn decode_price(code: &str) -> Option<PriceResult> {
    let code = DecodedCode::parse(code)?;
    price_for(&code)
}

/// [`decode_price`] for an already validated code.
pub fn price_for(code: &DecodedCode) -> Option<PriceResult> {
    let original_price: f64 = code.to_decimal_string().parse().ok()?;
    if !original_price.is_finite() {
        return None;
    }
    Some(PriceResult {
        original_price,
        final_price: original_price * MARKUP,
    })
}

/// Two-decimal display form, e.g. `14.289` → `"14.29"`.
pub fn display_price(value: f64) -> String {
    format!("{value:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn single_digit_gets_two_leading_zeros() {
        assert_eq!(decode_price("5").unwrap().original_price, 0.05);
    }

    #[test]
    fn two_digits_are_cents() {
        assert_eq!(decode_price("42").unwrap().original_price, 0.42);
        assert_eq!(decode_price("00").unwrap().original_price, 0.0);
    }

    #[test]
    fn three_digits_split_before_last_two() {
        assert_eq!(decode_price("100").unwrap().original_price, 1.00);
        assert_eq!(decode_price("599").unwrap().original_price, 5.99);
    }

    #[test]
    fn four_digits() {
        assert_eq!(decode_price("1299").unwrap().original_price, 12.99);
    }

    #[test]
    fn long_code_keeps_all_leading_digits() {
        let p = decode_price("123456789").unwrap();
        assert!(close(p.original_price, 1_234_567.89));
        let p = decode_price("000150").unwrap();
        assert!(close(p.original_price, 1.50));
    }

    #[test]
    fn short_codes_are_always_below_one_dollar() {
        for code in ["0", "1", "9", "10", "55", "99"] {
            let p = decode_price(code).unwrap();
            assert!(p.original_price < 1.0, "{code} → {}", p.original_price);
        }
    }

    #[test]
    fn rejects_empty_and_non_digit_codes() {
        assert!(decode_price("").is_none());
        assert!(decode_price("12a").is_none());
        assert!(decode_price(" 12").is_none());
        assert!(decode_price("1.5").is_none());
        assert!(decode_price("-12").is_none());
        assert!(decode_price("١٢").is_none(), "non-ASCII digits are rejected");
    }

    #[test]
    fn markup_is_ten_percent() {
        for code in ["5", "42", "100", "1299", "987654"] {
            let p = decode_price(code).unwrap();
            assert!(close(p.final_price, p.original_price * 1.10));
        }
        let p = decode_price("1299").unwrap();
        assert!(close(p.final_price, 14.289));
    }

    #[test]
    fn decimal_string_has_two_fraction_digits() {
        let code = DecodedCode::parse("7").unwrap();
        assert_eq!(code.to_decimal_string(), "0.07");
        let code = DecodedCode::parse("31415").unwrap();
        assert_eq!(code.to_decimal_string(), "314.15");
    }

    #[test]
    fn display_rounds_without_touching_value() {
        let p = decode_price("1299").unwrap();
        assert_eq!(display_price(p.final_price), "14.29");
        assert!(close(p.final_price, 14.289));
    }

    #[test]
    fn decoded_code_serde_validates() {
        let ok: DecodedCode = serde_json::from_str("\"1299\"").unwrap();
        assert_eq!(ok.as_str(), "1299");
        assert!(serde_json::from_str::<DecodedCode>("\"12a\"").is_err());
    }
}
