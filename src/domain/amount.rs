//! Conversion between decimal major units and integer minor units.
//!
//! Money is never represented as a float. Deposits arrive as decimals; gateways that
//! bill in the smallest currency unit receive an `i64` computed here.

use bigdecimal::{BigDecimal, ToPrimitive};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount {amount} has more precision than {currency} allows")]
    TooPrecise { amount: String, currency: String },
    #[error("amount {0} is out of range")]
    OutOfRange(String),
}

const ZERO_DECIMAL: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];
const THREE_DECIMAL: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

/// Number of decimal places in one major unit of `currency`.
pub fn minor_unit_exponent(currency: &str) -> i64 {
    let code = currency.to_ascii_uppercase();
    if ZERO_DECIMAL.contains(&code.as_str()) {
        0
    } else if THREE_DECIMAL.contains(&code.as_str()) {
        3
    } else {
        2
    }
}

/// `12.34 USD` -> `1234`. Fails instead of rounding when the amount has sub-minor precision.
pub fn to_minor_units(amount: &BigDecimal, currency: &str) -> Result<i64, AmountError> {
    let exponent = minor_unit_exponent(currency);
    let truncated = amount.with_scale(exponent);
    if &truncated != amount {
        return Err(AmountError::TooPrecise {
            amount: amount.to_string(),
            currency: currency.to_string(),
        });
    }
    let (digits, _) = truncated.as_bigint_and_exponent();
    digits
        .to_i64()
        .ok_or_else(|| AmountError::OutOfRange(amount.to_string()))
}

/// `1234 USD` -> `12.34`.
pub fn from_minor_units(minor: i64, currency: &str) -> BigDecimal {
    BigDecimal::new(minor.into(), minor_unit_exponent(currency))
}

/// Decimal string in major units with the currency's fixed number of places.
pub fn format_major(amount: &BigDecimal, currency: &str) -> String {
    amount.with_scale(minor_unit_exponent(currency)).to_string()
}
