use bigdecimal::BigDecimal;
use std::fmt;

use crate::domain::to_minor_units;

pub const TRANSACTION_ID_MAX_LEN: usize = 255;
pub const USER_ID_MAX_LEN: usize = 255;
pub const TOKEN_MAX_LEN: usize = 255;
pub const CARD_NUMBER_MIN_LEN: usize = 12;
pub const CARD_NUMBER_MAX_LEN: usize = 19;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// Trims and returns the identifier. Inner whitespace or control characters are rejected,
/// never stripped, so the stored value is exactly what the caller sent.
pub fn validate_identifier(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<String, ValidationError> {
    let value = value.trim();
    validate_required(field, value)?;
    validate_max_len(field, value, max_len)?;

    if value.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(ValidationError::new(
            field,
            "must not contain whitespace or control characters",
        ));
    }

    Ok(value.to_string())
}

/// Returns the upper-cased ISO 4217 code.
pub fn validate_currency(currency: &str) -> Result<String, ValidationError> {
    let currency = currency.trim();
    validate_required("currency", currency)?;

    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ValidationError::new(
            "currency",
            "must be a 3-letter ISO 4217 code",
        ));
    }

    Ok(currency.to_ascii_uppercase())
}

/// Whole-unit digits the `NUMERIC(20, 8)` amount column can hold.
pub const AMOUNT_MAX_INTEGER_DIGITS: usize = 12;

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    let limit = BigDecimal::from(10_i64.pow(AMOUNT_MAX_INTEGER_DIGITS as u32));
    if amount >= &limit {
        return Err(ValidationError::new(
            "amount",
            format!("must have at most {} whole digits", AMOUNT_MAX_INTEGER_DIGITS),
        ));
    }

    Ok(())
}

/// Rejects amounts finer than the currency's minor unit instead of rounding them.
pub fn validate_amount_precision(amount: &BigDecimal, currency: &str) -> ValidationResult {
    to_minor_units(amount, currency)
        .map(|_| ())
        .map_err(|e| ValidationError::new("amount", e.to_string()))
}

pub fn validate_positive_minor_amount(amount: i64) -> ValidationResult {
    if amount <= 0 {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_card_number(number: &str) -> ValidationResult {
    let digits: String = number.chars().filter(|ch| !ch.is_whitespace()).collect();
    validate_required("creditCardNumber", &digits)?;

    if !digits.chars().all(|ch| ch.is_ascii_digit())
        || digits.len() < CARD_NUMBER_MIN_LEN
        || digits.len() > CARD_NUMBER_MAX_LEN
    {
        return Err(ValidationError::new(
            "creditCardNumber",
            format!(
                "must be {}-{} digits",
                CARD_NUMBER_MIN_LEN, CARD_NUMBER_MAX_LEN
            ),
        ));
    }

    Ok(())
}

/// Accepts `YYYY-MM` and `MMYY`, the two forms the card gateway takes.
pub fn validate_expiration_date(value: &str) -> ValidationResult {
    let value = value.trim();
    validate_required("expirationDate", value)?;

    let invalid = || {
        ValidationError::new("expirationDate", "must be formatted as YYYY-MM or MMYY")
    };
    if !value.is_ascii() {
        return Err(invalid());
    }

    let (month, shape_ok) = match value.len() {
        7 => (
            &value[5..7],
            value.as_bytes()[4] == b'-' && value[..4].chars().all(|ch| ch.is_ascii_digit()),
        ),
        4 => (&value[..2], value[2..].chars().all(|ch| ch.is_ascii_digit())),
        _ => ("", false),
    };

    let month_ok = month
        .parse::<u8>()
        .map(|m| (1..=12).contains(&m))
        .unwrap_or(false);

    if !shape_ok || !month_ok {
        return Err(invalid());
    }

    Ok(())
}

pub fn validate_cvv(cvv: &str) -> ValidationResult {
    let cvv = cvv.trim();
    validate_required("cvv", cvv)?;

    if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ValidationError::new("cvv", "must be 3 or 4 digits"));
    }

    Ok(())
}
