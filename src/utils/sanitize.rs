use serde_json::Value;

/// Masks sensitive fields in JSON payloads before they are logged or stored.
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_card_field(key) {
                    Value::String(FULL_MASK.to_string())
                } else if is_sensitive_field(key) {
                    mask_value(val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

pub const FULL_MASK: &str = "****";

/// Card data is replaced outright; no digits survive.
pub fn is_card_field(key: &str) -> bool {
    matches!(
        normalize(key).as_str(),
        "cardnumber"
            | "creditcardnumber"
            | "number"
            | "cvv"
            | "cvc"
            | "cardcode"
            | "expirationdate"
            | "expiry"
            | "expmonth"
            | "expyear"
    )
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        normalize(key).as_str(),
        "password"
            | "secret"
            | "token"
            | "apikey"
            | "authorization"
            | "transactionkey"
            | "paymentmethod"
            | "destination"
    )
}

fn normalize(key: &str) -> String {
    key.chars()
        .filter(|ch| *ch != '_' && *ch != '-')
        .collect::<String>()
        .to_lowercase()
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > 8 => {
            let chars: Vec<char> = s.chars().collect();
            let visible: String = chars[..4].iter().collect();
            let end: String = chars[chars.len() - 4..].iter().collect();
            Value::String(format!("{}{}{}", visible, FULL_MASK, end))
        }
        _ => Value::String(FULL_MASK.to_string()),
    }
}
