//! Phone number canonicalization.
//!
//! Every phone the relay compares (webhook payloads, dialer log lookups, CRM
//! contact search) goes through [`normalize`] so they share one digit key.

use serde_json::Value;

/// Strip everything but digits and drop a leading US country code.
///
/// `"1-(415) 555-0100"`, `"4155550100"` and `"14155550100"` all become
/// `"4155550100"`. Malformed input degrades to a partial or empty key.
pub fn normalize(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}

/// Normalize a JSON field that may carry the phone as a string or a number.
pub fn normalize_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => normalize(s),
        Some(Value::Number(n)) => normalize(&n.to_string()),
        _ => String::new(),
    }
}

/// E.164 form of a normalized key; 10-digit keys are assumed US.
pub fn to_e164(digits: &str) -> Option<String> {
    match digits.len() {
        0 => None,
        10 => Some(format!("+1{}", digits)),
        _ => Some(format!("+{}", digits)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_us_variants() {
        assert_eq!(normalize("1-(415) 555-0100"), "4155550100");
        assert_eq!(normalize("4155550100"), "4155550100");
        assert_eq!(normalize("14155550100"), "4155550100");
        assert_eq!(normalize("+1 415.555.0100"), "4155550100");
    }

    #[test]
    fn test_normalize_empty_and_garbage() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("n/a"), "");
        assert_eq!(normalize("ext 12"), "12");
    }

    #[test]
    fn test_only_eleven_digit_keys_lose_leading_one() {
        assert_eq!(normalize("24155550100"), "24155550100");
        assert_eq!(normalize("114155550100"), "114155550100");
    }

    #[test]
    fn test_normalize_value() {
        assert_eq!(normalize_value(Some(&json!(14155550100u64))), "4155550100");
        assert_eq!(normalize_value(Some(&json!("(415) 555-0100"))), "4155550100");
        assert_eq!(normalize_value(Some(&json!(null))), "");
        assert_eq!(normalize_value(None), "");
    }

    #[test]
    fn test_to_e164() {
        assert_eq!(to_e164("4155550100").as_deref(), Some("+14155550100"));
        assert_eq!(to_e164("442071234567").as_deref(), Some("+442071234567"));
        assert_eq!(to_e164(""), None);
    }
}
