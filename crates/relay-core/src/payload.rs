//! ============================================================================
//! Payload Normalizer - Inbound webhook shapes → CanonicalEvent
//! ============================================================================
//! The dialer posts the same event in several wire shapes:
//! - a plain JSON object
//! - a JSON array (first element is the event)
//! - an object whose `params` is an array or an object
//! - an object whose `params` is a URL-encoded query string
//!
//! All shape sniffing lives in [`InboundShape::sniff`]; field extraction then
//! walks an ordered alias list per logical field. Nothing here fails: missing
//! or unrecognized fields simply yield `None` / zero.
//! ============================================================================

use serde_json::{Map, Value};
use tracing::debug;

use crate::phone;
use crate::types::{CanonicalEvent, InputShape};

const PHONE_ALIASES: &[&str] = &["phone_number", "phone", "primary_phone", "phoneNumber"];
const CALL_TYPE_ALIASES: &[&str] = &["call_type", "callType", "direction"];
const DISPOSITION_ALIASES: &[&str] = &["disposition", "status", "call_status"];
const DISPOSITION_NAME_ALIASES: &[&str] = &["disposition_name", "status_name", "statusName"];
const DISPOSITION_ID_ALIASES: &[&str] = &["disposition_id", "status_id", "dispositionId"];
const CALL_ID_ALIASES: &[&str] = &["call_id", "callId", "call_log_id", "uniqueid"];
const LEAD_ID_ALIASES: &[&str] = &["lead_id", "leadId"];
const CREATED_AT_ALIASES: &[&str] = &["created_at", "createdAt", "call_date", "timestamp", "date"];
const DURATION_ALIASES: &[&str] = &[
    "duration",
    "call_length",
    "talk_time",
    "length_in_sec",
    "call_duration",
];
const NOTES_ALIASES: &[&str] = &["notes", "agent_comment", "comments", "comment"];
const RECORDING_ALIASES: &[&str] = &[
    "recording_url",
    "recordingUrl",
    "recording",
    "recording_link",
];
const TERM_REASON_ALIASES: &[&str] = &["term_reason", "termReason"];
const CALL_RESULT_ALIASES: &[&str] = &["call_result", "callResult", "result"];
const AGENT_ALIASES: &[&str] = &["agent_name", "user", "agent", "user_full_name"];

/// Tagged decode of the inbound body: which shape it arrived in, carrying the
/// record that holds the event fields.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundShape {
    Object(Value),
    Array(Value),
    ParamsArray(Value),
    ParamsObject(Value),
    ParamsQuery(Value),
}

impl InboundShape {
    /// Pick the event record out of a request body.
    ///
    /// Order: string `params` → top-level array → array `params` → object
    /// `params` → the body itself.
    pub fn sniff(body: &Value) -> Self {
        match body.get("params") {
            Some(Value::String(query)) => InboundShape::ParamsQuery(query_to_object(query)),
            _ if body.is_array() => InboundShape::Array(first_element(body)),
            Some(params @ Value::Array(_)) => InboundShape::ParamsArray(first_element(params)),
            Some(params @ Value::Object(_)) => InboundShape::ParamsObject(params.clone()),
            _ => InboundShape::Object(body.clone()),
        }
    }

    pub fn input_shape(&self) -> InputShape {
        match self {
            InboundShape::Object(_) => InputShape::Object,
            InboundShape::Array(_) => InputShape::Array,
            InboundShape::ParamsArray(_) => InputShape::ParamsArray,
            InboundShape::ParamsObject(_) => InputShape::ParamsObject,
            InboundShape::ParamsQuery(_) => InputShape::ParamsQuery,
        }
    }

    pub fn record(&self) -> &Value {
        match self {
            InboundShape::Object(v)
            | InboundShape::Array(v)
            | InboundShape::ParamsArray(v)
            | InboundShape::ParamsObject(v)
            | InboundShape::ParamsQuery(v) => v,
        }
    }
}

/// Decode a raw request body into JSON.
///
/// JSON first, then `application/x-www-form-urlencoded`; anything else
/// becomes an empty object.
pub fn decode_body(body: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        return value;
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.contains('=') {
        return query_to_object(text);
    }

    if !text.is_empty() {
        debug!("Unrecognized webhook body ({} bytes), treating as empty", body.len());
    }
    Value::Object(Map::new())
}

/// Normalize any supported body shape into a [`CanonicalEvent`].
pub fn normalize(body: &Value) -> CanonicalEvent {
    let shape = InboundShape::sniff(body);
    let fields = Fields::new(shape.record());

    let phone_digits = phone::normalize_value(fields.lookup(PHONE_ALIASES));
    let event = CanonicalEvent {
        phone_e164: phone::to_e164(&phone_digits),
        phone_digits,
        call_type: fields.text(CALL_TYPE_ALIASES),
        disposition: fields.text(DISPOSITION_ALIASES),
        disposition_name: fields.text(DISPOSITION_NAME_ALIASES),
        disposition_id: fields.text(DISPOSITION_ID_ALIASES),
        call_id: fields.text(CALL_ID_ALIASES),
        lead_id: fields.text(LEAD_ID_ALIASES),
        created_at: fields.text(CREATED_AT_ALIASES),
        duration_seconds: fields.lookup(DURATION_ALIASES).map(value_seconds).unwrap_or(0),
        notes: fields.text(NOTES_ALIASES),
        recording_url: fields.text(RECORDING_ALIASES),
        term_reason: fields.text(TERM_REASON_ALIASES),
        call_result: fields.text(CALL_RESULT_ALIASES),
        agent_name: fields.text(AGENT_ALIASES),
        input_shape: shape.input_shape(),
    };

    debug!(
        "Normalized {:?} payload: phone={} call_id={:?} lead_id={:?}",
        event.input_shape, event.phone_digits, event.call_id, event.lead_id
    );
    event
}

/// Alias-aware view over the chosen event record
struct Fields<'a> {
    record: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    fn new(record: &'a Value) -> Self {
        Self {
            record: record.as_object(),
        }
    }

    /// First alias with a usable value; exact key match beats a
    /// case-insensitive one.
    fn lookup(&self, aliases: &[&str]) -> Option<&'a Value> {
        let record = self.record?;

        let exact = aliases
            .iter()
            .filter_map(|alias| record.get(*alias))
            .find(|value| is_present(value));
        if exact.is_some() {
            return exact;
        }

        aliases.iter().find_map(|alias| {
            record
                .iter()
                .find(|(key, value)| key.eq_ignore_ascii_case(alias) && is_present(value))
                .map(|(_, value)| value)
        })
    }

    fn text(&self, aliases: &[&str]) -> Option<String> {
        self.lookup(aliases).and_then(value_text)
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Text form of a scalar JSON value; blanks and containers yield `None`.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Whole seconds from a number or numeric string; negatives and junk are 0.
pub(crate) fn value_seconds(value: &Value) -> u64 {
    let seconds = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match seconds {
        Some(s) if s.is_finite() && s > 0.0 => s.round() as u64,
        _ => 0,
    }
}

fn first_element(value: &Value) -> Value {
    value
        .as_array()
        .and_then(|items| items.first())
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

fn query_to_object(query: &str) -> Value {
    let query = query.trim().trim_start_matches('?');
    let map: Map<String, Value> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_object() {
        let event = normalize(&json!({
            "phone_number": "1-(415) 555-0100",
            "call_type": "INBOUND",
            "call_id": 998877,
            "duration": "42",
            "agent_comment": "Customer wants a callback"
        }));
        assert_eq!(event.input_shape, InputShape::Object);
        assert_eq!(event.phone_digits, "4155550100");
        assert_eq!(event.phone_e164.as_deref(), Some("+14155550100"));
        assert_eq!(event.call_type.as_deref(), Some("INBOUND"));
        assert_eq!(event.call_id.as_deref(), Some("998877"));
        assert_eq!(event.duration_seconds, 42);
        assert_eq!(event.notes.as_deref(), Some("Customer wants a callback"));
    }

    #[test]
    fn test_array_uses_first_element() {
        let event = normalize(&json!([
            { "phone": "4155550100", "lead_id": "L1" },
            { "phone": "2125550199", "lead_id": "L2" }
        ]));
        assert_eq!(event.input_shape, InputShape::Array);
        assert_eq!(event.phone_digits, "4155550100");
        assert_eq!(event.lead_id.as_deref(), Some("L1"));
    }

    #[test]
    fn test_params_array_and_object() {
        let event = normalize(&json!({ "params": [{ "primary_phone": "14155550100" }] }));
        assert_eq!(event.input_shape, InputShape::ParamsArray);
        assert_eq!(event.phone_digits, "4155550100");

        let event = normalize(&json!({ "params": { "phone_number": 4155550100u64 } }));
        assert_eq!(event.input_shape, InputShape::ParamsObject);
        assert_eq!(event.phone_digits, "4155550100");
    }

    #[test]
    fn test_params_query_string() {
        let event = normalize(&json!({
            "params": "phone_number=%2B1%20415%20555%200100&disposition=Left+VM&call_id=abc"
        }));
        assert_eq!(event.input_shape, InputShape::ParamsQuery);
        assert_eq!(event.phone_digits, "4155550100");
        assert_eq!(event.disposition.as_deref(), Some("Left VM"));
        assert_eq!(event.call_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_alias_order_and_case_variants() {
        let event = normalize(&json!({
            "phone": "2125550199",
            "phone_number": "4155550100",
            "Call_Type": "OUTBOUND",
            "LEAD_ID": "77"
        }));
        assert_eq!(event.phone_digits, "4155550100");
        assert_eq!(event.call_type.as_deref(), Some("OUTBOUND"));
        assert_eq!(event.lead_id.as_deref(), Some("77"));
    }

    #[test]
    fn test_blank_alias_falls_through() {
        let event = normalize(&json!({ "phone_number": "  ", "phone": "4155550100" }));
        assert_eq!(event.phone_digits, "4155550100");
    }

    #[test]
    fn test_missing_fields_never_fail() {
        let event = normalize(&json!({ "unrelated": true }));
        assert_eq!(event.phone_digits, "");
        assert_eq!(event.phone_e164, None);
        assert_eq!(event.duration_seconds, 0);
        assert_eq!(event.call_type, None);

        let event = normalize(&json!(42));
        assert_eq!(event, CanonicalEvent::default());

        let event = normalize(&json!([]));
        assert_eq!(event.input_shape, InputShape::Array);
        assert_eq!(event.phone_digits, "");
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!(value_seconds(&json!(12.6)), 13);
        assert_eq!(value_seconds(&json!("-5")), 0);
        assert_eq!(value_seconds(&json!("abc")), 0);
        assert_eq!(value_seconds(&json!(null)), 0);
    }

    #[test]
    fn test_decode_body_json_and_form() {
        let value = decode_body(br#"{"phone":"4155550100"}"#);
        assert_eq!(value["phone"], "4155550100");

        let value = decode_body(b"phone_number=4155550100&call_type=INBOUND");
        assert_eq!(value["phone_number"], "4155550100");
        assert_eq!(value["call_type"], "INBOUND");

        let value = decode_body(b"");
        assert_eq!(value, json!({}));
    }
}
