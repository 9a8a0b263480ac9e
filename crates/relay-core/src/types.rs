//! ============================================================================
//! Core Types for the Relay Pipeline
//! ============================================================================
//! Canonical inbound event, dialer log entries, classified outcomes and the
//! result reported back to the webhook caller.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Which decode path produced a [`CanonicalEvent`] (diagnostic only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputShape {
    /// Plain JSON object
    #[default]
    Object,
    /// JSON array, first element used
    Array,
    /// `params` field holding an array, first element used
    ParamsArray,
    /// `params` field holding an object
    ParamsObject,
    /// `params` field holding a URL-encoded query string
    ParamsQuery,
}

/// Normalized view of one inbound dialer webhook.
///
/// Built once per request by [`crate::payload::normalize`] and never mutated.
/// Missing fields are `None` / zero and mean "no signal".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Digits only, US country code stripped
    pub phone_digits: String,
    pub phone_e164: Option<String>,
    /// Raw dialer call type (e.g. "INBOUND", "OUTBOUND", "MANUAL")
    pub call_type: Option<String>,
    pub disposition: Option<String>,
    pub disposition_name: Option<String>,
    pub disposition_id: Option<String>,
    pub call_id: Option<String>,
    pub lead_id: Option<String>,
    pub created_at: Option<String>,
    pub duration_seconds: u64,
    pub notes: Option<String>,
    pub recording_url: Option<String>,
    pub term_reason: Option<String>,
    pub call_result: Option<String>,
    pub agent_name: Option<String>,
    pub input_shape: InputShape,
}

impl CanonicalEvent {
    pub fn has_phone(&self) -> bool {
        !self.phone_digits.is_empty()
    }

    /// Disposition text if any non-blank disposition field was sent
    pub fn disposition_text(&self) -> Option<&str> {
        [self.disposition.as_deref(), self.disposition_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

/// One row of the dialer's call log (read-only, per request)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialerLogEntry {
    pub id: String,
    pub call_type: Option<String>,
    pub agent_comment: Option<String>,
    pub status_name: Option<String>,
    pub term_reason: Option<String>,
    pub call_length_seconds: u64,
    pub call_date: Option<String>,
    pub recording_url: Option<String>,
}

/// Log entry found by the correlator, tagged with the attempt (1-based) it
/// was found on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelatedLog {
    pub entry: DialerLogEntry,
    pub attempt: u32,
}

/// CRM call disposition codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispositionCode {
    NoAnswer,
    Connected,
    LeftMessage,
    Busy,
}

impl DispositionCode {
    /// Numeric code the CRM expects in `call_disposition`
    pub fn code(self) -> u8 {
        match self {
            DispositionCode::NoAnswer => 1,
            DispositionCode::Connected => 2,
            DispositionCode::LeftMessage => 3,
            DispositionCode::Busy => 6,
        }
    }
}

/// Where the classified outcome came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    /// No dialer signal at all, fallback label
    Default,
    /// Derived from dialer talk time or status text
    Convoso,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub disposition_code: DispositionCode,
    pub result_label: String,
    pub source: OutcomeSource,
}

impl Outcome {
    pub fn new(
        disposition_code: DispositionCode,
        result_label: &str,
        source: OutcomeSource,
    ) -> Self {
        Self {
            disposition_code,
            result_label: result_label.to_string(),
            source,
        }
    }
}

/// Call direction as the CRM understands it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
    Indeterminate,
}

impl Direction {
    /// CRM `call_type` label, `None` when a call record cannot be written
    pub fn crm_label(self) -> Option<&'static str> {
        match self {
            Direction::Incoming => Some("Incoming"),
            Direction::Outgoing => Some("Outgoing"),
            Direction::Indeterminate => None,
        }
    }
}

/// Why an event was acknowledged without a CRM call record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    BlankDisposition,
    NoContact,
    DuplicateDisposition,
    /// No call direction; a contact note was written instead
    MissingDirection,
}

/// Result reported back to the webhook caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForwardOutcome {
    Forwarded {
        contact_id: String,
        crm_id: Option<String>,
        outcome: Outcome,
        direction: Direction,
        enrichment_attempt: Option<u32>,
    },
    Skipped {
        reason: SkipReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        contact_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        note_id: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl ForwardOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        ForwardOutcome::Skipped {
            reason,
            contact_id: None,
            note_id: None,
        }
    }

    /// Call record skipped for lack of direction, note written in its place
    pub fn direction_missing(contact_id: String, note_id: Option<String>) -> Self {
        ForwardOutcome::Skipped {
            reason: SkipReason::MissingDirection,
            contact_id: Some(contact_id),
            note_id,
        }
    }

    pub fn is_forwarded(&self) -> bool {
        matches!(self, ForwardOutcome::Forwarded { .. })
    }
}
