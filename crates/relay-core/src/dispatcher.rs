//! ============================================================================
//! Forwarding Dispatcher - Webhook Event → CRM Call Log
//! ============================================================================
//! Two entry points, one per webhook kind:
//! - call completed: normalize → enrich from dialer log → classify → write
//! - disposition changed: normalize → dedup gate → classify → write
//!
//! A write resolves the CRM contact by phone and creates a call record. When
//! no direction can be derived the CRM refuses a call record, so a contact
//! note with the same content is written instead and the event is reported
//! as skipped (`missing_direction`) with the note id.
//!
//! Only a missing phone on a call-completed event is returned as an error;
//! every other failure becomes `ForwardOutcome::Failed`.
//! ============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::auth::TokenManager;
use crate::classifier::{self, Signals};
use crate::client::{CallRecord, ConvosoLogClient, CrmClient, NoteRecord};
use crate::config::RelayConfig;
use crate::correlator::CallLogCorrelator;
use crate::dedup::{dedup_key, DispositionGate};
use crate::error::{RelayError, Result};
use crate::payload;
use crate::types::{
    CanonicalEvent, CorrelatedLog, Direction, ForwardOutcome, Outcome, SkipReason,
};

/// Notes used when neither the dialer log nor the webhook carries a comment
pub const FALLBACK_NOTE: &str = "Call logged automatically from the dialer.";

/// Prefix of notes written because the call direction was unknown
pub const DIRECTION_MISSING_MARKER: &str = "[direction-missing]";

const NOTE_TITLE: &str = "Dialer call";

/// Everything needed to write one CRM record, minus the contact
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardPlan {
    pub created_at: String,
    pub direction: Direction,
    pub outcome: Outcome,
    pub notes: String,
    pub duration: String,
    pub recording_url: Option<String>,
    pub external_call_id: Option<String>,
    pub enrichment_attempt: Option<u32>,
}

impl ForwardPlan {
    fn call_record(&self, contact_id: &str, call_type: &str) -> CallRecord {
        CallRecord {
            contact_id: contact_id.to_string(),
            created_at: self.created_at.clone(),
            call_type: call_type.to_string(),
            call_disposition: self.outcome.disposition_code.code(),
            call_result: self.outcome.result_label.clone(),
            notes: self.notes.clone(),
            duration: self.duration.clone(),
            recording_url: self.recording_url.clone(),
            external_call_id: self.external_call_id.clone(),
        }
    }

    fn note_record(&self, contact_id: &str) -> NoteRecord {
        let mut content = format!(
            "{} Call direction unavailable from webhook and dialer log.\n{}\n\
             Result: {} | Duration: {} | Time: {}",
            DIRECTION_MISSING_MARKER,
            self.notes,
            self.outcome.result_label,
            self.duration,
            self.created_at
        );
        if let Some(url) = &self.recording_url {
            content.push_str(&format!("\nRecording: {}", url));
        }

        NoteRecord {
            contact_id: contact_id.to_string(),
            title: NOTE_TITLE.to_string(),
            content,
        }
    }
}

pub struct Forwarder {
    crm: CrmClient,
    correlator: Option<CallLogCorrelator>,
    gate: DispositionGate,
}

impl Forwarder {
    pub fn new(
        crm: CrmClient,
        correlator: Option<CallLogCorrelator>,
        gate: DispositionGate,
    ) -> Self {
        Self {
            crm,
            correlator,
            gate,
        }
    }

    /// Wire the full pipeline from configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        let http = reqwest::Client::new();
        let tokens = TokenManager::from_config(config, http.clone());
        let crm = CrmClient::new(http.clone(), &config.crm_base_url, tokens);
        let correlator = ConvosoLogClient::from_config(config, http)
            .map(|client| CallLogCorrelator::new(Arc::new(client)));
        if correlator.is_none() {
            warn!("CONVOSO_AUTH_TOKEN not set - dialer log enrichment disabled");
        }

        Self::new(crm, correlator, DispositionGate::new())
    }

    pub fn tokens(&self) -> &TokenManager {
        self.crm.tokens()
    }

    pub fn gate(&self) -> &DispositionGate {
        &self.gate
    }

    pub fn enrichment_enabled(&self) -> bool {
        self.correlator.is_some()
    }

    /// Forward a call-completed webhook body.
    pub async fn handle_call_completed(&self, body: &Value) -> Result<ForwardOutcome> {
        let received_at = Utc::now();
        let event = payload::normalize(body);
        if !event.has_phone() {
            warn!("Call event without phone number ({:?} payload)", event.input_shape);
            return Err(RelayError::MissingPhone);
        }

        let enrichment = match &self.correlator {
            Some(correlator) => correlator.find_latest(&event.phone_digits).await,
            None => None,
        };

        let plan = plan_call_completed(&event, enrichment.as_ref(), received_at);
        Ok(self.deliver(&event.phone_digits, plan).await)
    }

    /// Forward a disposition-changed webhook body, first delivery only.
    pub async fn handle_disposition(&self, body: &Value) -> ForwardOutcome {
        let received_at = Utc::now();
        let event = payload::normalize(body);
        if event.disposition_text().is_none() {
            info!("Disposition event without disposition, skipping");
            return ForwardOutcome::skipped(SkipReason::BlankDisposition);
        }

        // gate closes before any network call
        let key = dedup_key(&event, received_at);
        let decision = self
            .gate
            .admit_key(key, event.disposition_id.clone(), received_at)
            .await;
        if decision.is_duplicate() {
            return ForwardOutcome::skipped(SkipReason::DuplicateDisposition);
        }

        let plan = plan_disposition(&event, received_at);
        self.deliver(&event.phone_digits, plan).await
    }

    async fn deliver(&self, phone_digits: &str, plan: ForwardPlan) -> ForwardOutcome {
        match self.try_deliver(phone_digits, plan).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Forwarding for {} failed: {}", phone_digits, e);
                ForwardOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn try_deliver(&self, phone_digits: &str, plan: ForwardPlan) -> Result<ForwardOutcome> {
        if phone_digits.is_empty() {
            info!("No phone number to resolve a contact, skipping");
            return Ok(ForwardOutcome::skipped(SkipReason::NoContact));
        }

        let contacts = self.crm.search_contacts(phone_digits).await?;
        let contact = match contacts.into_iter().next() {
            Some(contact) => contact,
            None => {
                info!("No CRM contact for {}, skipping", phone_digits);
                return Ok(ForwardOutcome::skipped(SkipReason::NoContact));
            }
        };

        let Some(call_type) = plan.direction.crm_label() else {
            warn!(
                "Call direction unknown for {}, writing contact note instead",
                phone_digits
            );
            let note = plan.note_record(&contact.id);
            let note_id = self.crm.create_note(&note).await?;
            return Ok(ForwardOutcome::direction_missing(contact.id, note_id));
        };

        let record = plan.call_record(&contact.id, call_type);
        let crm_id = self.crm.create_call(&record).await?;

        Ok(ForwardOutcome::Forwarded {
            contact_id: contact.id,
            crm_id,
            outcome: plan.outcome,
            direction: plan.direction,
            enrichment_attempt: plan.enrichment_attempt,
        })
    }
}

/// Build the write plan for a call-completed event.
pub fn plan_call_completed(
    event: &CanonicalEvent,
    enrichment: Option<&CorrelatedLog>,
    received_at: DateTime<Utc>,
) -> ForwardPlan {
    let log = enrichment.map(|found| &found.entry);

    let talk_seconds = log
        .map(|entry| entry.call_length_seconds)
        .filter(|secs| *secs > 0)
        .unwrap_or(event.duration_seconds);

    let outcome = classifier::classify(&Signals {
        talk_seconds,
        term_reason: log
            .and_then(|entry| entry.term_reason.as_deref())
            .or(event.term_reason.as_deref()),
        status_name: log
            .and_then(|entry| entry.status_name.as_deref())
            .or(event.disposition_name.as_deref()),
        disposition: event.disposition.as_deref(),
        call_result: event.call_result.as_deref(),
    });

    let base_note = log
        .and_then(|entry| entry.agent_comment.clone())
        .or_else(|| event.notes.clone())
        .unwrap_or_else(|| FALLBACK_NOTE.to_string());
    let notes = match enrichment {
        Some(found) => format!(
            "{}\n\n[convoso] log_id={} status={} term_reason={} attempt={}",
            base_note,
            found.entry.id,
            found.entry.status_name.as_deref().unwrap_or("-"),
            found.entry.term_reason.as_deref().unwrap_or("-"),
            found.attempt
        ),
        None => base_note,
    };

    ForwardPlan {
        created_at: event
            .created_at
            .clone()
            .or_else(|| log.and_then(|entry| entry.call_date.clone()))
            .unwrap_or_else(|| received_at.to_rfc3339()),
        direction: resolve_direction(event, enrichment),
        outcome,
        notes,
        duration: format_duration(talk_seconds),
        recording_url: event
            .recording_url
            .clone()
            .or_else(|| log.and_then(|entry| entry.recording_url.clone())),
        external_call_id: event.call_id.clone(),
        enrichment_attempt: enrichment.map(|found| found.attempt),
    }
}

/// Build the write plan for a disposition-changed event.
pub fn plan_disposition(event: &CanonicalEvent, received_at: DateTime<Utc>) -> ForwardPlan {
    let outcome = classifier::classify(&Signals {
        talk_seconds: event.duration_seconds,
        term_reason: event.term_reason.as_deref(),
        status_name: event.disposition_name.as_deref(),
        disposition: event.disposition.as_deref(),
        call_result: event.call_result.as_deref(),
    });

    let mut notes = format!("Disposition: {}", event.disposition_text().unwrap_or("-"));
    if let Some(agent) = &event.agent_name {
        notes.push_str(&format!(" (agent: {})", agent));
    }
    if let Some(extra) = &event.notes {
        notes.push_str(&format!("\n{}", extra));
    }

    ForwardPlan {
        created_at: event
            .created_at
            .clone()
            .unwrap_or_else(|| received_at.to_rfc3339()),
        direction: resolve_direction(event, None),
        outcome,
        notes,
        duration: format_duration(event.duration_seconds),
        recording_url: event.recording_url.clone(),
        external_call_id: event.call_id.clone(),
        enrichment_attempt: None,
    }
}

/// Direction from explicit call-type fields first (webhook, then dialer
/// log), then from free-text hints, else indeterminate.
pub fn resolve_direction(event: &CanonicalEvent, enrichment: Option<&CorrelatedLog>) -> Direction {
    let log = enrichment.map(|found| &found.entry);

    let explicit = [
        event.call_type.as_deref(),
        log.and_then(|entry| entry.call_type.as_deref()),
    ];
    if let Some(direction) = explicit
        .into_iter()
        .flatten()
        .map(direction_from_call_type)
        .find(|d| *d != Direction::Indeterminate)
    {
        return direction;
    }

    let hints = [
        event.notes.as_deref(),
        log.and_then(|entry| entry.agent_comment.as_deref()),
        log.and_then(|entry| entry.status_name.as_deref()),
        event.disposition_name.as_deref(),
        event.term_reason.as_deref(),
        log.and_then(|entry| entry.term_reason.as_deref()),
    ];
    hints
        .into_iter()
        .flatten()
        .map(direction_hint)
        .find(|d| *d != Direction::Indeterminate)
        .unwrap_or(Direction::Indeterminate)
}

/// Map a dialer call-type value to a direction
pub fn direction_from_call_type(raw: &str) -> Direction {
    let value = raw.trim().to_lowercase();
    match value.as_str() {
        "in" | "inbound" | "incoming" => Direction::Incoming,
        "out" | "outbound" | "outgoing" | "manual" | "auto" => Direction::Outgoing,
        _ => direction_hint(&value),
    }
}

/// Direction mentioned anywhere in free text
fn direction_hint(text: &str) -> Direction {
    let text = text.to_lowercase();
    if text.contains("inbound") || text.contains("incoming") {
        Direction::Incoming
    } else if text.contains("outbound") || text.contains("outgoing") {
        Direction::Outgoing
    } else {
        Direction::Indeterminate
    }
}

/// Whole seconds as `HH:MM:SS`
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
