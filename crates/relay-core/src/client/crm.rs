//! ============================================================================
//! CRM Client - Contact Search and Call/Note Writes
//! ============================================================================
//! Every request goes through [`TokenManager::with_auth`], so an expired or
//! revoked token is refreshed and the request retried exactly once.
//! ============================================================================

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::TokenManager;
use crate::error::{RelayError, Result};
use crate::payload::value_text;

pub const CONTACT_SEARCH_PATH: &str = "/contacts/search";
pub const CALLS_PATH: &str = "/calls";
pub const NOTES_PATH: &str = "/notes";

/// Candidate contact returned by a phone search
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrmContact {
    pub id: String,
    pub name: Option<String>,
}

/// Call-log write payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub contact_id: String,
    pub created_at: String,
    /// "Incoming" / "Outgoing"
    pub call_type: String,
    pub call_disposition: u8,
    pub call_result: String,
    pub notes: String,
    /// `HH:MM:SS`
    pub duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_call_id: Option<String>,
}

/// Contact note payload, used when a call record cannot be written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteRecord {
    pub contact_id: String,
    pub title: String,
    pub content: String,
}

/// Client for the CRM REST API
#[derive(Clone)]
pub struct CrmClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenManager,
}

impl CrmClient {
    pub fn new(http: reqwest::Client, base_url: &str, tokens: TokenManager) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Contacts whose phone matches the digit key, best match first
    pub async fn search_contacts(&self, phone_digits: &str) -> Result<Vec<CrmContact>> {
        let url = format!("{}{}", self.base_url, CONTACT_SEARCH_PATH);
        debug!("Searching CRM contacts for {}", phone_digits);

        let response = self
            .tokens
            .with_auth(|token| {
                self.http
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[("phone", phone_digits)])
                    .send()
            })
            .await?;

        let body = read_success(response).await?;
        let contacts: Vec<CrmContact> = contact_rows(&body)
            .map(|rows| rows.iter().filter_map(parse_contact).collect())
            .unwrap_or_default();

        debug!("CRM search for {} returned {} contacts", phone_digits, contacts.len());
        Ok(contacts)
    }

    /// Create a call-log record, returning the CRM id when one is reported
    pub async fn create_call(&self, record: &CallRecord) -> Result<Option<String>> {
        let id = self.post_json(CALLS_PATH, record).await?;
        info!(
            "Logged {} call for contact {} (crm id: {:?})",
            record.call_type, record.contact_id, id
        );
        Ok(id)
    }

    /// Create a contact note, returning the CRM id when one is reported
    pub async fn create_note(&self, note: &NoteRecord) -> Result<Option<String>> {
        let id = self.post_json(NOTES_PATH, note).await?;
        info!("Logged note for contact {} (crm id: {:?})", note.contact_id, id);
        Ok(id)
    }

    async fn post_json<T: Serialize>(&self, path: &str, payload: &T) -> Result<Option<String>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .tokens
            .with_auth(|token| self.http.post(&url).bearer_auth(token).json(payload).send())
            .await?;

        let body = read_success(response).await?;
        Ok(record_id(&body))
    }
}

/// Non-2xx → [`RelayError::CrmStatus`]; empty or non-JSON bodies read as null.
async fn read_success(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(RelayError::CrmStatus {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
}

fn contact_rows(body: &Value) -> Option<&Vec<Value>> {
    match body {
        Value::Array(rows) => Some(rows),
        other => ["data", "contacts", "results"]
            .iter()
            .find_map(|key| other.get(*key).and_then(Value::as_array)),
    }
}

fn parse_contact(row: &Value) -> Option<CrmContact> {
    let id = row.get("id").and_then(value_text)?;
    let name = ["name", "full_name", "display_name"]
        .iter()
        .find_map(|key| row.get(*key).and_then(value_text));
    Some(CrmContact { id, name })
}

fn record_id(body: &Value) -> Option<String> {
    body.get("id")
        .or_else(|| body.pointer("/data/id"))
        .and_then(value_text)
}
