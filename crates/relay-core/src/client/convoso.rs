//! ============================================================================
//! Convoso Log Client - Dialer Call-Log Retrieval
//! ============================================================================
//! Reads recent call-log rows for a phone number from the dialer's
//! `log/retrieve` endpoint. The response nests results differently across
//! API versions (`data.results`, `results`, `data`), and scalar fields arrive
//! as either strings or numbers, so rows are read from raw JSON.
//! ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::CallLogSource;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::payload::{value_seconds, value_text};
use crate::types::DialerLogEntry;

/// Log retrieval endpoint, relative to the dialer API base
pub const LOG_RETRIEVE_PATH: &str = "/log/retrieve";

/// Client for the dialer call-log API
pub struct ConvosoLogClient {
    http: reqwest::Client,
    api_base: String,
    auth_token: String,
    limit: u32,
    timeout: Duration,
}

impl ConvosoLogClient {
    pub fn new(
        http: reqwest::Client,
        api_base: &str,
        auth_token: String,
        limit: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            auth_token,
            limit,
            timeout,
        }
    }

    /// `None` when no dialer token is configured (enrichment disabled)
    pub fn from_config(config: &RelayConfig, http: reqwest::Client) -> Option<Self> {
        config.convoso_auth_token.as_ref().map(|token| {
            info!("Dialer call-log enrichment enabled ({})", config.convoso_api_base);
            Self::new(
                http,
                &config.convoso_api_base,
                token.clone(),
                config.convoso_log_limit,
                config.convoso_timeout,
            )
        })
    }
}

#[async_trait]
impl CallLogSource for ConvosoLogClient {
    async fn fetch_recent(&self, phone_digits: &str) -> Result<Vec<DialerLogEntry>> {
        let url = format!("{}{}", self.api_base, LOG_RETRIEVE_PATH);
        let limit = self.limit.to_string();

        debug!("Retrieving dialer log for {}", phone_digits);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("auth_token", self.auth_token.as_str()),
                ("phone_number", phone_digits),
                ("limit", limit.as_str()),
                ("offset", "0"),
                ("order", "desc"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            // the request URL carries the auth token
            .map_err(|e| RelayError::Http(e.without_url()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::DialerStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RelayError::Decode(format!("dialer log response: {}", e.without_url())))?;

        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = body
                .get("text")
                .or_else(|| body.get("error"))
                .and_then(value_text)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(RelayError::Decode(format!("dialer reported failure: {}", reason)));
        }

        let mut entries: Vec<DialerLogEntry> = result_rows(&body)
            .map(|rows| rows.iter().filter_map(parse_log_entry).collect())
            .unwrap_or_default();

        // newest first, rows without a date last
        entries.sort_by(|a, b| b.call_date.cmp(&a.call_date));

        debug!("Dialer log returned {} entries for {}", entries.len(), phone_digits);
        Ok(entries)
    }
}

fn result_rows(body: &Value) -> Option<&Vec<Value>> {
    body.pointer("/data/results")
        .or_else(|| body.get("results"))
        .or_else(|| body.get("data"))
        .and_then(Value::as_array)
}

/// Read one log row; non-object rows are dropped.
pub fn parse_log_entry(row: &Value) -> Option<DialerLogEntry> {
    let row = row.as_object()?;
    let text = |key: &str| row.get(key).and_then(value_text);

    Some(DialerLogEntry {
        id: text("id").unwrap_or_default(),
        call_type: text("call_type"),
        agent_comment: text("agent_comment"),
        status_name: text("status_name").or_else(|| text("status")),
        term_reason: text("term_reason"),
        call_length_seconds: row.get("call_length").map(value_seconds).unwrap_or(0),
        call_date: text("call_date"),
        recording_url: row
            .get("recording")
            .and_then(recording_url)
            .or_else(|| text("recording_url")),
    })
}

/// `recording` is a URL string or a list of `{ url }` objects / strings
fn recording_url(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(|item| {
            item.get("url")
                .or_else(|| item.get("src"))
                .and_then(value_text)
                .or_else(|| value_text(item))
        }),
        other => value_text(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::CallLogCorrelator;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    fn client(server: &MockServer) -> ConvosoLogClient {
        ConvosoLogClient::new(
            reqwest::Client::new(),
            &server.base_url(),
            "dialer-token".to_string(),
            5,
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_parse_log_entry_mixed_types() {
        let entry = parse_log_entry(&json!({
            "id": 5521,
            "call_type": "INBOUND",
            "agent_comment": "Asked for pricing",
            "status_name": "Sale",
            "term_reason": "AGENT",
            "call_length": "187",
            "call_date": "2024-03-01 10:15:00",
            "recording": [{ "recording_id": 9, "url": "https://rec.example.com/9.mp3" }]
        }))
        .unwrap();

        assert_eq!(entry.id, "5521");
        assert_eq!(entry.call_type.as_deref(), Some("INBOUND"));
        assert_eq!(entry.call_length_seconds, 187);
        assert_eq!(entry.recording_url.as_deref(), Some("https://rec.example.com/9.mp3"));

        assert!(parse_log_entry(&json!("not a row")).is_none());
    }

    #[tokio::test]
    async fn test_fetch_recent_sends_query_and_orders_newest_first() {
        let server = MockServer::start_async().await;
        let log = server.mock(|when, then| {
            when.method(GET)
                .path(LOG_RETRIEVE_PATH)
                .query_param("auth_token", "dialer-token")
                .query_param("phone_number", "4155550100")
                .query_param("limit", "5");
            then.status(200).json_body(json!({
                "success": true,
                "data": { "results": [
                    { "id": "old", "call_date": "2024-03-01 09:00:00" },
                    { "id": "new", "call_date": "2024-03-01 10:00:00" }
                ]}
            }));
        });

        let entries = client(&server).fetch_recent("4155550100").await.unwrap();
        assert_eq!(log.calls(), 1);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "new");
    }

    #[tokio::test]
    async fn test_fetch_recent_errors() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path(LOG_RETRIEVE_PATH).query_param("phone_number", "1");
            then.status(502).body("bad gateway");
        });
        server.mock(|when, then| {
            when.method(GET).path(LOG_RETRIEVE_PATH).query_param("phone_number", "2");
            then.status(200)
                .json_body(json!({ "success": false, "text": "Invalid auth token" }));
        });

        let client = client(&server);
        assert!(matches!(
            client.fetch_recent("1").await,
            Err(RelayError::DialerStatus { status: 502, .. })
        ));
        assert!(matches!(client.fetch_recent("2").await, Err(RelayError::Decode(_))));
    }

    #[tokio::test]
    async fn test_timeout_error_hides_auth_token() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path(LOG_RETRIEVE_PATH);
            then.status(200)
                .json_body(json!({ "data": [] }))
                .delay(Duration::from_millis(1500));
        });

        let client = ConvosoLogClient::new(
            reqwest::Client::new(),
            &server.base_url(),
            "SECRET-DIALER-TOKEN".to_string(),
            5,
            Duration::from_millis(200),
        );
        let err = client.fetch_recent("4155550100").await.unwrap_err();

        assert!(matches!(err, RelayError::Http(ref e) if e.is_timeout()));
        let text = err.to_string();
        assert!(!text.contains("SECRET-DIALER-TOKEN"), "token leaked: {text}");
        assert!(!text.contains("auth_token"), "query leaked: {text}");
    }

    #[tokio::test]
    async fn test_timeouts_degrade_to_no_match() {
        let server = MockServer::start_async().await;
        let log = server.mock(|when, then| {
            when.method(GET)
                .path(LOG_RETRIEVE_PATH)
                .query_param("phone_number", "4155550100");
            then.status(200)
                .json_body(json!({ "data": [{ "id": "too-late" }] }))
                .delay(Duration::from_millis(1000));
        });

        let client = ConvosoLogClient::new(
            reqwest::Client::new(),
            &server.base_url(),
            "dialer-token".to_string(),
            5,
            Duration::from_millis(100),
        );
        let correlator =
            CallLogCorrelator::with_backoff(Arc::new(client), vec![Duration::ZERO; 3]);

        assert!(correlator.find_latest("4155550100").await.is_none());
        assert_eq!(log.calls(), 3);
    }
}
