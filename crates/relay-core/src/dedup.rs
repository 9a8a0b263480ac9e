//! ============================================================================
//! Disposition Dedup Gate - First-Disposition-Only Forwarding
//! ============================================================================
//! The dialer can deliver the same disposition change more than once. Only
//! the first delivery per call is forwarded:
//! - key: call id, else lead id + event timestamp, else lead id + receipt time
//! - entries live 30 days and are pruned by a full scan on every check
//! - check and insert happen under one write lock, before any network call
//! ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::CanonicalEvent;

/// Key prefix shared by all disposition dedup entries
pub const KEY_PREFIX: &str = "disp_first_set:";

/// How long a forwarded disposition blocks repeats (30 days)
pub const DEDUP_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupEntry {
    pub key: String,
    pub first_seen_at: DateTime<Utc>,
    pub disposition_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// First sighting; the key is now recorded
    Admitted { key: String },
    /// Already forwarded within the TTL
    Duplicate {
        key: String,
        first_seen_at: DateTime<Utc>,
    },
}

impl GateDecision {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, GateDecision::Duplicate { .. })
    }
}

/// Build the dedup key for a disposition event.
pub fn dedup_key(event: &CanonicalEvent, received_at: DateTime<Utc>) -> String {
    if let Some(call_id) = &event.call_id {
        return format!("{}{}", KEY_PREFIX, call_id);
    }

    let moment = event
        .created_at
        .clone()
        .unwrap_or_else(|| received_at.to_rfc3339());

    match &event.lead_id {
        Some(lead_id) => format!("{}{}:{}", KEY_PREFIX, lead_id, moment),
        // no identifiers at all: scope by phone so retries of the same
        // timestamped event still collapse
        None => format!("{}phone-{}:{}", KEY_PREFIX, event.phone_digits, moment),
    }
}

/// Process-wide first-disposition gate. Clones share state.
#[derive(Clone)]
pub struct DispositionGate {
    entries: Arc<RwLock<HashMap<String, DedupEntry>>>,
    ttl: chrono::Duration,
}

impl Default for DispositionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DispositionGate {
    pub fn new() -> Self {
        Self::with_ttl(chrono::Duration::days(DEDUP_TTL_DAYS))
    }

    pub fn with_ttl(ttl: chrono::Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Gate a disposition event received now.
    pub async fn admit(&self, event: &CanonicalEvent) -> GateDecision {
        let now = Utc::now();
        let key = dedup_key(event, now);
        self.admit_key(key, event.disposition_id.clone(), now).await
    }

    /// Check-and-insert a key as of `now`.
    pub async fn admit_key(
        &self,
        key: String,
        disposition_id: Option<String>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let mut entries = self.entries.write().await;

        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!("Pruned {} expired disposition dedup entries", pruned);
        }

        if let Some(existing) = entries.get(&key) {
            info!(
                "Duplicate disposition for {} (first seen {}), skipping",
                key, existing.first_seen_at
            );
            return GateDecision::Duplicate {
                key,
                first_seen_at: existing.first_seen_at,
            };
        }

        entries.insert(
            key.clone(),
            DedupEntry {
                key: key.clone(),
                first_seen_at: now,
                disposition_id,
            },
        );
        debug!("Recorded first disposition for {}", key);
        GateDecision::Admitted { key }
    }

    /// Whether a live (unexpired) entry exists for the key as of `now`
    pub async fn contains(&self, key: &str, now: DateTime<Utc>) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .map(|entry| !self.is_expired(entry, now))
            .unwrap_or(false)
    }

    /// Number of stored entries, expired ones included until the next prune
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn is_expired(&self, entry: &DedupEntry, now: DateTime<Utc>) -> bool {
        now - entry.first_seen_at > self.ttl
    }
}
