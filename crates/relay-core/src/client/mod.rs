//! ============================================================================
//! Client Module - Remote API Clients
//! ============================================================================
//! Contains the clients for the two upstream systems:
//! - ConvosoLogClient: dialer call-log retrieval (read-only, best effort)
//! - CrmClient: contact search and call/note writes behind the TokenManager
//! ============================================================================

mod convoso;
mod crm;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::DialerLogEntry;

pub use convoso::{parse_log_entry, ConvosoLogClient, LOG_RETRIEVE_PATH};
pub use crm::{
    CallRecord, CrmClient, CrmContact, NoteRecord, CALLS_PATH, CONTACT_SEARCH_PATH, NOTES_PATH,
};

/// Source of dialer call-log entries for a phone number
#[async_trait]
pub trait CallLogSource: Send + Sync {
    /// Recent log entries for the phone key, newest first
    async fn fetch_recent(&self, phone_digits: &str) -> Result<Vec<DialerLogEntry>>;
}
