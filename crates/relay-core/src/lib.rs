//! ============================================================================
//! RELAY-CORE: Dialer → CRM call-log forwarding pipeline
//! ============================================================================
//! This crate handles all backend logic for the relay:
//! - Inbound webhook payload normalization (object / array / params shapes)
//! - Dialer call-log enrichment with bounded polling retries
//! - Outcome classification from talk time and free-text status
//! - First-disposition dedup gate
//! - CRM access-token lifecycle with single-flight refresh
//! - Contact resolution and call/note writes
//! ============================================================================

pub mod auth;
pub mod classifier;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod payload;
pub mod phone;
pub mod types;

// Re-export main types for convenience
pub use auth::{TokenManager, TokenState};
pub use classifier::classify;
pub use client::{CallLogSource, ConvosoLogClient, CrmClient};
pub use config::RelayConfig;
pub use correlator::CallLogCorrelator;
pub use dedup::{DedupEntry, DispositionGate, GateDecision};
pub use dispatcher::Forwarder;
pub use error::{RelayError, TokenError};
pub use types::*;
