//! ============================================================================
//! Auth Module - CRM Access Token Lifecycle
//! ============================================================================
//! Handles authentication against the CRM:
//! - Client-credentials token refresh with single-flight de-duplication
//! - Expiry safety buffer and TTL cap
//! - One-shot refresh-and-retry when the CRM rejects a token
//! ============================================================================

mod token_manager;

pub use token_manager::{
    TokenManager, TokenState, MAX_TOKEN_TTL_SECS, SAFETY_BUFFER_SECS, SCHEDULED_REFRESH_INTERVAL,
    TOKEN_PATH,
};
