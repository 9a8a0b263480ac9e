//! Error types for the relay pipeline.

use thiserror::Error;

/// Failure of a CRM token refresh.
///
/// Cloneable so a single failed refresh can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TokenError {
    #[error("CRM client credentials are not configured")]
    NotConfigured,

    #[error("token endpoint rejected refresh ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token request failed: {0}")]
    Transport(String),

    #[error("token response malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// Call-completion event did not yield a usable phone number
    #[error("missing phone number in call event")]
    MissingPhone,

    #[error(transparent)]
    Token(#[from] TokenError),

    /// 401/403 that survived the one-shot refresh-and-retry
    #[error("CRM rejected credentials ({status}) after token refresh")]
    CrmRejected { status: u16 },

    #[error("CRM request failed ({status}): {body}")]
    CrmStatus { status: u16, body: String },

    #[error("dialer request failed ({status}): {body}")]
    DialerStatus { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Client input errors are reported back to the webhook caller as-is.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RelayError::MissingPhone)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
