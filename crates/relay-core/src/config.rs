//! ============================================================================
//! Relay Configuration
//! ============================================================================
//! All settings come from process environment (the binaries load `.env`
//! first via dotenvy). Optional credentials stay `None` and switch the
//! matching feature off instead of failing startup.
//! ============================================================================

use std::time::Duration;

use crate::error::{RelayError, Result};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CONVOSO_API_BASE: &str = "https://api.convoso.com/v1";
pub const DEFAULT_LOG_LIMIT: u32 = 5;
pub const DEFAULT_LOG_TIMEOUT_SECS: u64 = 15;

/// CRM client-credentials pair used for dynamic token refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    /// Shared secret expected in `x-webhook-secret`; `None` accepts everything
    pub webhook_secret: Option<String>,
    pub crm_base_url: String,
    pub crm_credentials: Option<ClientCredentials>,
    /// Static fallback token, also seeds the token cache at startup
    pub crm_access_token: Option<String>,
    pub convoso_api_base: String,
    /// `None` disables call-log enrichment
    pub convoso_auth_token: Option<String>,
    pub convoso_log_limit: u32,
    pub convoso_timeout: Duration,
}

impl RelayConfig {
    /// Read configuration from the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup (env, map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let crm_base_url = get("CRM_BASE_URL")
            .ok_or_else(|| RelayError::Config("CRM_BASE_URL is not set".to_string()))?;

        let crm_credentials = match (get("CRM_CLIENT_ID"), get("CRM_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(ClientCredentials {
                client_id,
                client_secret,
            }),
            _ => None,
        };

        let convoso_log_limit =
            parse_or(get("CONVOSO_LOG_LIMIT"), DEFAULT_LOG_LIMIT, "CONVOSO_LOG_LIMIT")?;
        let timeout_secs = parse_or(
            get("CONVOSO_TIMEOUT_SECS"),
            DEFAULT_LOG_TIMEOUT_SECS,
            "CONVOSO_TIMEOUT_SECS",
        )?;

        Ok(Self {
            bind_addr: get("RELAY_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            webhook_secret: get("WEBHOOK_SECRET"),
            crm_base_url: trim_base(&crm_base_url),
            crm_credentials,
            crm_access_token: get("CRM_ACCESS_TOKEN"),
            convoso_api_base: trim_base(
                &get("CONVOSO_API_BASE").unwrap_or_else(|| DEFAULT_CONVOSO_API_BASE.to_string()),
            ),
            convoso_auth_token: get("CONVOSO_AUTH_TOKEN"),
            convoso_log_limit,
            convoso_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Minimal config pointing both upstreams at one base URL (tests, CLI).
    pub fn for_base_url(base_url: &str) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            webhook_secret: None,
            crm_base_url: trim_base(base_url),
            crm_credentials: None,
            crm_access_token: None,
            convoso_api_base: trim_base(base_url),
            convoso_auth_token: None,
            convoso_log_limit: DEFAULT_LOG_LIMIT,
            convoso_timeout: Duration::from_secs(DEFAULT_LOG_TIMEOUT_SECS),
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T, key: &str) -> Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| RelayError::Config(format!("{} must be a number, got '{}'", key, raw))),
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            RelayConfig::from_lookup(lookup(&[("CRM_BASE_URL", "https://crm.example.com/api/")]))
                .unwrap();
        assert_eq!(config.crm_base_url, "https://crm.example.com/api");
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.convoso_api_base, DEFAULT_CONVOSO_API_BASE);
        assert_eq!(config.convoso_log_limit, 5);
        assert_eq!(config.convoso_timeout, Duration::from_secs(15));
        assert!(config.webhook_secret.is_none());
        assert!(config.crm_credentials.is_none());
        assert!(config.convoso_auth_token.is_none());
    }

    #[test]
    fn test_credentials_need_both_halves() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("CRM_BASE_URL", "https://crm.example.com"),
            ("CRM_CLIENT_ID", "id"),
        ]))
        .unwrap();
        assert!(config.crm_credentials.is_none());

        let config = RelayConfig::from_lookup(lookup(&[
            ("CRM_BASE_URL", "https://crm.example.com"),
            ("CRM_CLIENT_ID", "id"),
            ("CRM_CLIENT_SECRET", "secret"),
            ("WEBHOOK_SECRET", " "),
        ]))
        .unwrap();
        assert_eq!(
            config.crm_credentials,
            Some(ClientCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string()
            })
        );
        // blank secret means no secret
        assert!(config.webhook_secret.is_none());
    }

    #[test]
    fn test_missing_base_url_and_bad_numbers() {
        assert!(RelayConfig::from_lookup(lookup(&[])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[
            ("CRM_BASE_URL", "https://crm.example.com"),
            ("CONVOSO_LOG_LIMIT", "many"),
        ]))
        .is_err());
    }
}
