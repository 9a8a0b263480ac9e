//! ============================================================================
//! CRM Token Manager - Single-Flight Client-Credentials Refresh
//! ============================================================================
//! Owns the process-wide CRM access token:
//! - `acquire()` returns the cached token while it is outside the 6h safety
//!   buffer, otherwise joins (or starts) the one in-flight refresh
//! - `with_auth()` runs a CRM call, and on 401/403 clears the cache,
//!   refreshes once and retries once
//! - `spawn_scheduled_refresh()` optionally refreshes on a fixed interval
//!
//! Concurrent callers share one `Shared` refresh future, so the auth
//! endpoint sees at most one request at a time and every waiter gets the
//! same token or the same error.
//! ============================================================================

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ClientCredentials, RelayConfig};
use crate::error::{RelayError, TokenError};

/// Token endpoint, relative to the CRM base URL
pub const TOKEN_PATH: &str = "/oauth/token";

/// Tokens are refreshed this long before they actually expire (6 hours)
pub const SAFETY_BUFFER_SECS: i64 = 6 * 60 * 60;

/// Upper bound on any token lifetime, also used when the server omits one
/// (9 days)
pub const MAX_TOKEN_TTL_SECS: i64 = 9 * 24 * 60 * 60;

/// Interval of the optional background refresh
pub const SCHEDULED_REFRESH_INTERVAL: Duration = Duration::from_secs(MAX_TOKEN_TTL_SECS as u64);

type RefreshResult = Result<String, TokenError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// Observable token lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Cached token usable outside the safety buffer
    Valid,
    /// No usable token yet, or inside the safety buffer
    Expiring,
    /// A refresh is in flight
    Refreshing,
    /// Cleared after the CRM rejected it, waiting for a refresh
    Rejected,
}

#[derive(Default)]
struct TokenSlot {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    in_flight: Option<SharedRefresh>,
    rejected: bool,
}

impl TokenSlot {
    fn fresh_token(&self, now: DateTime<Utc>) -> Option<String> {
        match (&self.token, self.expires_at) {
            (Some(token), Some(expires_at))
                if expires_at - chrono::Duration::seconds(SAFETY_BUFFER_SECS) > now =>
            {
                Some(token.clone())
            }
            _ => None,
        }
    }
}

struct Inner {
    http: reqwest::Client,
    token_url: String,
    credentials: Option<ClientCredentials>,
    fallback: Option<String>,
    slot: Mutex<TokenSlot>,
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, TokenSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Body of the shared refresh future; clears the in-flight marker when
    /// done, storing the token only on success.
    async fn refresh(&self) -> RefreshResult {
        let result = self.request_token().await;

        let mut slot = self.lock_slot();
        slot.in_flight = None;
        match result {
            Ok((token, expires_at)) => {
                slot.token = Some(token.clone());
                slot.expires_at = Some(expires_at);
                slot.rejected = false;
                Ok(token)
            }
            Err(e) => {
                warn!("CRM token refresh failed: {}", e);
                Err(e)
            }
        }
    }

    async fn request_token(&self) -> Result<(String, DateTime<Utc>), TokenError> {
        let credentials = self.credentials.as_ref().ok_or(TokenError::NotConfigured)?;

        info!("Refreshing CRM access token");

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&params)
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Token refresh failed: {} - {}", status, body);
            return Err(TokenError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(alias = "token")]
            access_token: String,
            #[serde(default)]
            expires_in: Option<i64>,
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Malformed(e.to_string()))?;

        if body.access_token.trim().is_empty() {
            return Err(TokenError::Malformed("empty access_token".to_string()));
        }

        let ttl = body
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(MAX_TOKEN_TTL_SECS)
            .min(MAX_TOKEN_TTL_SECS);
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl);

        info!("Obtained CRM access token, expires in {} seconds", ttl);
        Ok((body.access_token, expires_at))
    }
}

/// Process-wide CRM token cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    /// Create a manager. A fallback token, if given, seeds the cache as if
    /// freshly issued.
    pub fn new(
        http: reqwest::Client,
        crm_base_url: &str,
        credentials: Option<ClientCredentials>,
        fallback: Option<String>,
    ) -> Self {
        let mut slot = TokenSlot::default();
        if let Some(token) = &fallback {
            slot.token = Some(token.clone());
            slot.expires_at = Some(Utc::now() + chrono::Duration::seconds(MAX_TOKEN_TTL_SECS));
        }

        Self {
            inner: Arc::new(Inner {
                http,
                token_url: format!("{}{}", crm_base_url.trim_end_matches('/'), TOKEN_PATH),
                credentials,
                fallback,
                slot: Mutex::new(slot),
            }),
        }
    }

    pub fn from_config(config: &RelayConfig, http: reqwest::Client) -> Self {
        Self::new(
            http,
            &config.crm_base_url,
            config.crm_credentials.clone(),
            config.crm_access_token.clone(),
        )
    }

    /// Whether client credentials for dynamic refresh are configured
    pub fn can_refresh(&self) -> bool {
        self.inner.credentials.is_some()
    }

    /// Get a usable token, refreshing (single-flight) when needed.
    pub async fn acquire(&self) -> Result<String, TokenError> {
        if !self.can_refresh() {
            return Ok(self.inner.fallback.clone().unwrap_or_default());
        }

        let refresh = {
            let mut slot = self.inner.lock_slot();
            if let Some(token) = slot.fresh_token(Utc::now()) {
                return Ok(token);
            }
            debug!("No fresh CRM token cached, joining refresh");
            self.join_or_start(&mut slot)
        };

        refresh.await
    }

    /// Refresh regardless of the cached token's age, sharing any refresh
    /// already in flight.
    pub async fn refresh_now(&self) -> Result<String, TokenError> {
        if !self.can_refresh() {
            return Err(TokenError::NotConfigured);
        }
        let refresh = {
            let mut slot = self.inner.lock_slot();
            self.join_or_start(&mut slot)
        };
        refresh.await
    }

    fn join_or_start(&self, slot: &mut TokenSlot) -> SharedRefresh {
        if let Some(in_flight) = &slot.in_flight {
            return in_flight.clone();
        }

        let inner = Arc::clone(&self.inner);
        let refresh = async move { inner.refresh().await }.boxed().shared();
        slot.in_flight = Some(refresh.clone());
        refresh
    }

    /// Drop the cached token after the CRM rejected `rejected`. A no-op when
    /// the cache already holds a different (newer) token.
    pub fn invalidate(&self, rejected: &str) {
        let mut slot = self.inner.lock_slot();
        if slot.token.as_deref() != Some(rejected) {
            debug!("Rejected CRM token already replaced, keeping cache");
            return;
        }
        slot.token = None;
        slot.expires_at = None;
        slot.rejected = true;
    }

    /// Replace the cached token directly.
    pub fn seed(&self, token: String, expires_at: DateTime<Utc>) {
        let mut slot = self.inner.lock_slot();
        slot.token = Some(token);
        slot.expires_at = Some(expires_at);
        slot.rejected = false;
    }

    pub fn state(&self) -> TokenState {
        let slot = self.inner.lock_slot();
        if slot.in_flight.is_some() {
            TokenState::Refreshing
        } else if slot.rejected && slot.token.is_none() {
            TokenState::Rejected
        } else if slot.fresh_token(Utc::now()).is_some() {
            TokenState::Valid
        } else {
            TokenState::Expiring
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock_slot().expires_at
    }

    pub fn cached_token(&self) -> Option<String> {
        self.inner.lock_slot().token.clone()
    }

    /// Run a CRM request with the current token.
    ///
    /// `send` receives the bearer token and is called at most twice: once
    /// normally, and once more after a 401/403 forced a refresh. A second
    /// rejection is returned as [`RelayError::CrmRejected`]. Other statuses
    /// are left to the caller.
    pub async fn with_auth<F, Fut>(&self, mut send: F) -> Result<reqwest::Response, RelayError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let token = self.acquire().await?;
        let response = send(token.clone()).await?;
        let status = response.status();
        if !is_rejection(status) {
            return Ok(response);
        }

        if !self.can_refresh() {
            warn!("CRM rejected static token ({}), no credentials to refresh", status);
            return Err(RelayError::CrmRejected {
                status: status.as_u16(),
            });
        }

        warn!("CRM rejected access token ({}), refreshing and retrying once", status);
        self.invalidate(&token);
        let token = self.acquire().await?;
        let response = send(token).await?;
        let status = response.status();
        if is_rejection(status) {
            error!("CRM rejected refreshed token ({})", status);
            return Err(RelayError::CrmRejected {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Refresh every `every` in the background. Returns `None` when there
    /// are no credentials to refresh with.
    pub fn spawn_scheduled_refresh(&self, every: Duration) -> Option<JoinHandle<()>> {
        if !self.can_refresh() {
            return None;
        }

        let manager = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match manager.refresh_now().await {
                    Ok(_) => info!("Scheduled CRM token refresh complete"),
                    Err(e) => warn!("Scheduled CRM token refresh failed: {}", e),
                }
            }
        }))
    }
}

fn is_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}
