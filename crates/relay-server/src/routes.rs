//! ============================================================================
//! Webhook Routes
//! ============================================================================
//! POST /webhooks/call-completed   call finished, forward with enrichment
//! POST /webhooks/disposition      disposition set, forward first one only
//! GET  /health                    liveness, token state, dedup size
//!
//! Bodies are read raw and decoded in the core (JSON or form-encoded), so a
//! wrong or missing content type never rejects a dialer delivery.
//! ============================================================================

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_core::payload::decode_body;
use relay_core::{ForwardOutcome, Forwarder};
use serde_json::json;
use tracing::{debug, error, warn};

pub const CALL_COMPLETED_ENDPOINT: &str = "/webhooks/call-completed";
pub const DISPOSITION_ENDPOINT: &str = "/webhooks/disposition";
pub const HEALTH_ENDPOINT: &str = "/health";
pub const SECRET_HEADER: &str = "x-webhook-secret";

pub struct AppState {
    pub forwarder: Forwarder,
    /// `None` accepts unauthenticated deliveries
    pub webhook_secret: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(CALL_COMPLETED_ENDPOINT, post(handle_call_completed))
        .route(DISPOSITION_ENDPOINT, post(handle_disposition))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(state)
}

async fn handle_call_completed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    let payload = decode_body(&body);
    match state.forwarder.handle_call_completed(&payload).await {
        Ok(outcome) => forwarded_response(outcome),
        Err(e) if e.is_client_error() => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(e) => {
            // the forwarder reports everything else as a Failed outcome
            error!("Unexpected call-completed error: {}", e);
            forwarded_response(ForwardOutcome::Failed {
                error: e.to_string(),
            })
        }
    }
}

async fn handle_disposition(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    let payload = decode_body(&body);
    let outcome = state.forwarder.handle_disposition(&payload).await;
    forwarded_response(outcome)
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let tokens = state.forwarder.tokens();
    let body = json!({
        "ok": true,
        "token": {
            "state": tokens.state(),
            "expires_at": tokens.expires_at(),
            "dynamic_refresh": tokens.can_refresh(),
        },
        "dedup_entries": state.forwarder.gate().len().await,
        "enrichment": state.forwarder.enrichment_enabled(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.webhook_secret.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if provided == Some(expected) {
        return Ok(());
    }

    warn!(
        "Rejected webhook delivery: {} header {}",
        SECRET_HEADER,
        if provided.is_some() { "mismatch" } else { "missing" }
    );
    Err(error_response(StatusCode::UNAUTHORIZED, "invalid webhook secret"))
}

fn forwarded_response(outcome: ForwardOutcome) -> Response {
    debug!("Webhook result: {:?}", outcome);
    (StatusCode::OK, Json(json!({ "ok": true, "result": outcome }))).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "ok": false, "error": message }))).into_response()
}
