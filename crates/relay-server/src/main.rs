// ============================================================================
// relay-server — dialer webhook receiver forwarding calls into the CRM
// ============================================================================
// Configuration comes from the environment (and `.env`); see RelayConfig.
// ============================================================================

mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use relay_core::auth::SCHEDULED_REFRESH_INTERVAL;
use relay_core::{Forwarder, RelayConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};

use routes::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_server=debug".parse()?)
                .add_directive("relay_core=debug".parse()?),
        )
        .init();

    info!("Starting dialer → CRM relay");

    let config = RelayConfig::from_env().context("failed to load relay configuration")?;
    if config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET not set - accepting unauthenticated webhooks");
    }

    let forwarder = Forwarder::from_config(&config);
    match forwarder.tokens().spawn_scheduled_refresh(SCHEDULED_REFRESH_INTERVAL) {
        Some(_) => info!("Scheduled CRM token refresh every {:?}", SCHEDULED_REFRESH_INTERVAL),
        None => info!("No CRM client credentials - using static access token"),
    }

    let state = Arc::new(AppState {
        forwarder,
        webhook_secret: config.webhook_secret.clone(),
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind relay server on {}", config.bind_addr))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound relay server address")?;
    info!("Relay listening on {}", local_addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("relay server exited unexpectedly")?;

    info!("Relay stopped");
    Ok(())
}
