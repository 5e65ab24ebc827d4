//! BrickFi gateway: entry point.
//!
//! Serves the server half of the platform: an image upload proxy to the
//! pinning service, wallet sign-in sessions with an admin allow-list, and a
//! read-only project API backed by the client SDK's cached contract reads.
//! A background task sweeps expired sessions.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod upload;

#[cfg(test)]
mod test_api;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use brickfi_client::{HttpRpc, Reader};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use auth::{AllowListPolicy, SessionStore};
use config::Config;
use upload::{PinataClient, PinningService};

pub fn router(state: Arc<api::ApiState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/upload", post(api::upload_image))
        .route("/api/uploads", get(api::list_uploads))
        .route("/auth/nonce", get(api::auth_nonce))
        .route("/auth/verify", post(api::auth_verify))
        .route("/auth/session", get(api::auth_session))
        .route("/auth/logout", post(api::auth_logout))
        .route("/projects", get(api::list_projects))
        .route("/projects/:address", get(api::get_project))
        .route(
            "/projects/:address/positions/:holder",
            get(api::get_position),
        )
        .route("/projects/:address/invest-plan", get(api::invest_plan))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url).await?;

    // Shared by the chain reader and the pinning proxy.
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let rpc = Arc::new(HttpRpc::new(client.clone(), config.rpc_config()));
    let reader = Reader::new(rpc, config.read_cache(), config.deployment());

    let pinning: Option<Arc<dyn PinningService>> = match &config.pinata_jwt {
        Some(jwt) => Some(Arc::new(PinataClient::new(
            client,
            config.pinata_endpoint.clone(),
            jwt.clone(),
        ))),
        None => {
            warn!("PINATA_JWT not set; uploads are disabled");
            None
        }
    };

    // ─── Session sweeper ──────────────────────────────────
    let sessions = SessionStore::new(config.session_ttl_secs);
    tokio::spawn(auth::run_sweeper(sessions.clone(), Duration::from_secs(60)));

    // ─── REST API ─────────────────────────────────────────
    let state = Arc::new(api::ApiState {
        pool,
        reader,
        pinning,
        sessions,
        admins: Arc::new(AllowListPolicy::new(config.admin_addresses.iter().copied())),
        siwe_domain: config.siwe_domain.clone(),
        max_projects: config.max_projects,
    });
    let app = router(state, config.max_upload_bytes);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
