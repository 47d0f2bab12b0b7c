//! BINI Connect
//!
//! Partner-interaction session engine (heartbeat sync, synchro-beat ritual,
//! cooperative quests, serendipity bursts) behind a REST API, with SQLite as
//! the remote sync gateway.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod features;
mod gateway;
mod models;
mod session;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use session::heartbeat::SimulatedHeartRate;
use session::registry::SessionRegistry;
use session::SessionSettings;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting BINI Connect");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!(features = ?config.features, timings = ?config.timings, "Session settings");

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (BINI_API_PSK). Authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let gateway = Arc::new(Repository::new(pool).with_session_ttl(config.synchro_session_ttl));

    let registry = Arc::new(SessionRegistry::new(
        gateway,
        SessionSettings {
            flags: config.features.clone(),
            timings: config.timings,
            burst_limit: config.burst_limit,
        },
        Arc::new(SimulatedHeartRate::default()),
    ));

    // Create application state
    let state = AppState {
        registry: registry.clone(),
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        // Sessions
        .route("/sessions", post(api::login))
        .route(
            "/sessions/{user_id}",
            get(api::get_session).delete(api::logout),
        )
        // Heartbeat sync
        .route(
            "/sessions/{user_id}/heartbeat/start",
            post(api::start_heartbeat),
        )
        .route("/sessions/{user_id}/heartbeat/stop", post(api::stop_heartbeat))
        // Synchro-beat
        .route("/sessions/{user_id}/synchro/start", post(api::start_synchro))
        .route("/sessions/{user_id}/synchro/join", post(api::join_synchro))
        .route(
            "/sessions/{user_id}/synchro/restart",
            post(api::restart_synchro),
        )
        .route("/sessions/{user_id}/synchro/leave", post(api::leave_synchro))
        // Quests
        .route(
            "/sessions/{user_id}/quests",
            get(api::list_quests).post(api::create_quest),
        )
        .route(
            "/sessions/{user_id}/quests/{quest_id}/steps/{step_id}/complete",
            post(api::complete_quest_step),
        )
        // Bursts
        .route(
            "/sessions/{user_id}/bursts",
            get(api::list_bursts).post(api::send_burst),
        )
        .route(
            "/sessions/{user_id}/bursts/{burst_id}/read",
            post(api::mark_burst_read),
        )
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
