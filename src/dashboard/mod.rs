//! Dashboard: Axum web server for monitoring and controlling the engine.
//!
//! Serves a JSON REST API over the shared engine handle.
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use routes::AppState;

/// Bind the dashboard port and serve in a background task.
///
/// Binding happens before this returns, so a taken port is reported to
/// the caller instead of killing the task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/metrics", get(routes::get_metrics))
        .route("/api/metrics/reset", post(routes::reset_metrics))
        .route(
            "/api/strategies",
            get(routes::list_strategies).post(routes::register_strategy),
        )
        .route("/api/strategies/top", get(routes::top_strategies))
        .route("/api/strategies/:id/enabled", post(routes::set_strategy_enabled))
        .route("/api/trades", get(routes::get_trades))
        .route("/api/evaluate", post(routes::evaluate))
        .route("/api/engine/start", post(routes::start_engine))
        .route("/api/engine/stop", post(routes::stop_engine))
        .route("/api/engine/cycle", post(routes::run_cycle))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
