//! Dashboard API route handlers.
//!
//! All endpoints return JSON. Every handler goes through the shared
//! `Arc<Engine>`; nothing here holds state of its own.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::engine::{CycleReport, CyclePhase, Engine};
use crate::types::{
    Evaluation, Opportunity, PerformanceMetrics, RiskLevel, Strategy, StrategyType, TradeResult,
};

pub type AppState = Arc<Engine>;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

const DEFAULT_TRADE_LIMIT: usize = 100;
const DEFAULT_TOP_LIMIT: usize = 5;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn api_error(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: error.into() }))
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub running: bool,
    pub phase: CyclePhase,
    pub cycles_completed: u64,
    pub strategies: usize,
    pub enabled_strategies: usize,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Default, Deserialize)]
pub struct StrategyFilter {
    pub category: Option<StrategyType>,
    pub risk: Option<RiskLevel>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EnabledBody {
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/metrics
pub async fn get_metrics(State(engine): State<AppState>) -> Json<StatusResponse> {
    let store = engine.store();
    Json(StatusResponse {
        name: engine.config().engine.name.clone(),
        running: engine.is_running().await,
        phase: engine.phase(),
        cycles_completed: engine.cycles_completed(),
        strategies: store.len().await,
        enabled_strategies: store.list_enabled().await.len(),
        metrics: engine.metrics().await,
    })
}

/// POST /api/metrics/reset
pub async fn reset_metrics(State(engine): State<AppState>) -> Json<PerformanceMetrics> {
    engine.reset_metrics().await;
    Json(engine.metrics().await)
}

/// GET /api/strategies
pub async fn list_strategies(
    State(engine): State<AppState>,
    Query(filter): Query<StrategyFilter>,
) -> Json<Vec<Strategy>> {
    let store = engine.store();
    let mut strategies = match filter.category {
        Some(category) => store.list_by_category(category).await,
        None => store.list_all().await,
    };
    if let Some(risk) = filter.risk {
        strategies.retain(|s| s.risk_level == risk);
    }
    if let Some(enabled) = filter.enabled {
        strategies.retain(|s| s.enabled == enabled);
    }
    Json(strategies)
}

/// GET /api/strategies/top
pub async fn top_strategies(
    State(engine): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<Strategy>> {
    let limit = q.limit.unwrap_or(DEFAULT_TOP_LIMIT);
    Json(engine.store().top_performers(limit).await)
}

/// POST /api/strategies
pub async fn register_strategy(
    State(engine): State<AppState>,
    Json(strategy): Json<Strategy>,
) -> Result<(StatusCode, Json<Strategy>), (StatusCode, Json<ErrorResponse>)> {
    if strategy.id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "strategy id must not be empty"));
    }
    let id = strategy.id.clone();
    engine.register_strategy(strategy).await;
    info!(strategy = %id, "Strategy registered via API");

    match engine.store().get(&id).await {
        Some(stored) => Ok((StatusCode::CREATED, Json(stored))),
        None => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "strategy vanished after register")),
    }
}

/// POST /api/strategies/:id/enabled
pub async fn set_strategy_enabled(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EnabledBody>,
) -> ApiResult<Strategy> {
    if !engine.set_strategy_enabled(&id, body.enabled).await {
        return Err(api_error(StatusCode::NOT_FOUND, format!("unknown strategy: {id}")));
    }
    engine
        .store()
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown strategy: {id}")))
}

/// GET /api/trades
pub async fn get_trades(
    State(engine): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<TradeResult>> {
    let limit = q.limit.unwrap_or(DEFAULT_TRADE_LIMIT);
    Json(engine.recent_trades(limit).await)
}

/// POST /api/evaluate (scores without executing)
pub async fn evaluate(
    State(engine): State<AppState>,
    Json(opportunity): Json<Opportunity>,
) -> Json<Evaluation> {
    Json(engine.evaluate(&opportunity).await)
}

/// POST /api/engine/start
pub async fn start_engine(State(engine): State<AppState>) -> ApiResult<StatusResponse> {
    engine
        .start()
        .await
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    Ok(get_metrics(State(engine)).await)
}

/// POST /api/engine/stop
pub async fn stop_engine(State(engine): State<AppState>) -> Json<StatusResponse> {
    engine.stop().await;
    get_metrics(State(engine)).await
}

/// POST /api/engine/cycle (runs one cycle now)
pub async fn run_cycle(State(engine): State<AppState>) -> Json<CycleReport> {
    Json(engine.run_cycle().await)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
