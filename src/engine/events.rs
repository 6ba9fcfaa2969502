//! Outbound engine events.
//!
//! Events go out over a bounded `tokio::sync::broadcast` channel. The
//! emitter never blocks: a subscriber that falls behind loses the oldest
//! events and sees `RecvError::Lagged` with the number skipped. Delivery
//! order is emission order, and trades are emitted in recording order.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::types::{PerformanceMetrics, TradeResult};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    EngineStarted,
    EngineStopped,
    TradeExecuted(TradeResult),
    PerformanceUpdate(PerformanceMetrics),
    SourceFailed { strategy_id: String, error: String },
    CycleFailed { cycle: u64, error: String },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::EngineStarted => "engine_started",
            EngineEvent::EngineStopped => "engine_stopped",
            EngineEvent::TradeExecuted(_) => "trade_executed",
            EngineEvent::PerformanceUpdate(_) => "performance_update",
            EngineEvent::SourceFailed { .. } => "source_failed",
            EngineEvent::CycleFailed { .. } => "cycle_failed",
        }
    }
}

/// Drain a subscription into the log until the channel closes.
pub async fn log_events(mut rx: broadcast::Receiver<EngineEvent>) {
    loop {
        match rx.recv().await {
            Ok(EngineEvent::TradeExecuted(trade)) => {
                info!(
                    strategy = %trade.strategy_id,
                    opportunity_id = %trade.opportunity.id,
                    success = trade.success,
                    profit = format!("${:.2}", trade.profit_usd),
                    elapsed_ms = trade.execution_time.as_millis() as u64,
                    "Trade executed"
                );
            }
            Ok(EngineEvent::PerformanceUpdate(m)) => {
                info!(
                    trades = m.total_trades,
                    success_rate = format!("{:.1}%", m.success_rate),
                    net = format!("${:.2}", m.net_profit_usd),
                    profit_factor = format!("{:.2}", m.profit_factor),
                    "Performance update"
                );
            }
            Ok(EngineEvent::CycleFailed { cycle, error }) => {
                error!(cycle, error = %error, "Cycle failed");
            }
            Ok(event) => info!(event = event.name(), "Engine event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger fell behind; oldest events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
