//! Running trade statistics.
//!
//! Folds every trade result into a single [`PerformanceMetrics`] aggregate
//! and keeps a bounded trade history for inspection.

use chrono::Utc;
use std::collections::VecDeque;
use tracing::info;

use crate::types::{PerformanceMetrics, TradeResult};

pub struct MetricsAggregator {
    metrics: PerformanceMetrics,
    history: VecDeque<TradeResult>,
    history_capacity: usize,
}

impl MetricsAggregator {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            metrics: PerformanceMetrics::default(),
            history: VecDeque::new(),
            history_capacity: history_capacity.max(1),
        }
    }

    /// Fold one trade result into the aggregate.
    pub fn record(&mut self, result: &TradeResult) {
        let m = &mut self.metrics;
        m.total_trades += 1;

        if result.success {
            m.successful_trades += 1;
            m.total_profit_usd += result.profit_usd;
        } else {
            m.failed_trades += 1;
            m.total_loss_usd += result.profit_usd.abs();
        }

        m.net_profit_usd = m.total_profit_usd - m.total_loss_usd;
        m.success_rate = m.successful_trades as f64 / m.total_trades as f64 * 100.0;
        if m.total_loss_usd > 0.0 {
            m.profit_factor = m.total_profit_usd / m.total_loss_usd;
        }

        // Running mean over every trade, independent of the history cap.
        let elapsed_ms = result.execution_time.as_secs_f64() * 1000.0;
        let n = m.total_trades as f64;
        m.average_trade_time_ms += (elapsed_ms - m.average_trade_time_ms) / n;
        m.last_updated = Utc::now();

        self.history.push_back(result.clone());
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
    }

    /// Zero every counter and clear the trade history.
    pub fn reset(&mut self) {
        info!(
            trades = self.metrics.total_trades,
            net = format!("${:.2}", self.metrics.net_profit_usd),
            "Performance metrics reset"
        );
        self.metrics = PerformanceMetrics::default();
        self.history.clear();
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        self.metrics.clone()
    }

    /// The `n` most recent trades, newest first.
    pub fn recent(&self, n: usize) -> Vec<TradeResult> {
        self.history.iter().rev().take(n).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
