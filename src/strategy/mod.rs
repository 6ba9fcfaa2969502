//! Strategy layer: the strategy registry plus decision scoring and risk gating.

pub mod decision;
pub mod risk;

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::types::{RiskLevel, Strategy, StrategyType};

// ---------------------------------------------------------------------------
// Built-in strategies
// ---------------------------------------------------------------------------

/// The strategies seeded at registry initialisation, one per category.
/// Arbitrage, flash-loan and DCA start enabled; the rest must be opted into.
pub fn default_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new("arbitrage", "Cross-DEX Arbitrage", StrategyType::Arbitrage, RiskLevel::Low, 1)
            .with_param("min_profit_usd", json!(10.0))
            .with_param("max_slippage_pct", json!(0.5))
            .with_param("venues", json!(["uniswap", "sushiswap", "curve"])),
        Strategy::new("flash_loan", "Flash Loan Arbitrage", StrategyType::FlashLoan, RiskLevel::Medium, 2)
            .with_param("providers", json!(["aave", "balancer", "dydx"]))
            .with_param("max_loan_usd", json!(1_000_000.0))
            .with_param("min_profit_usd", json!(50.0)),
        Strategy::new("mev", "MEV Backrun", StrategyType::Mev, RiskLevel::High, 3)
            .with_param("max_gas_usd", json!(100.0))
            .with_param("bundle_only", json!(true))
            .disabled(),
        Strategy::new("yield_farming", "Yield Rotation", StrategyType::YieldFarming, RiskLevel::Medium, 4)
            .with_param("target_apy_pct", json!(8.0))
            .with_param("rebalance_threshold_pct", json!(2.0))
            .disabled(),
        Strategy::new("liquidation", "Liquidation Hunter", StrategyType::Liquidation, RiskLevel::High, 5)
            .with_param("health_factor_threshold", json!(1.05))
            .with_param("protocols", json!(["aave", "compound"]))
            .disabled(),
        Strategy::new("dca", "Dollar-Cost Averaging", StrategyType::Dca, RiskLevel::Low, 6)
            .with_param("interval_secs", json!(3600))
            .with_param("amount_usd", json!(100.0)),
        Strategy::new("grid", "Grid Trading", StrategyType::GridTrading, RiskLevel::Medium, 7)
            .with_param("levels", json!(10))
            .with_param("spacing_pct", json!(1.0))
            .disabled(),
    ]
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    /// Insertion order of ids.
    order: Vec<String>,
    strategies: HashMap<String, Arc<Mutex<Strategy>>>,
}

/// Registry of strategy definitions and their running performance.
///
/// Each strategy sits behind its own lock, so outcomes for different
/// strategies are recorded concurrently while updates to one strategy
/// serialise. The outer lock is only held for membership changes.
#[derive(Default)]
pub struct StrategyStore {
    inner: RwLock<StoreInner>,
}

impl StrategyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with [`default_strategies`].
    pub fn with_defaults() -> Self {
        Self::from_strategies(default_strategies())
    }

    /// Build a store from a list of strategies. Later duplicates overwrite
    /// earlier ones but keep the first insertion position.
    pub fn from_strategies(strategies: Vec<Strategy>) -> Self {
        let mut inner = StoreInner::default();
        for strategy in strategies {
            Self::insert(&mut inner, strategy);
        }
        Self { inner: RwLock::new(inner) }
    }

    fn insert(inner: &mut StoreInner, strategy: Strategy) {
        let id = strategy.id.clone();
        if inner.strategies.insert(id.clone(), Arc::new(Mutex::new(strategy))).is_none() {
            inner.order.push(id);
        }
    }

    /// Insert or overwrite a strategy by id.
    pub async fn register(&self, strategy: Strategy) {
        info!(
            id = %strategy.id,
            strategy_type = %strategy.strategy_type,
            enabled = strategy.enabled,
            "Strategy registered"
        );
        let mut inner = self.inner.write().await;
        Self::insert(&mut inner, strategy);
    }

    /// Enable or disable a strategy. Unknown ids are ignored; returns
    /// whether a strategy was found.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let Some(entry) = self.entry(id).await else {
            debug!(id, "set_enabled on unknown strategy ignored");
            return false;
        };
        let mut strategy = entry.lock().await;
        if strategy.enabled != enabled {
            info!(id, enabled, "Strategy toggled");
        }
        strategy.enabled = enabled;
        true
    }

    pub async fn get(&self, id: &str) -> Option<Strategy> {
        match self.entry(id).await {
            Some(entry) => Some(entry.lock().await.clone()),
            None => None,
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.strategies.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn list_all(&self) -> Vec<Strategy> {
        self.filtered(|_| true).await
    }

    pub async fn list_enabled(&self) -> Vec<Strategy> {
        self.filtered(|s| s.enabled).await
    }

    pub async fn list_by_category(&self, category: StrategyType) -> Vec<Strategy> {
        self.filtered(|s| s.strategy_type == category).await
    }

    pub async fn list_by_risk(&self, risk: RiskLevel) -> Vec<Strategy> {
        self.filtered(|s| s.risk_level == risk).await
    }

    /// Highest total profit first; ties go to the lower priority number.
    pub async fn top_performers(&self, limit: usize) -> Vec<Strategy> {
        let mut all = self.list_all().await;
        all.sort_by(|a, b| {
            b.stats
                .total_profit_usd
                .partial_cmp(&a.stats.total_profit_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.priority.cmp(&b.priority))
        });
        all.truncate(limit);
        all
    }

    /// Fold one trade outcome into a strategy's running stats.
    ///
    /// The success rate is an incremental average over the post-increment
    /// trade count. Returns false (and changes nothing) for unknown ids.
    pub async fn record_outcome(&self, id: &str, success: bool, profit_delta: f64) -> bool {
        let Some(entry) = self.entry(id).await else {
            return false;
        };
        let mut strategy = entry.lock().await;
        let stats = &mut strategy.stats;
        stats.total_trades += 1;
        let n = stats.total_trades as f64;
        let hit = if success { 100.0 } else { 0.0 };
        stats.success_rate = (stats.success_rate * (n - 1.0) + hit) / n;
        stats.total_profit_usd += profit_delta;
        strategy.last_executed = Some(Utc::now());

        debug!(
            id,
            success,
            profit_delta,
            trades = strategy.stats.total_trades,
            success_rate = format!("{:.1}%", strategy.stats.success_rate),
            "Strategy outcome recorded"
        );
        true
    }

    async fn entry(&self, id: &str) -> Option<Arc<Mutex<Strategy>>> {
        self.inner.read().await.strategies.get(id).cloned()
    }

    async fn filtered<F>(&self, keep: F) -> Vec<Strategy>
    where
        F: Fn(&Strategy) -> bool,
    {
        let entries: Vec<Arc<Mutex<Strategy>>> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .filter_map(|id| inner.strategies.get(id).cloned())
                .collect()
        };

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let strategy = entry.lock().await;
            if keep(&strategy) {
                out.push(strategy.clone());
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
