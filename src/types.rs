//! Shared types for the ARBITER pipeline.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the strategy, decision,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Strategy id attached to trades that could not be attributed.
pub const UNKNOWN_STRATEGY: &str = "unknown";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Strategy / opportunity category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Arbitrage,
    FlashLoan,
    Mev,
    YieldFarming,
    Liquidation,
    Dca,
    GridTrading,
}

impl StrategyType {
    /// All known categories (useful for iteration).
    pub const ALL: &'static [StrategyType] = &[
        StrategyType::Arbitrage,
        StrategyType::FlashLoan,
        StrategyType::Mev,
        StrategyType::YieldFarming,
        StrategyType::Liquidation,
        StrategyType::Dca,
        StrategyType::GridTrading,
    ];
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyType::Arbitrage => write!(f, "Arbitrage"),
            StrategyType::FlashLoan => write!(f, "FlashLoan"),
            StrategyType::Mev => write!(f, "MEV"),
            StrategyType::YieldFarming => write!(f, "YieldFarming"),
            StrategyType::Liquidation => write!(f, "Liquidation"),
            StrategyType::Dca => write!(f, "DCA"),
            StrategyType::GridTrading => write!(f, "GridTrading"),
        }
    }
}

/// Attempt to parse a string into a StrategyType (case-insensitive).
impl std::str::FromStr for StrategyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "arbitrage" | "arb" => Ok(StrategyType::Arbitrage),
            "flashloan" => Ok(StrategyType::FlashLoan),
            "mev" => Ok(StrategyType::Mev),
            "yieldfarming" | "yield" => Ok(StrategyType::YieldFarming),
            "liquidation" => Ok(StrategyType::Liquidation),
            "dca" | "dollarcostaveraging" => Ok(StrategyType::Dca),
            "gridtrading" | "grid" => Ok(StrategyType::GridTrading),
            _ => Err(anyhow::anyhow!("Unknown strategy type: {s}")),
        }
    }
}

/// Coarse downside-exposure bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Decision engine verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Execute,
    Skip,
    Wait,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::Execute => write!(f, "EXECUTE"),
            Recommendation::Skip => write!(f, "SKIP"),
            Recommendation::Wait => write!(f, "WAIT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Running performance of a strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    /// Success rate as a percentage (0–100).
    pub success_rate: f64,
    pub total_trades: u64,
    pub total_profit_usd: f64,
}

/// A named, parameterised source of opportunities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub strategy_type: StrategyType,
    pub risk_level: RiskLevel,
    pub enabled: bool,
    /// Tie-break ordering: lower = higher priority.
    pub priority: u32,
    #[serde(default)]
    pub stats: StrategyStats,
    /// Strategy-specific parameters.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub last_executed: Option<DateTime<Utc>>,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} risk, {}) | trades={} success={:.1}% profit=${:.2}",
            self.strategy_type,
            self.name,
            self.risk_level,
            if self.enabled { "enabled" } else { "disabled" },
            self.stats.total_trades,
            self.stats.success_rate,
            self.stats.total_profit_usd,
        )
    }
}

impl Strategy {
    /// Create a strategy with empty stats and no parameters.
    pub fn new(
        id: &str,
        name: &str,
        strategy_type: StrategyType,
        risk_level: RiskLevel,
        priority: u32,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            strategy_type,
            risk_level,
            enabled: true,
            priority,
            stats: StrategyStats::default(),
            parameters: HashMap::new(),
            last_executed: None,
        }
    }

    /// Builder-style parameter setter.
    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// A candidate trade surfaced by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub strategy_type: StrategyType,
    pub token_a: String,
    pub token_b: String,
    pub venue_a: String,
    pub venue_b: String,
    pub price_a: f64,
    pub price_b: f64,
    /// Estimated profit in USD.
    pub profit_usd: f64,
    pub profit_pct: f64,
    /// Estimated gas/fee cost in USD.
    pub gas_estimate: f64,
    /// Source confidence (0–1).
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub loan_amount: Option<f64>,
    #[serde(default)]
    pub loan_protocol: Option<String>,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}/{} {}→{} profit=${:.2} ({:.2}%) gas=${:.2} conf={:.0}%",
            self.strategy_type,
            self.token_a,
            self.token_b,
            self.venue_a,
            self.venue_b,
            self.profit_usd,
            self.profit_pct,
            self.gas_estimate,
            self.confidence * 100.0,
        )
    }
}

impl Opportunity {
    /// Age of the opportunity relative to `now`. Never negative.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.created_at).max(chrono::Duration::zero())
    }

    /// Whether this opportunity carries a flash loan.
    pub fn is_flash_loan(&self) -> bool {
        self.loan_amount.is_some()
    }

    /// A copy carrying the decision engine's adjusted view. The original
    /// is left untouched.
    pub fn revised(&self, evaluation: &Evaluation) -> Self {
        Self {
            confidence: evaluation.confidence,
            profit_usd: evaluation.adjusted_profit,
            ..self.clone()
        }
    }

    /// Helper to build a test/sample opportunity with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        Opportunity {
            id: "opp-001".to_string(),
            strategy_type: StrategyType::Arbitrage,
            token_a: "WETH".to_string(),
            token_b: "USDC".to_string(),
            venue_a: "uniswap".to_string(),
            venue_b: "sushiswap".to_string(),
            price_a: 2000.0,
            price_b: 2010.0,
            profit_usd: 50.0,
            profit_pct: 0.5,
            gas_estimate: 5.0,
            confidence: 0.8,
            created_at: Utc::now(),
            loan_amount: None,
            loan_protocol: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// The decision engine's scored verdict on an opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub opportunity_id: String,
    pub confidence: f64,
    pub adjusted_profit: f64,
    pub risk_level: RiskLevel,
    pub recommendation: Recommendation,
    pub reasoning: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} | conf={:.0}% adj=${:.2} risk={}",
            self.recommendation,
            self.opportunity_id,
            self.confidence * 100.0,
            self.adjusted_profit,
            self.risk_level,
        )
    }
}

// ---------------------------------------------------------------------------
// Trade results & metrics
// ---------------------------------------------------------------------------

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub id: String,
    pub strategy_id: String,
    pub opportunity: Opportunity,
    pub success: bool,
    /// Realized profit in USD. Failed trades carry the realized loss (≤ 0).
    pub profit_usd: f64,
    pub gas_used: f64,
    pub reference: Option<String>,
    #[serde(with = "duration_ms")]
    pub execution_time: Duration,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} profit=${:.2} gas=${:.2} ({}ms)",
            self.strategy_id,
            if self.success { "OK" } else { "FAILED" },
            self.opportunity.id,
            self.profit_usd,
            self.gas_used,
            self.execution_time.as_millis(),
        )
    }
}

/// Running trade statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: u64,
    pub successful_trades: u64,
    pub failed_trades: u64,
    pub total_profit_usd: f64,
    pub total_loss_usd: f64,
    pub net_profit_usd: f64,
    /// Mean execution time over every recorded trade, in milliseconds.
    pub average_trade_time_ms: f64,
    /// Percentage (0–100).
    pub success_rate: f64,
    /// total profit / total loss; stays at its last value while loss is zero.
    pub profit_factor: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_trades: 0,
            successful_trades: 0,
            failed_trades: 0,
            total_profit_usd: 0.0,
            total_loss_usd: 0.0,
            net_profit_usd: 0.0,
            average_trade_time_ms: 0.0,
            success_rate: 0.0,
            profit_factor: 0.0,
            last_updated: Utc::now(),
        }
    }
}

impl fmt::Display for PerformanceMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trades={} (W{}/L{}) | success={:.1}% | net=${:.2} | pf={:.2} | avg={:.0}ms",
            self.total_trades,
            self.successful_trades,
            self.failed_trades,
            self.success_rate,
            self.net_profit_usd,
            self.profit_factor,
            self.average_trade_time_ms,
        )
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for ARBITER.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Opportunity source unavailable ({strategy_id}): {message}")]
    SourceUnavailable { strategy_id: String, message: String },

    #[error("Profit prediction unavailable: {0}")]
    PredictionUnavailable(String),

    #[error("Execution failed ({opportunity_id}): {message}")]
    ExecutionFailed { opportunity_id: String, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
