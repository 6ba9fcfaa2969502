//! Scripted collaborators for integration testing.
//!
//! Deterministic `OpportunitySource`, `ExecutionBackend` and
//! `ProfitPredictor` implementations. Everything is in-memory and
//! controllable from test code.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use arbiter::config::AppConfig;
use arbiter::engine::executor::{ExecutionBackend, ExecutionOutcome};
use arbiter::engine::source::OpportunitySource;
use arbiter::strategy::decision::ProfitPredictor;
use arbiter::types::*;

/// Config with short intervals and the time-of-day factor neutralised.
pub fn fast_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.engine.cycle_interval_ms = 20;
    cfg.engine.performance_interval_ms = 50;
    cfg.decision.business_hours_factor = 1.0;
    cfg.decision.off_hours_factor = 1.0;
    cfg
}

pub fn strategy(id: &str, priority: u32) -> Strategy {
    Strategy::new(id, &id.to_uppercase(), StrategyType::Arbitrage, RiskLevel::Low, priority)
}

/// A fresh arbitrage opportunity with $2 gas.
pub fn opportunity(id: &str, profit_usd: f64, confidence: f64) -> Opportunity {
    Opportunity {
        id: id.to_string(),
        strategy_type: StrategyType::Arbitrage,
        token_a: "WETH".into(),
        token_b: "USDC".into(),
        venue_a: "uniswap".into(),
        venue_b: "sushiswap".into(),
        price_a: 2000.0,
        price_b: 2000.0 + profit_usd / 10.0,
        profit_usd,
        profit_pct: profit_usd / 20.0,
        gas_estimate: 2.0,
        confidence,
        created_at: Utc::now(),
        loan_amount: None,
        loan_protocol: None,
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Returns a fixed list of opportunities per strategy id, optionally
/// after a delay. Tracks how many polls overlap.
#[derive(Default)]
pub struct ScriptedSource {
    feeds: Mutex<HashMap<String, Vec<Opportunity>>>,
    failing: Mutex<HashSet<String>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    polls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn feed(self, strategy_id: &str, opportunities: Vec<Opportunity>) -> Self {
        self.feeds
            .lock()
            .unwrap()
            .insert(strategy_id.to_string(), opportunities);
        self
    }

    /// Every poll for this strategy fails with `SourceUnavailable`.
    pub fn failing(self, strategy_id: &str) -> Self {
        self.failing.lock().unwrap().insert(strategy_id.to_string());
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpportunitySource for ScriptedSource {
    async fn poll(&self, strategy: &Strategy) -> Result<Vec<Opportunity>, EngineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.polls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&strategy.id) {
            return Err(EngineError::SourceUnavailable {
                strategy_id: strategy.id.clone(),
                message: "scripted outage".into(),
            });
        }

        let feed = self
            .feeds
            .lock()
            .unwrap()
            .get(&strategy.id)
            .cloned()
            .unwrap_or_default();
        Ok(feed
            .into_iter()
            .map(|o| Opportunity { created_at: Utc::now(), ..o })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Fills at stated profit minus gas unless an outcome or a panic is
/// scripted for the opportunity id. Records submission order.
#[derive(Default)]
pub struct ScriptedBackend {
    outcomes: Mutex<HashMap<String, Result<ExecutionOutcome, String>>>,
    panicking: Mutex<HashSet<String>>,
    submitted: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcome(self, opportunity_id: &str, outcome: ExecutionOutcome) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(opportunity_id.to_string(), Ok(outcome));
        self
    }

    pub fn error(self, opportunity_id: &str, message: &str) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(opportunity_id.to_string(), Err(message.to_string()));
        self
    }

    /// Submitting this opportunity panics inside the backend.
    pub fn panicking(self, opportunity_id: &str) -> Self {
        self.panicking.lock().unwrap().insert(opportunity_id.to_string());
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn execute(&self, opportunity: &Opportunity) -> Result<ExecutionOutcome, EngineError> {
        self.submitted.lock().unwrap().push(opportunity.id.clone());
        // Guards are released before panicking so the mutexes stay usable.
        let panics = self.panicking.lock().unwrap().contains(&opportunity.id);
        if panics {
            panic!("scripted backend crash on {}", opportunity.id);
        }
        match self.outcomes.lock().unwrap().get(&opportunity.id) {
            Some(Ok(outcome)) => Ok(outcome.clone()),
            Some(Err(message)) => Err(EngineError::ExecutionFailed {
                opportunity_id: opportunity.id.clone(),
                message: message.clone(),
            }),
            None => Ok(ExecutionOutcome {
                success: true,
                profit_usd: opportunity.profit_usd - opportunity.gas_estimate,
                fee_usd: opportunity.gas_estimate,
                reference: Some(format!("sim-{}", opportunity.id)),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

/// Predicts a fixed profit, or fails every call. Can also panic for one
/// opportunity id.
pub struct ScriptedPredictor {
    prediction: Result<f64, String>,
    panics_on: Option<String>,
}

impl ScriptedPredictor {
    pub fn predicting(profit_usd: f64) -> Self {
        Self { prediction: Ok(profit_usd), panics_on: None }
    }

    pub fn offline() -> Self {
        Self { prediction: Err("model offline".into()), panics_on: None }
    }

    pub fn panicking_on(mut self, opportunity_id: &str) -> Self {
        self.panics_on = Some(opportunity_id.to_string());
        self
    }
}

#[async_trait]
impl ProfitPredictor for ScriptedPredictor {
    async fn predict(&self, opportunity: &Opportunity) -> Result<f64, EngineError> {
        if self.panics_on.as_deref() == Some(opportunity.id.as_str()) {
            panic!("scripted predictor crash on {}", opportunity.id);
        }
        self.prediction
            .clone()
            .map_err(EngineError::PredictionUnavailable)
    }
}
