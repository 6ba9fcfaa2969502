//! Opportunity scoring.
//!
//! Turns a raw opportunity into an [`Evaluation`]: an adjusted confidence
//! and profit, a risk tier, and an execute / wait / skip verdict. The
//! adjustments run in a fixed order because later steps read the running
//! confidence value.

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use futures::FutureExt;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::types::{
    panic_message, EngineError, Evaluation, Opportunity, Recommendation, RiskLevel,
};

/// predicted / stated profit above this nudges confidence up.
const UPWARD_SIGNAL_RATIO: f64 = 1.2;
/// predicted / stated profit below this nudges confidence down.
const DOWNWARD_SIGNAL_RATIO: f64 = 0.8;
const PREDICTOR_CONFIDENCE_STEP: f64 = 0.1;
const MIN_MARKET_MULTIPLIER: f64 = 0.1;
const MAX_MARKET_MULTIPLIER: f64 = 2.0;

// ---------------------------------------------------------------------------
// Profit predictor
// ---------------------------------------------------------------------------

/// External model that predicts the realizable profit of an opportunity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfitPredictor: Send + Sync {
    /// Predicted profit in USD. Failures should be `PredictionUnavailable`.
    async fn predict(&self, opportunity: &Opportunity) -> Result<f64, EngineError>;
}

// ---------------------------------------------------------------------------
// Configuration (defaults, overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

/// Decision thresholds. The bucket boundaries and multipliers are tuning
/// defaults, not derived values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Minimum confidence for an EXECUTE verdict.
    pub confidence_threshold: f64,
    /// Adjusted profit must exceed this for EXECUTE; below half of it is SKIP.
    pub min_profit_usd: f64,
    /// Business-hours window in UTC hours, `[start, end)`. Wraps past midnight
    /// when start > end.
    pub business_hours_start: u32,
    pub business_hours_end: u32,
    pub business_hours_factor: f64,
    pub off_hours_factor: f64,
    /// Profit above this scales confidence by `high_profit_factor`.
    pub boost_profit_usd: f64,
    pub high_profit_factor: f64,
    /// Profit below this scales confidence by `low_profit_factor`.
    pub penalty_profit_usd: f64,
    pub low_profit_factor: f64,
    pub risk_profit_high_usd: f64,
    pub risk_profit_medium_usd: f64,
    pub risk_gas_high_usd: f64,
    pub risk_gas_medium_usd: f64,
    pub risk_confidence_low: f64,
    pub risk_confidence_medium: f64,
    pub risk_age_long_secs: f64,
    pub risk_age_medium_secs: f64,
    /// Gas spend (USD) considered normal; only the excess is charged.
    pub optimal_gas_usd: f64,
    pub gas_price_conversion: f64,
    /// HIGH-risk opportunities need at least this confidence to execute.
    pub high_risk_min_confidence: f64,
    /// Below this confidence an opportunity is skipped outright.
    pub skip_confidence: f64,
    /// Evaluations remembered per opportunity id (oldest evicted first).
    pub history_capacity: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            min_profit_usd: 10.0,
            business_hours_start: 9,
            business_hours_end: 17,
            business_hours_factor: 1.1,
            off_hours_factor: 0.9,
            boost_profit_usd: 100.0,
            high_profit_factor: 1.2,
            penalty_profit_usd: 10.0,
            low_profit_factor: 0.8,
            risk_profit_high_usd: 1_000.0,
            risk_profit_medium_usd: 100.0,
            risk_gas_high_usd: 50.0,
            risk_gas_medium_usd: 20.0,
            risk_confidence_low: 0.5,
            risk_confidence_medium: 0.7,
            risk_age_long_secs: 30.0,
            risk_age_medium_secs: 10.0,
            optimal_gas_usd: 5.0,
            gas_price_conversion: 1.0,
            high_risk_min_confidence: 0.9,
            skip_confidence: 0.3,
            history_capacity: 1_000,
        }
    }
}

impl DecisionConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::ConfigurationInvalid(msg));

        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("high_risk_min_confidence", self.high_risk_min_confidence),
            ("skip_confidence", self.skip_confidence),
            ("risk_confidence_low", self.risk_confidence_low),
            ("risk_confidence_medium", self.risk_confidence_medium),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("decision.{name} must be within [0, 1], got {value}"));
            }
        }

        for (name, value) in [
            ("min_profit_usd", self.min_profit_usd),
            ("boost_profit_usd", self.boost_profit_usd),
            ("penalty_profit_usd", self.penalty_profit_usd),
            ("risk_profit_high_usd", self.risk_profit_high_usd),
            ("risk_profit_medium_usd", self.risk_profit_medium_usd),
            ("risk_gas_high_usd", self.risk_gas_high_usd),
            ("risk_gas_medium_usd", self.risk_gas_medium_usd),
            ("risk_age_long_secs", self.risk_age_long_secs),
            ("risk_age_medium_secs", self.risk_age_medium_secs),
            ("optimal_gas_usd", self.optimal_gas_usd),
            ("gas_price_conversion", self.gas_price_conversion),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("decision.{name} must be a non-negative number, got {value}"));
            }
        }

        for (name, value) in [
            ("business_hours_factor", self.business_hours_factor),
            ("off_hours_factor", self.off_hours_factor),
            ("high_profit_factor", self.high_profit_factor),
            ("low_profit_factor", self.low_profit_factor),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("decision.{name} must be > 0, got {value}"));
            }
        }

        if self.business_hours_start > 23 || self.business_hours_end > 24 {
            return invalid(format!(
                "decision.business_hours window {}..{} is not a valid UTC hour range",
                self.business_hours_start, self.business_hours_end
            ));
        }
        if self.risk_profit_medium_usd > self.risk_profit_high_usd
            || self.risk_gas_medium_usd > self.risk_gas_high_usd
            || self.risk_age_medium_secs > self.risk_age_long_secs
            || self.risk_confidence_low > self.risk_confidence_medium
        {
            return invalid("decision risk buckets must be ordered medium <= high".into());
        }
        if self.history_capacity == 0 {
            return invalid("decision.history_capacity must be > 0".into());
        }
        Ok(())
    }

    /// Whether `hour` (UTC) falls inside the business-hours window.
    pub fn is_business_hour(&self, hour: u32) -> bool {
        let (start, end) = (self.business_hours_start, self.business_hours_end);
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

// ---------------------------------------------------------------------------
// Recommendation rule
// ---------------------------------------------------------------------------

/// The verdict as a pure function of the scored values and thresholds.
pub fn recommend(
    confidence: f64,
    risk: RiskLevel,
    adjusted_profit: f64,
    config: &DecisionConfig,
) -> Recommendation {
    if confidence >= config.confidence_threshold && adjusted_profit > config.min_profit_usd {
        if risk == RiskLevel::High && confidence < config.high_risk_min_confidence {
            Recommendation::Wait
        } else {
            Recommendation::Execute
        }
    } else if adjusted_profit < config.min_profit_usd / 2.0 || confidence < config.skip_confidence {
        Recommendation::Skip
    } else {
        Recommendation::Wait
    }
}

// ---------------------------------------------------------------------------
// Evaluation history
// ---------------------------------------------------------------------------

/// Most recent evaluation per opportunity id, capped in size. Re-evaluating
/// an id moves it to the back of the eviction queue.
struct EvaluationHistory {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Evaluation>,
}

impl EvaluationHistory {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, evaluation: Evaluation) {
        let id = evaluation.opportunity_id.clone();
        if self.entries.insert(id.clone(), evaluation).is_some() {
            self.order.retain(|existing| existing != &id);
        }
        self.order.push_back(id);

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Decision engine
// ---------------------------------------------------------------------------

pub struct DecisionEngine {
    config: DecisionConfig,
    predictor: Option<Arc<dyn ProfitPredictor>>,
    history: Mutex<EvaluationHistory>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        let history = Mutex::new(EvaluationHistory::new(config.history_capacity));
        Self {
            config,
            predictor: None,
            history,
        }
    }

    /// Attach an external profit predictor.
    pub fn with_predictor(mut self, predictor: Arc<dyn ProfitPredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Score an opportunity against the current wall clock.
    pub async fn evaluate(&self, opportunity: &Opportunity) -> Evaluation {
        self.evaluate_at(opportunity, Utc::now()).await
    }

    /// Score an opportunity as of `now` (drives the business-hours and age
    /// checks).
    pub async fn evaluate_at(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> Evaluation {
        let mut reasoning = Vec::new();

        // 1. Starting point
        let mut confidence = opportunity.confidence;
        let mut adjusted_profit = opportunity.profit_usd;

        // 2. External profit prediction
        if let Some(predictor) = &self.predictor {
            let prediction = AssertUnwindSafe(async { predictor.predict(opportunity).await })
                .catch_unwind()
                .await;
            match prediction {
                Ok(Ok(predicted)) if predicted.is_finite() => {
                    if opportunity.profit_usd > 0.0 {
                        let ratio = predicted / opportunity.profit_usd;
                        if ratio > UPWARD_SIGNAL_RATIO {
                            confidence += PREDICTOR_CONFIDENCE_STEP;
                            reasoning.push(format!(
                                "Predictor signal up: ${predicted:.2} is {ratio:.2}x the stated profit"
                            ));
                        } else if ratio < DOWNWARD_SIGNAL_RATIO {
                            confidence -= PREDICTOR_CONFIDENCE_STEP;
                            reasoning.push(format!(
                                "Predictor signal down: ${predicted:.2} is {ratio:.2}x the stated profit"
                            ));
                        }
                    }
                    adjusted_profit = predicted;
                    reasoning.push(format!("Profit set to predicted ${predicted:.2}"));
                }
                Ok(Ok(predicted)) => {
                    warn!(opportunity_id = %opportunity.id, predicted, "Predictor returned a non-finite profit");
                    reasoning.push("Prediction unavailable (non-finite); using stated profit".to_string());
                }
                Ok(Err(e)) => {
                    warn!(opportunity_id = %opportunity.id, error = %e, "Profit prediction failed");
                    reasoning.push(format!("Prediction unavailable ({e}); using stated profit"));
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(opportunity_id = %opportunity.id, error = %message, "Profit predictor panicked");
                    reasoning.push(format!("Prediction unavailable (predictor panicked: {message}); using stated profit"));
                }
            }
        }

        // 3. Market conditions
        let multiplier = self.market_multiplier(opportunity, now);
        confidence *= multiplier;
        reasoning.push(format!("Market condition multiplier {multiplier:.2}"));

        // 4. Risk tier
        let (risk_level, risk_score) = self.assess_risk(opportunity, confidence, now);
        reasoning.push(format!("Risk {risk_level} (score {risk_score})"));

        // 5. Gas optimisation
        let excess_gas = (opportunity.gas_estimate - self.config.optimal_gas_usd).max(0.0);
        if excess_gas > 0.0 {
            let penalty = excess_gas * self.config.gas_price_conversion;
            adjusted_profit -= penalty;
            reasoning.push(format!("Gas above optimal, profit reduced by ${penalty:.2}"));
        }

        // 6. Clamp
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        // 7. Verdict
        let recommendation = recommend(confidence, risk_level, adjusted_profit, &self.config);
        reasoning.push(format!(
            "{recommendation}: confidence {:.0}% vs threshold {:.0}%, profit ${adjusted_profit:.2} vs min ${:.2}",
            confidence * 100.0,
            self.config.confidence_threshold * 100.0,
            self.config.min_profit_usd,
        ));

        let evaluation = Evaluation {
            opportunity_id: opportunity.id.clone(),
            confidence,
            adjusted_profit,
            risk_level,
            recommendation,
            reasoning,
            evaluated_at: now,
        };

        debug!(
            opportunity_id = %opportunity.id,
            confidence = format!("{:.2}", confidence),
            adjusted_profit = format!("${:.2}", adjusted_profit),
            risk = %risk_level,
            recommendation = %recommendation,
            "Opportunity evaluated"
        );

        self.history.lock().await.insert(evaluation.clone());
        evaluation
    }

    /// Last evaluation for an opportunity id, if still retained.
    pub async fn history(&self, opportunity_id: &str) -> Option<Evaluation> {
        self.history.lock().await.entries.get(opportunity_id).cloned()
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.entries.len()
    }

    /// Confidence multiplier from time of day and profit magnitude.
    fn market_multiplier(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> f64 {
        let cfg = &self.config;
        let mut multiplier = if cfg.is_business_hour(now.hour()) {
            cfg.business_hours_factor
        } else {
            cfg.off_hours_factor
        };

        if opportunity.profit_usd > cfg.boost_profit_usd {
            multiplier *= cfg.high_profit_factor;
        } else if opportunity.profit_usd < cfg.penalty_profit_usd {
            multiplier *= cfg.low_profit_factor;
        }

        multiplier.clamp(MIN_MARKET_MULTIPLIER, MAX_MARKET_MULTIPLIER)
    }

    /// Additive risk score over profit, gas, confidence and age buckets.
    fn assess_risk(
        &self,
        opportunity: &Opportunity,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> (RiskLevel, u32) {
        let cfg = &self.config;
        let mut score = 0;

        if opportunity.profit_usd > cfg.risk_profit_high_usd {
            score += 2;
        } else if opportunity.profit_usd > cfg.risk_profit_medium_usd {
            score += 1;
        }

        if opportunity.gas_estimate > cfg.risk_gas_high_usd {
            score += 2;
        } else if opportunity.gas_estimate > cfg.risk_gas_medium_usd {
            score += 1;
        }

        if confidence < cfg.risk_confidence_low {
            score += 2;
        } else if confidence < cfg.risk_confidence_medium {
            score += 1;
        }

        let age_secs = opportunity.age_at(now).num_milliseconds() as f64 / 1000.0;
        if age_secs > cfg.risk_age_long_secs {
            score += 2;
        } else if age_secs > cfg.risk_age_medium_secs {
            score += 1;
        }

        let level = match score {
            s if s >= 4 => RiskLevel::High,
            s if s >= 2 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        };
        (level, score)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
