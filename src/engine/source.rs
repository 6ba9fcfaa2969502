//! Opportunity sources.
//!
//! Defines the `OpportunitySource` trait the coordinator polls once per
//! enabled strategy per cycle, plus a deterministic replay source used in
//! paper mode.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::types::{EngineError, Opportunity, Strategy, StrategyType};

/// Abstraction over price feeds and strategy scanners.
///
/// Implementors return zero or more candidates for the given strategy.
/// A failure should be `SourceUnavailable`; the coordinator treats it as
/// "no opportunities this cycle" for that strategy only.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    async fn poll(&self, strategy: &Strategy) -> Result<Vec<Opportunity>, EngineError>;
}

// ---------------------------------------------------------------------------
// Replay source
// ---------------------------------------------------------------------------

/// An opportunity without identity or timestamp, re-stamped on each poll.
#[derive(Debug, Clone, Deserialize)]
pub struct OpportunityTemplate {
    pub strategy_type: StrategyType,
    pub token_a: String,
    pub token_b: String,
    pub venue_a: String,
    pub venue_b: String,
    pub price_a: f64,
    pub price_b: f64,
    pub profit_usd: f64,
    pub profit_pct: f64,
    pub gas_estimate: f64,
    pub confidence: f64,
    #[serde(default)]
    pub loan_amount: Option<f64>,
    #[serde(default)]
    pub loan_protocol: Option<String>,
}

impl OpportunityTemplate {
    fn stamp(&self) -> Opportunity {
        Opportunity {
            id: format!("opp-{}", uuid::Uuid::new_v4()),
            strategy_type: self.strategy_type,
            token_a: self.token_a.clone(),
            token_b: self.token_b.clone(),
            venue_a: self.venue_a.clone(),
            venue_b: self.venue_b.clone(),
            price_a: self.price_a,
            price_b: self.price_b,
            profit_usd: self.profit_usd,
            profit_pct: self.profit_pct,
            gas_estimate: self.gas_estimate,
            confidence: self.confidence,
            created_at: Utc::now(),
            loan_amount: self.loan_amount,
            loan_protocol: self.loan_protocol.clone(),
        }
    }
}

/// Deterministic source: every poll yields a fresh copy of each template
/// whose category matches the polled strategy.
pub struct FeedReplaySource {
    templates: Vec<OpportunityTemplate>,
}

impl FeedReplaySource {
    pub fn new(templates: Vec<OpportunityTemplate>) -> Self {
        Self { templates }
    }

    /// Load templates from a JSON array on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read opportunity feed {}", path.display()))?;
        let templates: Vec<OpportunityTemplate> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse opportunity feed {}", path.display()))?;
        info!(path = %path.display(), templates = templates.len(), "Opportunity feed loaded");
        Ok(Self::new(templates))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl OpportunitySource for FeedReplaySource {
    async fn poll(&self, strategy: &Strategy) -> Result<Vec<Opportunity>, EngineError> {
        let out: Vec<Opportunity> = self
            .templates
            .iter()
            .filter(|t| t.strategy_type == strategy.strategy_type)
            .map(OpportunityTemplate::stamp)
            .collect();
        debug!(strategy = %strategy.id, count = out.len(), "Replay feed polled");
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
