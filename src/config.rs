//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults so a partial file (or none of a section)
//! is accepted; `validate` rejects malformed values before the engine
//! is allowed to start.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::strategy::decision::DecisionConfig;
use crate::strategy::risk::RiskLimits;
use crate::types::EngineError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

/// Scheduling and buffering for the execution coordinator.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub name: String,
    /// Spacing between trading cycles.
    pub cycle_interval_ms: u64,
    /// Spacing between `PerformanceUpdate` events.
    pub performance_interval_ms: u64,
    /// Broadcast channel capacity. Slow subscribers lose the oldest events.
    pub event_buffer: usize,
    /// Trade results kept in memory (oldest dropped first).
    pub trade_history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "ARBITER-001".to_string(),
            cycle_interval_ms: 1_000,
            performance_interval_ms: 10_000,
            event_buffer: 256,
            trade_history_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn performance_interval(&self) -> Duration {
        Duration::from_millis(self.performance_interval_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.cycle_interval_ms == 0 {
            return Err(EngineError::ConfigurationInvalid(
                "engine.cycle_interval_ms must be > 0".into(),
            ));
        }
        if self.performance_interval_ms == 0 {
            return Err(EngineError::ConfigurationInvalid(
                "engine.performance_interval_ms must be > 0".into(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(EngineError::ConfigurationInvalid(
                "engine.event_buffer must be > 0".into(),
            ));
        }
        if self.trade_history_capacity == 0 {
            return Err(EngineError::ConfigurationInvalid(
                "engine.trade_history_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: true, port: 8080 }
    }
}

/// Opportunity templates replayed by the paper-mode source.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub path: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { path: "data/opportunities.json".to_string() }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load configuration, falling back to the defaults when the file does
    /// not exist. A file that exists but cannot be read or parsed is still
    /// an error.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            warn!(path, "Config file not found; using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Check every section; the first malformed value wins.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.engine.validate()?;
        self.decision.validate()?;
        self.risk.validate()?;
        Ok(())
    }
}
