//! Risk gate.
//!
//! Last check before execution: caps the size of any single position and
//! halts trading once cumulative losses pass the configured limit.

use serde::Deserialize;
use std::fmt;

use crate::types::{EngineError, Opportunity, PerformanceMetrics};

/// Risk limits (defaults, overridden by config.toml at runtime).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// When false, every opportunity is permitted.
    pub enabled: bool,
    /// Maximum position size in the base asset (ETH).
    pub max_position_size: f64,
    /// USD price of one unit of the base asset.
    pub reference_price_usd: f64,
    /// Trading halts once cumulative loss exceeds this.
    pub max_daily_loss_usd: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            enabled: true,
            max_position_size: 1.0,
            reference_price_usd: 2_000.0,
            max_daily_loss_usd: 500.0,
        }
    }
}

impl RiskLimits {
    /// Position cap expressed in USD.
    pub fn max_position_usd(&self) -> f64 {
        self.max_position_size * self.reference_price_usd
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.max_position_size.is_finite() || self.max_position_size < 0.0 {
            return Err(EngineError::ConfigurationInvalid(format!(
                "risk.max_position_size must be non-negative, got {}",
                self.max_position_size
            )));
        }
        if !self.reference_price_usd.is_finite() || self.reference_price_usd <= 0.0 {
            return Err(EngineError::ConfigurationInvalid(format!(
                "risk.reference_price_usd must be > 0, got {}",
                self.reference_price_usd
            )));
        }
        if !self.max_daily_loss_usd.is_finite() || self.max_daily_loss_usd < 0.0 {
            return Err(EngineError::ConfigurationInvalid(format!(
                "risk.max_daily_loss_usd must be non-negative, got {}",
                self.max_daily_loss_usd
            )));
        }
        Ok(())
    }
}

/// Why the gate refused an opportunity.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    PositionTooLarge { profit_usd: f64, max_usd: f64 },
    DailyLossExceeded { loss_usd: f64, max_usd: f64 },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::PositionTooLarge { profit_usd, max_usd } => {
                write!(f, "position ${profit_usd:.2} exceeds cap ${max_usd:.2}")
            }
            RejectionReason::DailyLossExceeded { loss_usd, max_usd } => {
                write!(f, "loss ${loss_usd:.2} exceeds daily limit ${max_usd:.2}")
            }
        }
    }
}

/// Side-effect-free predicate over an opportunity and the current metrics.
#[derive(Debug, Clone)]
pub struct RiskGate {
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    /// Check an opportunity, returning the first limit it breaks.
    pub fn check(
        &self,
        opportunity: &Opportunity,
        metrics: &PerformanceMetrics,
    ) -> Result<(), RejectionReason> {
        if !self.limits.enabled {
            return Ok(());
        }

        let max_usd = self.limits.max_position_usd();
        if opportunity.profit_usd > max_usd {
            return Err(RejectionReason::PositionTooLarge {
                profit_usd: opportunity.profit_usd,
                max_usd,
            });
        }

        if metrics.total_loss_usd > self.limits.max_daily_loss_usd {
            return Err(RejectionReason::DailyLossExceeded {
                loss_usd: metrics.total_loss_usd,
                max_usd: self.limits.max_daily_loss_usd,
            });
        }

        Ok(())
    }

    pub fn permits(&self, opportunity: &Opportunity, metrics: &PerformanceMetrics) -> bool {
        self.check(opportunity, metrics).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
