//! Trade executor.
//!
//! Wraps an `ExecutionBackend` with timing and turns every attempt into a
//! `TradeResult`, success or not. A paper backend fills opportunities at
//! their stated profit for dry runs.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::types::{panic_message, EngineError, Opportunity, TradeResult};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// What the backend reports for one submitted opportunity.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Realized profit in USD (≤ 0 on a failed settlement).
    pub profit_usd: f64,
    pub fee_usd: f64,
    /// Settlement reference (tx hash, order id).
    pub reference: Option<String>,
}

/// Abstraction over whatever actually settles a trade.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, opportunity: &Opportunity) -> Result<ExecutionOutcome, EngineError>;
}

/// Dry-run backend: every opportunity fills at its stated profit net of
/// its fee estimate.
#[derive(Debug, Default)]
pub struct PaperExecutor;

#[async_trait]
impl ExecutionBackend for PaperExecutor {
    async fn execute(&self, opportunity: &Opportunity) -> Result<ExecutionOutcome, EngineError> {
        info!(
            opportunity_id = %opportunity.id,
            pair = format!("{}/{}", opportunity.token_a, opportunity.token_b),
            profit = format!("${:.2}", opportunity.profit_usd),
            "[PAPER] Would execute"
        );
        Ok(ExecutionOutcome {
            success: true,
            profit_usd: opportunity.profit_usd - opportunity.gas_estimate,
            fee_usd: opportunity.gas_estimate,
            reference: Some(format!("paper-{}", uuid::Uuid::new_v4())),
        })
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    backend: Arc<dyn ExecutionBackend>,
}

impl Executor {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self { backend }
    }

    /// Execute one opportunity and build its trade result.
    ///
    /// A backend error or panic becomes a failed result with zero profit;
    /// it is never retried.
    pub async fn execute(&self, strategy_id: &str, opportunity: Opportunity) -> TradeResult {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(async { self.backend.execute(&opportunity).await })
            .catch_unwind()
            .await;
        let execution_time = started.elapsed();

        let (success, profit_usd, gas_used, reference) = match outcome {
            Ok(Ok(o)) => {
                if !o.success {
                    warn!(
                        opportunity_id = %opportunity.id,
                        strategy = strategy_id,
                        loss = format!("${:.2}", o.profit_usd),
                        "Execution reported failure"
                    );
                }
                (o.success, o.profit_usd, o.fee_usd, o.reference)
            }
            Ok(Err(e)) => {
                warn!(
                    opportunity_id = %opportunity.id,
                    strategy = strategy_id,
                    error = %e,
                    "Execution failed"
                );
                (false, 0.0, 0.0, None)
            }
            Err(payload) => {
                error!(
                    opportunity_id = %opportunity.id,
                    strategy = strategy_id,
                    error = %panic_message(payload.as_ref()),
                    "Execution backend panicked"
                );
                (false, 0.0, 0.0, None)
            }
        };

        TradeResult {
            id: format!("trade-{}", uuid::Uuid::new_v4()),
            strategy_id: strategy_id.to_string(),
            opportunity,
            success,
            profit_usd,
            gas_used,
            reference,
            execution_time,
            timestamp: Utc::now(),
        }
    }

    /// Execute a batch concurrently. Submission follows the input order and
    /// results come back in that same order.
    pub async fn execute_batch(&self, batch: Vec<(String, Opportunity)>) -> Vec<TradeResult> {
        if batch.is_empty() {
            return Vec::new();
        }
        info!(count = batch.len(), "Executing batch");

        let results = join_all(
            batch
                .into_iter()
                .map(|(strategy_id, opp)| async move { self.execute(&strategy_id, opp).await }),
        )
        .await;

        info!(
            executed = results.iter().filter(|r| r.success).count(),
            failed = results.iter().filter(|r| !r.success).count(),
            "Batch execution complete"
        );
        results
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
