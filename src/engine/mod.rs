//! Core engine: the periodic source → evaluate → filter → execute → record
//! cycle and its start/stop control surface.

pub mod events;
pub mod executor;
pub mod metrics;
pub mod source;

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::strategy::decision::{DecisionEngine, ProfitPredictor};
use crate::strategy::risk::RiskGate;
use crate::strategy::StrategyStore;
use crate::types::{
    panic_message, EngineError, Evaluation, Opportunity, PerformanceMetrics, Recommendation,
    Strategy, TradeResult, UNKNOWN_STRATEGY,
};
use events::EngineEvent;
use executor::{ExecutionBackend, Executor};
use metrics::MetricsAggregator;
use source::OpportunitySource;

// ---------------------------------------------------------------------------
// Cycle state
// ---------------------------------------------------------------------------

/// Where the coordinator is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Sourcing,
    Evaluating,
    Filtering,
    Executing,
    Recording,
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub strategies_polled: usize,
    pub sources_failed: usize,
    pub opportunities_sourced: usize,
    pub evaluated: usize,
    pub approved: usize,
    pub executed: usize,
    pub failed: usize,
    pub net_profit_usd: f64,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct RunHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

struct EngineInner {
    config: AppConfig,
    store: Arc<StrategyStore>,
    decision: DecisionEngine,
    risk: RiskGate,
    source: Arc<dyn OpportunitySource>,
    executor: Executor,
    metrics: Mutex<MetricsAggregator>,
    events: broadcast::Sender<EngineEvent>,
    phase: watch::Sender<CyclePhase>,
    /// Held for the whole of a cycle; at most one cycle runs at a time.
    cycle_lock: Mutex<()>,
    cycles: AtomicU64,
}

/// Execution coordinator.
///
/// Owns the decision engine, risk gate, executor and metrics; shares the
/// strategy store with whoever registers strategies. Nothing runs until
/// `start`, and `stop` lets an in-flight cycle finish before returning.
pub struct Engine {
    inner: Arc<EngineInner>,
    control: Mutex<Option<RunHandle>>,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        store: Arc<StrategyStore>,
        source: Arc<dyn OpportunitySource>,
        backend: Arc<dyn ExecutionBackend>,
        predictor: Option<Arc<dyn ProfitPredictor>>,
    ) -> Self {
        let mut decision = DecisionEngine::new(config.decision.clone());
        if let Some(predictor) = predictor {
            decision = decision.with_predictor(predictor);
        }
        let (events, _) = broadcast::channel(config.engine.event_buffer.max(1));
        let (phase, _) = watch::channel(CyclePhase::Idle);

        let inner = EngineInner {
            risk: RiskGate::new(config.risk.clone()),
            metrics: Mutex::new(MetricsAggregator::new(config.engine.trade_history_capacity)),
            executor: Executor::new(backend),
            config,
            store,
            decision,
            source,
            events,
            phase,
            cycle_lock: Mutex::new(()),
            cycles: AtomicU64::new(0),
        };

        Self {
            inner: Arc::new(inner),
            control: Mutex::new(None),
        }
    }

    // -- Lifecycle -------------------------------------------------------

    /// Start the trading and performance loops. Starting a running engine
    /// is a no-op; an invalid configuration refuses to start.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut control = self.control.lock().await;
        if control.is_some() {
            warn!("Engine already running; start ignored");
            return Ok(());
        }

        if let Err(e) = self.inner.config.validate() {
            error!(error = %e, "Refusing to start");
            return Err(e);
        }

        info!(
            name = %self.inner.config.engine.name,
            cycle_ms = self.inner.config.engine.cycle_interval_ms,
            performance_ms = self.inner.config.engine.performance_interval_ms,
            "Engine starting"
        );
        self.inner.emit(EngineEvent::EngineStarted);

        let (shutdown, rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(EngineInner::trading_loop(self.inner.clone(), rx.clone())),
            tokio::spawn(EngineInner::performance_loop(self.inner.clone(), rx)),
        ];
        *control = Some(RunHandle { shutdown, tasks });
        Ok(())
    }

    /// Stop scheduling new cycles and wait for the in-flight one, scheduled
    /// or manual, to drain.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        let Some(handle) = control.take() else {
            warn!("Engine not running; stop ignored");
            return;
        };

        info!("Engine stopping; draining in-flight cycle");
        let _ = handle.shutdown.send(true);
        for task in handle.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Engine task ended abnormally");
            }
        }

        // A manual cycle may still be running outside the schedule.
        let _cycle = self.inner.cycle_lock.lock().await;
        self.inner.set_phase(CyclePhase::Idle);
        self.inner.emit(EngineEvent::EngineStopped);
        info!(cycles = self.cycles_completed(), "Engine stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.control.lock().await.is_some()
    }

    // -- Inbound surface -------------------------------------------------

    /// Run one cycle immediately, outside the schedule. Waits for any
    /// cycle already in flight. Allowed whether or not the engine is
    /// running; `stop` waits for it before emitting `EngineStopped`.
    pub async fn run_cycle(&self) -> CycleReport {
        let _guard = self.inner.cycle_lock.lock().await;
        self.inner.guarded_cycle().await
    }

    /// Score a single opportunity without executing it.
    pub async fn evaluate(&self, opportunity: &Opportunity) -> Evaluation {
        self.inner.decision.evaluate(opportunity).await
    }

    pub async fn register_strategy(&self, strategy: Strategy) {
        self.inner.store.register(strategy).await;
    }

    pub async fn set_strategy_enabled(&self, id: &str, enabled: bool) -> bool {
        self.inner.store.set_enabled(id, enabled).await
    }

    /// Administrative reset of all performance counters and trade history.
    pub async fn reset_metrics(&self) {
        self.inner.metrics.lock().await.reset();
    }

    // -- Queries ---------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> Arc<StrategyStore> {
        self.inner.store.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn phase(&self) -> CyclePhase {
        *self.inner.phase.borrow()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.inner.cycles.load(Ordering::SeqCst)
    }

    pub async fn metrics(&self) -> PerformanceMetrics {
        self.inner.metrics.lock().await.snapshot()
    }

    /// The `limit` most recent trades, newest first.
    pub async fn recent_trades(&self, limit: usize) -> Vec<TradeResult> {
        self.inner.metrics.lock().await.recent(limit)
    }
}

// ---------------------------------------------------------------------------
// Loops and cycle body
// ---------------------------------------------------------------------------

impl EngineInner {
    fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.phase.send_replace(phase);
    }

    async fn trading_loop(inner: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(inner.config.engine.cycle_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    // A manual cycle may hold the lock; skip this tick rather than queue.
                    let Ok(_guard) = inner.cycle_lock.try_lock() else {
                        debug!("Cycle still in flight; tick skipped");
                        continue;
                    };
                    inner.guarded_cycle().await;
                }
            }
        }
        debug!("Trading loop exited");
    }

    async fn performance_loop(inner: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = inner.config.engine.performance_interval();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    let snapshot = inner.metrics.lock().await.snapshot();
                    inner.emit(EngineEvent::PerformanceUpdate(snapshot));
                }
            }
        }
        debug!("Performance loop exited");
    }

    /// Run one cycle, containing any panic so the next tick still runs.
    /// Callers must hold `cycle_lock`.
    async fn guarded_cycle(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;

        let report = match AssertUnwindSafe(self.run_cycle(cycle)).catch_unwind().await {
            Ok(report) => {
                info!(
                    cycle = report.cycle,
                    polled = report.strategies_polled,
                    sourced = report.opportunities_sourced,
                    approved = report.approved,
                    executed = report.executed,
                    failed = report.failed,
                    net = format!("${:.2}", report.net_profit_usd),
                    elapsed_ms = report.duration_ms,
                    "Cycle complete"
                );
                report
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(cycle, error = %message, "Cycle aborted; resuming on next tick");
                self.emit(EngineEvent::CycleFailed {
                    cycle,
                    error: message,
                });
                CycleReport {
                    cycle,
                    ..CycleReport::default()
                }
            }
        };

        self.set_phase(CyclePhase::Idle);
        report
    }

    async fn run_cycle(&self, cycle: u64) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        // 1. Sourcing
        self.set_phase(CyclePhase::Sourcing);
        let strategies = self.store.list_enabled().await;
        report.strategies_polled = strategies.len();

        let polls = join_all(strategies.iter().map(|s| self.source.poll(s))).await;
        let mut sourced: Vec<(String, Opportunity)> = Vec::new();
        for (strategy, polled) in strategies.iter().zip(polls) {
            match polled {
                Ok(opps) => {
                    sourced.extend(opps.into_iter().map(|o| (strategy.id.clone(), o)));
                }
                Err(e) => {
                    report.sources_failed += 1;
                    warn!(strategy = %strategy.id, error = %e, "Source unavailable; strategy skipped this cycle");
                    self.emit(EngineEvent::SourceFailed {
                        strategy_id: strategy.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report.opportunities_sourced = sourced.len();

        // 2. Evaluating (every evaluation resolves before filtering)
        self.set_phase(CyclePhase::Evaluating);
        let evaluations = join_all(sourced.iter().map(|(_, opp)| self.decision.evaluate(opp))).await;
        report.evaluated = evaluations.len();

        // 3. Filtering
        self.set_phase(CyclePhase::Filtering);
        let mut scored: Vec<(String, Opportunity, Evaluation)> = sourced
            .into_iter()
            .zip(evaluations)
            .map(|((strategy_id, opp), eval)| (strategy_id, opp, eval))
            .collect();
        // Stable: equal confidence keeps source order.
        scored.sort_by(|a, b| {
            b.2.confidence
                .partial_cmp(&a.2.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let metrics_now = self.metrics.lock().await.snapshot();
        let threshold = self.decision.config().confidence_threshold;
        let mut approved: Vec<(String, Opportunity)> = Vec::new();
        for (strategy_id, opp, eval) in scored {
            if eval.recommendation != Recommendation::Execute || eval.confidence < threshold {
                debug!(
                    opportunity_id = %opp.id,
                    recommendation = %eval.recommendation,
                    confidence = format!("{:.2}", eval.confidence),
                    "Opportunity not selected"
                );
                continue;
            }
            let revised = opp.revised(&eval);
            match self.risk.check(&revised, &metrics_now) {
                Ok(()) => approved.push((strategy_id, revised)),
                Err(reason) => {
                    warn!(opportunity_id = %revised.id, reason = %reason, "Rejected by risk gate");
                }
            }
        }
        report.approved = approved.len();

        // 4. Executing
        self.set_phase(CyclePhase::Executing);
        let results = self.executor.execute_batch(approved).await;

        // 5. Recording
        self.set_phase(CyclePhase::Recording);
        for result in results {
            if result.success {
                report.executed += 1;
            } else {
                report.failed += 1;
            }
            report.net_profit_usd += result.profit_usd;
            self.record(result).await;
        }

        self.set_phase(CyclePhase::Idle);
        report.duration_ms = started.elapsed().as_millis() as u64;
        report
    }

    /// Fold one result into metrics and strategy stats, then announce it.
    /// The metrics lock is held throughout so emission order matches
    /// recording order.
    async fn record(&self, mut result: TradeResult) {
        if !self.store.contains(&result.strategy_id).await {
            warn!(strategy = %result.strategy_id, "Trade from unknown strategy");
            result.strategy_id = UNKNOWN_STRATEGY.to_string();
        }

        let mut metrics = self.metrics.lock().await;
        metrics.record(&result);
        if result.strategy_id != UNKNOWN_STRATEGY {
            self.store
                .record_outcome(&result.strategy_id, result.success, result.profit_usd)
                .await;
        }
        self.emit(EngineEvent::TradeExecuted(result));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
