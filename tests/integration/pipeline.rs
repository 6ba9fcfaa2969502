//! Full cycle behaviour: sourcing through recording, scheduling,
//! shutdown and event delivery.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use arbiter::engine::events::EngineEvent;
use arbiter::engine::executor::ExecutionOutcome;
use arbiter::engine::{CyclePhase, Engine};
use arbiter::strategy::StrategyStore;
use arbiter::types::EngineError;

use crate::mock_feed::*;

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn traded_ids(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TradeExecuted(t) => Some(t.opportunity.id.clone()),
            _ => None,
        })
        .collect()
}

fn store_abc() -> Arc<StrategyStore> {
    Arc::new(StrategyStore::from_strategies(vec![
        strategy("a", 1),
        strategy("b", 2),
        strategy("c", 3),
    ]))
}

#[tokio::test]
async fn failing_source_is_contained_to_its_strategy() {
    let source = Arc::new(
        ScriptedSource::new()
            .failing("a")
            .feed("b", vec![opportunity("b-1", 50.0, 0.9)])
            .feed("c", vec![opportunity("c-1", 40.0, 0.85)]),
    );
    let store = store_abc();
    let engine = Engine::new(fast_config(), store.clone(), source, Arc::new(ScriptedBackend::new()), None);
    let mut rx = engine.subscribe();

    let report = engine.run_cycle().await;
    assert_eq!(report.strategies_polled, 3);
    assert_eq!(report.sources_failed, 1);
    assert_eq!(report.executed, 2);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::SourceFailed { strategy_id, .. } if strategy_id == "a")));
    assert_eq!(traded_ids(&events), vec!["b-1", "c-1"]);

    // The schedule keeps going despite the outage.
    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(engine.is_running().await);
    engine.stop().await;

    assert!(engine.cycles_completed() >= 3);
    assert!(store.get("b").await.unwrap().stats.total_trades >= 2);
    assert_eq!(store.get("a").await.unwrap().stats.total_trades, 0);
}

#[tokio::test]
async fn double_start_emits_one_started_event() {
    let engine = Engine::new(
        fast_config(),
        store_abc(),
        Arc::new(ScriptedSource::new()),
        Arc::new(ScriptedBackend::new()),
        None,
    );
    let mut rx = engine.subscribe();

    engine.start().await.unwrap();
    engine.start().await.unwrap();
    engine.stop().await;

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(EngineEvent::EngineStarted)));
    assert!(matches!(events.last(), Some(EngineEvent::EngineStopped)));
    let started = events.iter().filter(|e| matches!(e, EngineEvent::EngineStarted)).count();
    assert_eq!(started, 1);
}

#[tokio::test]
async fn scheduled_cycles_never_overlap() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_delay(Duration::from_millis(60))
            .feed("a", vec![opportunity("a-1", 50.0, 0.9)]),
    );
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let mut cfg = fast_config();
    cfg.engine.cycle_interval_ms = 10;
    let engine = Engine::new(cfg, store, source.clone(), Arc::new(ScriptedBackend::new()), None);

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.stop().await;

    assert!(source.polls() >= 2);
    assert_eq!(source.max_in_flight(), 1);
}

#[tokio::test]
async fn manual_cycles_are_serialised() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_delay(Duration::from_millis(40))
            .feed("a", vec![opportunity("a-1", 50.0, 0.9)]),
    );
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let engine = Engine::new(fast_config(), store, source.clone(), Arc::new(ScriptedBackend::new()), None);

    let (first, second) = tokio::join!(engine.run_cycle(), engine.run_cycle());
    assert_ne!(first.cycle, second.cycle);
    assert_eq!(source.max_in_flight(), 1);
    assert_eq!(engine.metrics().await.total_trades, 2);
}

#[tokio::test]
async fn stop_drains_in_flight_cycle() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_delay(Duration::from_millis(100))
            .feed("a", vec![opportunity("a-1", 50.0, 0.9)]),
    );
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let engine = Engine::new(fast_config(), store, source, Arc::new(ScriptedBackend::new()), None);
    let mut rx = engine.subscribe();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    engine.stop().await;

    // The cycle that was sourcing when stop was requested ran to completion.
    assert_eq!(engine.metrics().await.total_trades, 1);
    assert_eq!(engine.phase(), CyclePhase::Idle);

    let events = drain(&mut rx);
    let trade_pos = events
        .iter()
        .position(|e| matches!(e, EngineEvent::TradeExecuted(_)))
        .unwrap();
    let stop_pos = events
        .iter()
        .position(|e| matches!(e, EngineEvent::EngineStopped))
        .unwrap();
    assert!(trade_pos < stop_pos);
    assert_eq!(stop_pos, events.len() - 1);
}

#[tokio::test]
async fn trades_emitted_in_recording_order() {
    let source = Arc::new(ScriptedSource::new().feed(
        "a",
        vec![
            opportunity("p1", 30.0, 0.75),
            opportunity("p2", 60.0, 0.95),
            opportunity("p3", 45.0, 0.85),
            opportunity("p4", 20.0, 0.85),
            opportunity("p5", 55.0, 0.2),
        ],
    ));
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let backend = Arc::new(ScriptedBackend::new());
    let engine = Engine::new(fast_config(), store, source, backend.clone(), None);
    let mut rx = engine.subscribe();

    engine.run_cycle().await;

    let emitted = traded_ids(&drain(&mut rx));
    // Confidence descending; ties keep source order; low confidence dropped.
    assert_eq!(emitted, vec!["p2", "p3", "p4", "p1"]);
    assert_eq!(backend.submitted().len(), 4);

    let mut recorded: Vec<String> = engine
        .recent_trades(10)
        .await
        .into_iter()
        .map(|t| t.opportunity.id)
        .collect();
    recorded.reverse();
    assert_eq!(emitted, recorded);
}

#[tokio::test]
async fn execution_errors_become_failed_trades() {
    let source = Arc::new(ScriptedSource::new().feed(
        "a",
        vec![opportunity("ok", 50.0, 0.9), opportunity("reverts", 50.0, 0.9)],
    ));
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let backend = ScriptedBackend::new().error("reverts", "execution reverted");
    let engine = Engine::new(fast_config(), store.clone(), source, Arc::new(backend), None);

    let report = engine.run_cycle().await;
    assert_eq!(report.executed, 1);
    assert_eq!(report.failed, 1);

    let m = engine.metrics().await;
    assert_eq!(m.failed_trades, 1);
    assert_eq!(m.total_loss_usd, 0.0);

    let a = store.get("a").await.unwrap();
    assert_eq!(a.stats.total_trades, 2);
    assert!((a.stats.success_rate - 50.0).abs() < 1e-9);
    assert!(a.last_executed.is_some());
}

#[tokio::test]
async fn backend_panic_is_recorded_as_failed_trade() {
    let source = Arc::new(ScriptedSource::new().feed(
        "a",
        vec![opportunity("bad", 50.0, 0.9), opportunity("ok", 50.0, 0.9)],
    ));
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let backend = Arc::new(ScriptedBackend::new().panicking("bad"));
    let engine = Engine::new(fast_config(), store.clone(), source, backend.clone(), None);
    let mut rx = engine.subscribe();

    let report = engine.run_cycle().await;
    assert_eq!(report.approved, 2);
    assert_eq!(report.executed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(backend.submitted(), vec!["bad", "ok"]);

    let m = engine.metrics().await;
    assert_eq!(m.total_trades, 2);
    assert_eq!(m.successful_trades, 1);
    assert_eq!(m.failed_trades, 1);
    assert!((m.total_profit_usd - 48.0).abs() < 1e-9);
    assert_eq!(store.get("a").await.unwrap().stats.total_trades, 2);

    let events = drain(&mut rx);
    assert_eq!(traded_ids(&events), vec!["bad", "ok"]);
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::CycleFailed { .. })));
}

#[tokio::test]
async fn predictor_panic_falls_back_for_that_opportunity() {
    let source = Arc::new(ScriptedSource::new().feed(
        "a",
        vec![opportunity("bad", 50.0, 0.9), opportunity("ok", 50.0, 0.9)],
    ));
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let backend = Arc::new(ScriptedBackend::new());
    let predictor = ScriptedPredictor::predicting(55.0).panicking_on("bad");
    let engine = Engine::new(fast_config(), store, source, backend.clone(), Some(Arc::new(predictor)));

    let report = engine.run_cycle().await;
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.executed, 2);
    assert_eq!(backend.submitted(), vec!["bad", "ok"]);

    let fallback = engine.evaluate(&opportunity("bad", 50.0, 0.9)).await;
    assert_eq!(fallback.adjusted_profit, 50.0);
    assert!(fallback
        .reasoning
        .iter()
        .any(|r| r.contains("predictor panicked")));
}

#[tokio::test]
async fn stop_waits_for_manual_cycle_in_flight() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_delay(Duration::from_millis(80))
            .feed("a", vec![opportunity("a-1", 50.0, 0.9)]),
    );
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let mut cfg = fast_config();
    cfg.engine.cycle_interval_ms = 10_000;
    cfg.engine.performance_interval_ms = 10_000;
    let engine = Arc::new(Engine::new(cfg, store, source, Arc::new(ScriptedBackend::new()), None));
    let mut rx = engine.subscribe();

    // The first scheduled cycle fires on start; let it finish.
    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let manual = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_cycle().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.stop().await;

    let report = manual.await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(engine.metrics().await.total_trades, 2);
    assert_eq!(engine.phase(), CyclePhase::Idle);

    let events = drain(&mut rx);
    let stop_pos = events
        .iter()
        .position(|e| matches!(e, EngineEvent::EngineStopped))
        .unwrap();
    assert_eq!(stop_pos, events.len() - 1);
    let last_trade = events
        .iter()
        .rposition(|e| matches!(e, EngineEvent::TradeExecuted(_)))
        .unwrap();
    assert!(last_trade < stop_pos);
}

#[tokio::test]
async fn loss_limit_halts_trading_until_reset() {
    let source = Arc::new(ScriptedSource::new().feed("a", vec![opportunity("a-1", 50.0, 0.9)]));
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let backend = ScriptedBackend::new().outcome(
        "a-1",
        ExecutionOutcome { success: false, profit_usd: -600.0, fee_usd: 2.0, reference: None },
    );
    let engine = Engine::new(fast_config(), store, source, Arc::new(backend), None);

    assert_eq!(engine.run_cycle().await.approved, 1);
    assert!((engine.metrics().await.total_loss_usd - 600.0).abs() < 1e-9);

    // Over the $500 limit: nothing passes the gate.
    assert_eq!(engine.run_cycle().await.approved, 0);

    engine.reset_metrics().await;
    assert_eq!(engine.metrics().await.total_trades, 0);
    assert_eq!(engine.run_cycle().await.approved, 1);
}

#[tokio::test]
async fn predicted_profit_is_what_the_risk_gate_sees() {
    let source = Arc::new(ScriptedSource::new().feed("a", vec![opportunity("a-1", 50.0, 0.9)]));
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let backend = Arc::new(ScriptedBackend::new());

    // A $5000 prediction exceeds the 1 ETH × $2000 cap.
    let engine = Engine::new(
        fast_config(),
        store.clone(),
        source.clone(),
        backend.clone(),
        Some(Arc::new(ScriptedPredictor::predicting(5_000.0))),
    );
    let report = engine.run_cycle().await;
    assert_eq!(report.approved, 0);
    assert!(backend.submitted().is_empty());

    // An unavailable predictor falls back to the stated profit.
    let engine = Engine::new(
        fast_config(),
        store,
        source,
        backend.clone(),
        Some(Arc::new(ScriptedPredictor::offline())),
    );
    let report = engine.run_cycle().await;
    assert_eq!(report.executed, 1);
    assert_eq!(backend.submitted(), vec!["a-1"]);
}

#[tokio::test]
async fn disabled_risk_gate_permits_everything() {
    let source = Arc::new(ScriptedSource::new().feed("a", vec![opportunity("whale", 9_000.0, 0.95)]));
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let mut cfg = fast_config();
    cfg.risk.enabled = false;
    let engine = Engine::new(cfg, store, source, Arc::new(ScriptedBackend::new()), None);

    assert_eq!(engine.run_cycle().await.executed, 1);
}

#[tokio::test]
async fn disabled_strategies_are_not_polled() {
    let source = Arc::new(
        ScriptedSource::new()
            .feed("a", vec![opportunity("a-1", 50.0, 0.9)])
            .feed("b", vec![opportunity("b-1", 50.0, 0.9)]),
    );
    let store = Arc::new(StrategyStore::from_strategies(vec![
        strategy("a", 1),
        strategy("b", 2).disabled(),
    ]));
    let engine = Engine::new(fast_config(), store, source.clone(), Arc::new(ScriptedBackend::new()), None);

    let report = engine.run_cycle().await;
    assert_eq!(report.strategies_polled, 1);
    assert_eq!(source.polls(), 1);

    assert!(engine.set_strategy_enabled("b", true).await);
    assert_eq!(engine.run_cycle().await.executed, 2);
}

#[tokio::test]
async fn slow_subscriber_lags_without_blocking_engine() {
    let opps = (0..10)
        .map(|i| opportunity(&format!("o{i}"), 50.0, 0.9))
        .collect();
    let source = Arc::new(ScriptedSource::new().feed("a", opps));
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let mut cfg = fast_config();
    cfg.engine.event_buffer = 4;
    let engine = Engine::new(cfg, store, source, Arc::new(ScriptedBackend::new()), None);
    let mut rx = engine.subscribe();

    let report = engine.run_cycle().await;
    assert_eq!(report.executed, 10);

    match rx.recv().await {
        Err(broadcast::error::RecvError::Lagged(skipped)) => assert_eq!(skipped, 6),
        other => panic!("expected lag, got {other:?}"),
    }
    // The survivors are the newest events.
    match rx.recv().await.unwrap() {
        EngineEvent::TradeExecuted(t) => assert_eq!(t.opportunity.id, "o6"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn invalid_config_refuses_to_start() {
    let mut cfg = fast_config();
    cfg.decision.confidence_threshold = 1.5;
    let engine = Engine::new(
        cfg,
        store_abc(),
        Arc::new(ScriptedSource::new()),
        Arc::new(ScriptedBackend::new()),
        None,
    );
    let mut rx = engine.subscribe();

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, EngineError::ConfigurationInvalid(_)));
    assert!(!engine.is_running().await);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn performance_updates_reflect_trades() {
    let source = Arc::new(ScriptedSource::new().feed("a", vec![opportunity("a-1", 50.0, 0.9)]));
    let store = Arc::new(StrategyStore::from_strategies(vec![strategy("a", 1)]));
    let engine = Engine::new(fast_config(), store, source, Arc::new(ScriptedBackend::new()), None);
    let mut rx = engine.subscribe();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(130)).await;
    engine.stop().await;

    let last_update = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::PerformanceUpdate(m) => Some(m),
            _ => None,
        })
        .last()
        .unwrap();
    assert!(last_update.total_trades >= 1);
    assert_eq!(last_update.failed_trades, 0);
}
