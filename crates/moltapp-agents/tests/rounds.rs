//! Full trading rounds against scripted agents, a recording executor and the
//! static price feed. The clock is paused so agent delays and timeouts run
//! instantly while keeping their relative order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use moltapp_agents::test_support::{decision, FailingMarketData, RecordingExecutor, ScriptedAgent};
use moltapp_agents::{Orchestrator, RoundError, StaticMarketData, TradingAgent};
use moltapp_limiter::RateLimiters;
use moltapp_models::{
    MarketConfig, OrchestratorConfig, RateLimiterConfig, RateLimitsConfig, RoundTrigger,
    TradeAction,
};
use moltapp_store::{RoundStore, SqliteRoundStore};
use moltapp_stream::{EventFilter, StreamEvent, StreamEventType};
use rust_decimal_macros::dec;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        decision_timeout_seconds: 5,
        execution_timeout_seconds: 5,
        jitter_min_ms: 0,
        jitter_max_ms: 0,
        ..OrchestratorConfig::default()
    }
}

fn build(
    agents: Vec<Arc<dyn TradingAgent>>,
    executor: Arc<RecordingExecutor>,
    limits: RateLimitsConfig,
) -> Orchestrator {
    Orchestrator::new(
        agents,
        executor,
        Arc::new(StaticMarketData::from_config(&MarketConfig::default())),
        RateLimiters::from_config(&limits).unwrap(),
        config(),
    )
}

fn drain(rx: &mut UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.event_type != StreamEventType::Heartbeat {
            events.push(event);
        }
    }
    events
}

#[tokio::test(start_paused = true)]
async fn one_agent_failure_never_sinks_the_round() {
    let agents: Vec<Arc<dyn TradingAgent>> = vec![
        Arc::new(ScriptedAgent::deciding(
            "claude",
            decision(TradeAction::Buy, "AAPLx", dec!(500), 80),
        )),
        Arc::new(ScriptedAgent::failing("gpt", "model overloaded")),
        Arc::new(ScriptedAgent::hanging("grok")),
        Arc::new(ScriptedAgent::panicking("gemini")),
    ];
    let executor = Arc::new(RecordingExecutor::new());
    let orch = build(agents, Arc::clone(&executor), RateLimitsConfig::default());

    let round = orch.run_round(RoundTrigger::Scheduled).await.unwrap();

    assert_eq!(round.results.len(), 1);
    assert_eq!(round.results[0].agent_id, "claude");
    assert!(round.results[0].executed);
    assert_eq!(
        round.errors,
        vec![
            "gpt: Claude CLI error: model overloaded".to_string(),
            "grok: Timed out after 5 seconds".to_string(),
            "gemini: pipeline panicked".to_string(),
        ]
    );
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn events_follow_completion_order() {
    let agents: Vec<Arc<dyn TradingAgent>> = vec![
        Arc::new(
            ScriptedAgent::deciding("slow", decision(TradeAction::Buy, "AAPLx", dec!(100), 80))
                .with_delay(Duration::from_millis(300)),
        ),
        Arc::new(
            ScriptedAgent::deciding("fast", decision(TradeAction::Buy, "AAPLx", dec!(100), 70))
                .with_delay(Duration::from_millis(100)),
        ),
        Arc::new(
            ScriptedAgent::deciding("mid", decision(TradeAction::Sell, "AAPLx", dec!(5), 60))
                .with_delay(Duration::from_millis(200)),
        ),
    ];
    let orch = build(
        agents,
        Arc::new(RecordingExecutor::new()),
        RateLimitsConfig::default(),
    );
    let (_id, mut rx) = orch.event_bus().subscribe_channel(EventFilter::all());

    let round = orch.run_round(RoundTrigger::Scheduled).await.unwrap();
    let events = drain(&mut rx);

    let types: Vec<StreamEventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            StreamEventType::RoundStarted,
            StreamEventType::AgentDecision,
            StreamEventType::TradeExecuted,
            StreamEventType::AgentDecision,
            StreamEventType::TradeExecuted,
            StreamEventType::AgentDecision,
            StreamEventType::TradeExecuted,
            StreamEventType::ConsensusSignal,
            StreamEventType::DivergenceDetected,
            StreamEventType::RoundCompleted,
        ]
    );

    let decided: Vec<&str> = events
        .iter()
        .filter(|e| e.event_type == StreamEventType::AgentDecision)
        .filter_map(|e| e.agent_id())
        .collect();
    assert_eq!(decided, vec!["fast", "mid", "slow"]);

    // Results keep configuration order.
    let ids: Vec<&str> = round.results.iter().map(|r| r.agent_id.as_str()).collect();
    assert_eq!(ids, vec!["slow", "fast", "mid"]);

    assert_eq!(events[0].data["agent_count"], 3);
    let completed = &events[events.len() - 1];
    assert_eq!(completed.data["round_id"], round.round_id.as_str());
    assert_eq!(completed.data["executed"], 3);
    assert_eq!(completed.data["signals"], 1);

    // Event ids increase monotonically.
    assert!(events.windows(2).all(|w| w[0].id < w[1].id));
}

#[tokio::test(start_paused = true)]
async fn execution_failure_stays_on_the_agent_result() {
    let agents: Vec<Arc<dyn TradingAgent>> = vec![
        Arc::new(ScriptedAgent::deciding(
            "claude",
            decision(TradeAction::Buy, "TSLAx", dec!(250), 75),
        )),
        Arc::new(ScriptedAgent::deciding(
            "gpt",
            decision(TradeAction::Sell, "TSLAx", dec!(2), 65),
        )),
    ];
    let executor = Arc::new(RecordingExecutor::failing_for(["gpt"]));
    let orch = build(agents, Arc::clone(&executor), RateLimitsConfig::default());
    let (_id, mut rx) = orch
        .event_bus()
        .subscribe_channel(EventFilter::types([StreamEventType::TradeFailed]));

    let round = orch.run_round(RoundTrigger::Scheduled).await.unwrap();

    assert!(round.errors.is_empty());
    assert_eq!(round.results.len(), 2);
    let gpt = &round.results[1];
    assert!(!gpt.executed);
    assert!(gpt
        .execution_error
        .as_deref()
        .unwrap()
        .contains("insufficient balance"));
    assert!(gpt.execution.is_none());
    assert_eq!(round.failed_execution_count(), 1);
    assert_eq!(round.executed_count(), 1);
    assert_eq!(executor.calls().len(), 2);

    let failed = drain(&mut rx);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].agent_id(), Some("gpt"));
    assert_eq!(failed[0].data["symbol"], "TSLAx");
}

#[tokio::test(start_paused = true)]
async fn market_data_failure_is_a_round_failure() {
    let agent = Arc::new(ScriptedAgent::deciding(
        "claude",
        decision(TradeAction::Buy, "AAPLx", dec!(1), 50),
    ));
    let orch = Orchestrator::new(
        vec![agent.clone() as Arc<dyn TradingAgent>],
        Arc::new(RecordingExecutor::new()),
        Arc::new(FailingMarketData),
        RateLimiters::from_config(&RateLimitsConfig::default()).unwrap(),
        config(),
    );

    let err = orch.run_round(RoundTrigger::Scheduled).await.unwrap_err();
    assert!(matches!(err, RoundError::MarketData(_)));
    assert_eq!(agent.calls(), 0);

    let events = orch.event_bus().recent_events(None, None, 50);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, StreamEventType::RoundFailed);
    assert!(events[0].data["error"]
        .as_str()
        .unwrap()
        .contains("price feed unreachable"));
}

#[tokio::test(start_paused = true)]
async fn full_reasoning_queue_rejects_as_agent_error() {
    let limits = RateLimitsConfig {
        reasoning: RateLimiterConfig::new(1, 1, 60_000).with_max_queue_size(0),
        ..RateLimitsConfig::default()
    };
    let agents: Vec<Arc<dyn TradingAgent>> = vec![
        Arc::new(ScriptedAgent::deciding(
            "claude",
            decision(TradeAction::Hold, "SPYx", dec!(0), 40),
        )),
        Arc::new(ScriptedAgent::deciding(
            "gpt",
            decision(TradeAction::Hold, "SPYx", dec!(0), 40),
        )),
    ];
    let orch = build(agents, Arc::new(RecordingExecutor::new()), limits);

    let round = orch.run_round(RoundTrigger::Scheduled).await.unwrap();
    assert_eq!(round.results.len(), 1);
    assert_eq!(round.errors.len(), 1);
    assert!(round.errors[0].contains("queue full"), "{}", round.errors[0]);
}

#[tokio::test(start_paused = true)]
async fn queued_decisions_wait_for_refill() {
    let limits = RateLimitsConfig {
        reasoning: RateLimiterConfig::new(1, 1, 1_000),
        ..RateLimitsConfig::default()
    };
    let agents: Vec<Arc<dyn TradingAgent>> = ["claude", "gpt", "grok"]
        .into_iter()
        .map(|id| {
            Arc::new(ScriptedAgent::deciding(
                id,
                decision(TradeAction::Hold, "SPYx", dec!(0), 40),
            )) as Arc<dyn TradingAgent>
        })
        .collect();
    let orch = build(agents, Arc::new(RecordingExecutor::new()), limits);

    let started = Instant::now();
    let round = orch.run_round(RoundTrigger::Scheduled).await.unwrap();

    assert_eq!(round.results.len(), 3);
    assert!(started.elapsed() >= Duration::from_secs(2));
    let metrics = orch.limiters().reasoning.metrics();
    assert_eq!(metrics.rate_limit_hits, 2);
    assert_eq!(metrics.queue_depth, 0);
}

#[tokio::test(start_paused = true)]
async fn manual_round_feeds_consensus_and_store() {
    let agents: Vec<Arc<dyn TradingAgent>> = vec![
        Arc::new(ScriptedAgent::deciding(
            "claude",
            decision(TradeAction::Sell, "TSLAx", dec!(3), 90),
        )),
        Arc::new(ScriptedAgent::deciding(
            "gpt",
            decision(TradeAction::Sell, "TSLAx", dec!(1), 85),
        )),
    ];
    let store = Arc::new(SqliteRoundStore::open_in_memory().unwrap());
    let orch = build(
        agents,
        Arc::new(RecordingExecutor::new()),
        RateLimitsConfig::default(),
    )
    .with_store(store.clone());

    let trigger = RoundTrigger::Manual {
        requested_by: "ops".to_string(),
    };
    let round = orch.run_round(trigger.clone()).await.unwrap();
    assert_eq!(round.trigger, trigger);

    let consensus = orch.consensus().round(&round.round_id).unwrap();
    assert_eq!(consensus.signals.len(), 1);
    assert_eq!(consensus.signals[0].agent_count, 2);
    assert_eq!(orch.consensus().pending_outcomes().len(), 1);

    // Persistence runs in the background.
    orch.flush_persistence().await;
    let stored = store.consensus_for(&round.round_id).await.unwrap();
    assert_eq!(stored.unwrap(), consensus);
    assert_eq!(store.round(&round.round_id).await.unwrap().unwrap(), round);
}

#[tokio::test(start_paused = true)]
async fn execution_waits_out_the_jitter_but_holds_do_not() {
    let agents: Vec<Arc<dyn TradingAgent>> = vec![
        Arc::new(ScriptedAgent::deciding(
            "claude",
            decision(TradeAction::Buy, "AAPLx", dec!(10), 80),
        )),
        Arc::new(ScriptedAgent::deciding(
            "gpt",
            decision(TradeAction::Hold, "SPYx", dec!(0), 50),
        )),
    ];
    let orch = Orchestrator::new(
        agents,
        Arc::new(RecordingExecutor::new()),
        Arc::new(StaticMarketData::from_config(&MarketConfig::default())),
        RateLimiters::from_config(&RateLimitsConfig::default()).unwrap(),
        OrchestratorConfig {
            jitter_min_ms: 500,
            jitter_max_ms: 500,
            ..config()
        },
    );

    let timeline: Arc<Mutex<Vec<(StreamEventType, Option<String>, Instant)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let timeline_cb = timeline.clone();
    orch.event_bus().subscribe(EventFilter::all(), move |event| {
        timeline_cb.lock().unwrap().push((
            event.event_type,
            event.agent_id().map(str::to_string),
            Instant::now(),
        ));
        Ok(())
    });

    let started = Instant::now();
    let round = orch.run_round(RoundTrigger::Scheduled).await.unwrap();
    assert_eq!(round.executed_count(), 1);

    let timeline = timeline.lock().unwrap();
    let at = |event_type: StreamEventType, agent: &str| {
        timeline
            .iter()
            .find(|(t, a, _)| *t == event_type && a.as_deref() == Some(agent))
            .map(|(_, _, at)| *at)
            .unwrap()
    };

    let decided = at(StreamEventType::AgentDecision, "claude");
    let executed = at(StreamEventType::TradeExecuted, "claude");
    assert!(executed - decided >= Duration::from_millis(500));

    // The hold reports immediately and never reaches execution.
    assert!(at(StreamEventType::AgentDecision, "gpt") - started < Duration::from_millis(500));
    assert!(!timeline.iter().any(|(t, a, _)| {
        *t == StreamEventType::TradeExecuted && a.as_deref() == Some("gpt")
    }));
}

#[tokio::test(start_paused = true)]
async fn hold_only_round_has_no_jitter() {
    let agents: Vec<Arc<dyn TradingAgent>> = ["claude", "gpt"]
        .into_iter()
        .map(|id| {
            Arc::new(ScriptedAgent::deciding(
                id,
                decision(TradeAction::Hold, "SPYx", dec!(0), 50),
            )) as Arc<dyn TradingAgent>
        })
        .collect();
    let orch = Orchestrator::new(
        agents,
        Arc::new(RecordingExecutor::new()),
        Arc::new(StaticMarketData::from_config(&MarketConfig::default())),
        RateLimiters::from_config(&RateLimitsConfig::default()).unwrap(),
        OrchestratorConfig {
            jitter_min_ms: 500,
            jitter_max_ms: 500,
            ..config()
        },
    );

    let started = Instant::now();
    orch.run_round(RoundTrigger::Scheduled).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
}
