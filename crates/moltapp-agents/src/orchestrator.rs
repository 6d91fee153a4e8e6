use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use moltapp_consensus::ConsensusEngine;
use moltapp_limiter::RateLimiters;
use moltapp_models::{
    AgentResult, ConsensusConfig, Decision, ExecutionReceipt, MarketContext, OrchestratorConfig,
    RoundConsensus, RoundResult, RoundTrigger, StreamConfig,
};
use moltapp_store::RoundStore;
use moltapp_stream::{EventBus, StreamEventType};
use rand::Rng;
use serde_json::json;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::agent::TradingAgent;
use crate::error::{AgentError, RoundError};
use crate::executor::TradeExecutor;
use crate::market::MarketDataSource;

/// The orchestrator runs trading rounds across every configured agent.
///
/// Each agent gets its own pipeline (decision, then execution unless it holds)
/// running as a separate task. A failure or panic in one pipeline is recorded
/// and never touches its siblings. Scheduled and manual rounds share
/// [`Orchestrator::run_round`].
pub struct Orchestrator {
    agents: Vec<Arc<dyn TradingAgent>>,
    executor: Arc<dyn TradeExecutor>,
    market: Arc<dyn MarketDataSource>,
    limiters: RateLimiters,
    bus: EventBus,
    consensus: Arc<ConsensusEngine>,
    store: Option<Arc<dyn RoundStore>>,
    persist_tasks: TaskTracker,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        agents: Vec<Arc<dyn TradingAgent>>,
        executor: Arc<dyn TradeExecutor>,
        market: Arc<dyn MarketDataSource>,
        limiters: RateLimiters,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            agents,
            executor,
            market,
            limiters,
            bus: EventBus::new(&StreamConfig::default()),
            consensus: Arc::new(ConsensusEngine::from_config(&ConsensusConfig::default())),
            store: None,
            persist_tasks: TaskTracker::new(),
            config,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_consensus(mut self, consensus: Arc<ConsensusEngine>) -> Self {
        self.consensus = consensus;
        self
    }

    /// Persist every completed round. Writes run in the background.
    pub fn with_store(mut self, store: Arc<dyn RoundStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn consensus(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    pub fn limiters(&self) -> &RateLimiters {
        &self.limiters
    }

    /// Wait for every background store write spawned so far.
    pub async fn flush_persistence(&self) {
        self.persist_tasks.close();
        self.persist_tasks.wait().await;
        self.persist_tasks.reopen();
    }

    /// Run one full trading round.
    ///
    /// Only a failed precondition (no agents, no market snapshot) is an error.
    /// Per-agent failures land in `RoundResult::errors` or on the agent's result.
    pub async fn run_round(&self, trigger: RoundTrigger) -> Result<RoundResult, RoundError> {
        let start = Instant::now();
        let round_id = RoundResult::new_round_id();
        let timestamp = Utc::now();
        info!(
            round_id = %round_id,
            trigger = trigger.label(),
            agents = self.agents.len(),
            "Starting trading round"
        );

        let context = match self.prepare(&round_id).await {
            Ok(context) => Arc::new(context),
            Err(e) => return Err(self.fail_round(&round_id, &trigger, start, e)),
        };

        self.bus.emit(
            StreamEventType::RoundStarted,
            json!({
                "round_id": round_id,
                "trigger": trigger,
                "agent_count": self.agents.len(),
                "symbols": context.quotes.len(),
            }),
        );

        // Fan out: one task per agent pipeline.
        let pipeline = Pipeline {
            round_id: round_id.clone(),
            executor: Arc::clone(&self.executor),
            limiters: self.limiters.clone(),
            bus: self.bus.clone(),
            decision_timeout: Duration::from_secs(self.config.decision_timeout_seconds),
            execution_timeout: Duration::from_secs(self.config.execution_timeout_seconds),
            jitter_ms: (self.config.jitter_min_ms, self.config.jitter_max_ms),
        };
        let handles: Vec<_> = self
            .agents
            .iter()
            .map(|agent| {
                let agent_id = agent.id().to_string();
                let agent = Arc::clone(agent);
                let pipeline = pipeline.clone();
                let context = Arc::clone(&context);
                (
                    agent_id,
                    tokio::spawn(async move { pipeline.run(agent, &context).await }),
                )
            })
            .collect();

        // Fan in, in configuration order.
        let mut results = Vec::with_capacity(handles.len());
        let mut errors = Vec::new();
        for (agent_id, handle) in handles {
            match handle.await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(message)) => errors.push(message),
                Err(e) => {
                    error!(
                        round_id = %round_id,
                        agent = %agent_id,
                        error = %e,
                        "Agent pipeline panicked"
                    );
                    errors.push(format!("{agent_id}: pipeline panicked"));
                }
            }
        }

        let round = RoundResult {
            round_id,
            timestamp,
            trigger,
            results,
            errors,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        let consensus = self.consensus.analyze(&round);
        self.publish_consensus(&consensus);

        self.bus.emit(
            StreamEventType::RoundCompleted,
            json!({
                "round_id": round.round_id,
                "trigger": round.trigger,
                "duration_ms": round.duration_ms,
                "decisions": round.results.len(),
                "executed": round.executed_count(),
                "failed_executions": round.failed_execution_count(),
                "errors": round.errors,
                "signals": consensus.signals.len(),
                "divergences": consensus.divergences.len(),
                "results": round.results,
            }),
        );

        self.persist(&round, &consensus);

        info!(
            round_id = %round.round_id,
            decisions = round.results.len(),
            executed = round.executed_count(),
            errors = round.errors.len(),
            elapsed_ms = round.duration_ms,
            "Trading round complete"
        );
        Ok(round)
    }

    async fn prepare(&self, round_id: &str) -> Result<MarketContext, RoundError> {
        if self.agents.is_empty() {
            return Err(RoundError::NoAgents);
        }
        self.limiters
            .market_data
            .execute(|| self.market.snapshot(round_id))
            .await
            .map_err(RoundError::MarketData)
    }

    fn fail_round(
        &self,
        round_id: &str,
        trigger: &RoundTrigger,
        start: Instant,
        err: RoundError,
    ) -> RoundError {
        let duration_ms = start.elapsed().as_millis() as u64;
        error!(
            round_id = %round_id,
            trigger = trigger.label(),
            duration_ms,
            error = %err,
            "trading_round_failed"
        );
        self.bus.emit(
            StreamEventType::RoundFailed,
            json!({
                "round_id": round_id,
                "trigger": trigger,
                "duration_ms": duration_ms,
                "error": err.to_string(),
            }),
        );
        err
    }

    fn publish_consensus(&self, consensus: &RoundConsensus) {
        for signal in &consensus.signals {
            self.bus
                .emit(StreamEventType::ConsensusSignal, json!(signal));
        }
        for divergence in &consensus.divergences {
            self.bus
                .emit(StreamEventType::DivergenceDetected, json!(divergence));
        }
    }

    fn persist(&self, round: &RoundResult, consensus: &RoundConsensus) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let round = round.clone();
        let consensus = consensus.clone();
        self.persist_tasks.spawn(async move {
            if let Err(e) = store.persist_round(&round).await {
                warn!(round_id = %round.round_id, error = %e, "Failed to persist round");
            }
            if let Err(e) = store.persist_consensus(&consensus).await {
                warn!(round_id = %round.round_id, error = %e, "Failed to persist consensus");
            }
        });
    }
}

/// Everything one agent pipeline needs, cloned into its task.
#[derive(Clone)]
struct Pipeline {
    round_id: String,
    executor: Arc<dyn TradeExecutor>,
    limiters: RateLimiters,
    bus: EventBus,
    decision_timeout: Duration,
    execution_timeout: Duration,
    jitter_ms: (u64, u64),
}

impl Pipeline {
    /// `Err` carries the entry for `RoundResult::errors`.
    async fn run(
        self,
        agent: Arc<dyn TradingAgent>,
        context: &MarketContext,
    ) -> Result<AgentResult, String> {
        let started = Instant::now();
        let decision = match self.decide(agent.as_ref(), context).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    round_id = %self.round_id,
                    agent = %agent.id(),
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Agent decision failed"
                );
                return Err(format!("{}: {e}", agent.id()));
            }
        };

        info!(
            round_id = %self.round_id,
            agent = %agent.id(),
            action = %decision.action,
            symbol = %decision.symbol,
            confidence = decision.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Agent decided"
        );
        self.bus.emit(
            StreamEventType::AgentDecision,
            json!({
                "round_id": self.round_id,
                "agent_id": agent.id(),
                "agent_name": agent.name(),
                "action": decision.action,
                "symbol": decision.symbol,
                "quantity": decision.quantity,
                "confidence": decision.confidence,
                "reasoning": decision.reasoning,
            }),
        );

        let mut result = AgentResult {
            agent_id: agent.id().to_string(),
            agent_name: agent.name().to_string(),
            decision,
            executed: false,
            execution_error: None,
            execution: None,
        };
        if result.decision.action.is_hold() {
            return Ok(result);
        }

        let delay = jitter(self.jitter_ms.0, self.jitter_ms.1);
        if !delay.is_zero() {
            debug!(agent = %result.agent_id, delay_ms = delay.as_millis() as u64, "Execution jitter");
            tokio::time::sleep(delay).await;
        }

        match self.execute(&result.agent_id, &result.decision).await {
            Ok(receipt) if receipt.success => {
                self.trade_executed(&result, &receipt);
                result.executed = true;
                result.execution = Some(receipt);
            }
            Ok(receipt) => {
                let message = "execution backend reported failure".to_string();
                self.trade_failed(&result, &message);
                result.execution_error = Some(message);
                result.execution = Some(receipt);
            }
            Err(e) => {
                warn!(
                    round_id = %self.round_id,
                    agent = %result.agent_id,
                    symbol = %result.decision.symbol,
                    error = %e,
                    "Trade execution failed"
                );
                let message = e.to_string();
                self.trade_failed(&result, &message);
                result.execution_error = Some(message);
            }
        }
        Ok(result)
    }

    async fn decide(
        &self,
        agent: &dyn TradingAgent,
        context: &MarketContext,
    ) -> Result<Decision, AgentError> {
        let timeout = self.decision_timeout;
        let decision = self
            .limiters
            .reasoning
            .execute(|| async move {
                tokio::time::timeout(timeout, agent.decide(context))
                    .await
                    .unwrap_or_else(|_| Err(AgentError::Timeout(timeout.as_secs())))
            })
            .await?;
        decision.validate().map_err(AgentError::InvalidDecision)?;
        Ok(decision)
    }

    async fn execute(
        &self,
        agent_id: &str,
        decision: &Decision,
    ) -> Result<ExecutionReceipt, AgentError> {
        let timeout = self.execution_timeout;
        let executor = &self.executor;
        self.limiters
            .execution
            .execute(|| async move {
                tokio::time::timeout(timeout, executor.execute(agent_id, decision))
                    .await
                    .unwrap_or_else(|_| Err(AgentError::Timeout(timeout.as_secs())))
            })
            .await
    }

    fn trade_executed(&self, result: &AgentResult, receipt: &ExecutionReceipt) {
        self.bus.emit(
            StreamEventType::TradeExecuted,
            json!({
                "round_id": self.round_id,
                "agent_id": result.agent_id,
                "action": result.decision.action,
                "symbol": result.decision.symbol,
                "quantity": result.decision.quantity,
                "settlement_price": receipt.settlement_price,
                "transaction_id": receipt.transaction_id,
            }),
        );
    }

    fn trade_failed(&self, result: &AgentResult, message: &str) {
        self.bus.emit(
            StreamEventType::TradeFailed,
            json!({
                "round_id": self.round_id,
                "agent_id": result.agent_id,
                "action": result.decision.action,
                "symbol": result.decision.symbol,
                "quantity": result.decision.quantity,
                "error": message,
            }),
        );
    }
}

/// Random delay between the bounds, in either order. Zero bounds disable it.
fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    let (low, high) = (min_ms.min(max_ms), min_ms.max(max_ms));
    if high == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}
