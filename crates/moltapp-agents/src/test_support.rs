//! Scripted collaborators for exercising the orchestrator without a model,
//! a settlement backend or a price feed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use moltapp_models::{Decision, ExecutionReceipt, MarketContext, TradeAction};
use rust_decimal::Decimal;

use crate::agent::TradingAgent;
use crate::error::AgentError;
use crate::executor::TradeExecutor;
use crate::market::MarketDataSource;

/// Build a decision with a fixed reasoning string.
pub fn decision(action: TradeAction, symbol: &str, quantity: Decimal, confidence: u8) -> Decision {
    Decision {
        action,
        symbol: symbol.to_string(),
        quantity,
        reasoning: format!("scripted {action} {symbol}"),
        confidence,
        timestamp: Utc::now(),
    }
}

enum Script {
    Decide(Decision),
    Fail(String),
    Hang,
    Panic,
}

/// An agent that plays back one scripted behavior, optionally after a delay.
pub struct ScriptedAgent {
    id: String,
    name: String,
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedAgent {
    fn new(id: &str, script: Script) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_uppercase(),
            script,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn deciding(id: &str, decision: Decision) -> Self {
        Self::new(id, Script::Decide(decision))
    }

    pub fn failing(id: &str, message: &str) -> Self {
        Self::new(id, Script::Fail(message.to_string()))
    }

    /// Never answers; only a timeout ends its pipeline.
    pub fn hanging(id: &str) -> Self {
        Self::new(id, Script::Hang)
    }

    pub fn panicking(id: &str) -> Self {
        Self::new(id, Script::Panic)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TradingAgent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, _context: &MarketContext) -> Result<Decision, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            Script::Decide(decision) => Ok(Decision {
                timestamp: Utc::now(),
                ..decision.clone()
            }),
            Script::Fail(message) => Err(AgentError::Cli(message.clone())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Err(AgentError::Cli("woke from hang".to_string()))
            }
            Script::Panic => panic!("scripted agent {} panicked", self.id),
        }
    }
}

/// Records every execution request. Settles at a fixed price unless the
/// agent is on the failure list.
pub struct RecordingExecutor {
    price: Decimal,
    failing_agents: HashSet<String>,
    calls: Mutex<Vec<(String, Decision)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            price: Decimal::ONE_HUNDRED,
            failing_agents: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_for<S: Into<String>>(agents: impl IntoIterator<Item = S>) -> Self {
        Self {
            failing_agents: agents.into_iter().map(Into::into).collect(),
            ..Self::new()
        }
    }

    /// `(agent_id, decision)` in call order.
    pub fn calls(&self) -> Vec<(String, Decision)> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradeExecutor for RecordingExecutor {
    async fn execute(
        &self,
        agent_id: &str,
        decision: &Decision,
    ) -> Result<ExecutionReceipt, AgentError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((agent_id.to_string(), decision.clone()));

        if self.failing_agents.contains(agent_id) {
            return Err(AgentError::Execution(format!(
                "insufficient balance for {agent_id}"
            )));
        }
        Ok(ExecutionReceipt {
            success: true,
            settlement_price: Some(self.price),
            transaction_id: Some(format!("tx_{agent_id}_{}", decision.symbol)),
            settled_at: Utc::now(),
        })
    }
}

/// A price feed that is always down.
pub struct FailingMarketData;

#[async_trait]
impl MarketDataSource for FailingMarketData {
    async fn snapshot(&self, _round_id: &str) -> Result<MarketContext, AgentError> {
        Err(AgentError::MarketData("price feed unreachable".to_string()))
    }
}
