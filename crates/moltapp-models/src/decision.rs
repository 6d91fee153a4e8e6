use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
            TradeAction::Hold => "hold",
        }
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, TradeAction::Hold)
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent's recommendation for a round. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub action: TradeAction,
    pub symbol: String,
    /// Non-negative. For buys this is the USDC notional, for sells the token amount.
    pub quantity: Decimal,
    pub reasoning: String,
    /// 0 to 100.
    pub confidence: u8,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    /// Check the invariants an agent backend may violate.
    pub fn validate(&self) -> Result<(), String> {
        if self.confidence > 100 {
            return Err(format!("confidence {} out of range 0-100", self.confidence));
        }
        if self.quantity.is_sign_negative() {
            return Err(format!("negative quantity {}", self.quantity));
        }
        if self.symbol.trim().is_empty() {
            return Err("empty symbol".to_string());
        }
        Ok(())
    }
}

/// Settlement details returned by the execution backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReceipt {
    pub success: bool,
    pub settlement_price: Option<Decimal>,
    pub transaction_id: Option<String>,
    pub settled_at: DateTime<Utc>,
}

/// A decision plus its execution outcome. Created once per agent per round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResult {
    pub agent_id: String,
    pub agent_name: String,
    pub decision: Decision,
    pub executed: bool,
    pub execution_error: Option<String>,
    pub execution: Option<ExecutionReceipt>,
}

/// What started a round. Manual and scheduled rounds share one code path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundTrigger {
    Scheduled,
    Manual { requested_by: String },
}

impl RoundTrigger {
    pub fn label(&self) -> &'static str {
        match self {
            RoundTrigger::Scheduled => "scheduled",
            RoundTrigger::Manual { .. } => "manual",
        }
    }
}

/// The unit of work produced by one call to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundResult {
    pub round_id: String,
    pub timestamp: DateTime<Utc>,
    pub trigger: RoundTrigger,
    pub results: Vec<AgentResult>,
    /// One entry per agent whose decision could not be produced.
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl RoundResult {
    pub fn new_round_id() -> String {
        format!("round_{}", Uuid::new_v4().simple())
    }

    pub fn executed_count(&self) -> usize {
        self.results.iter().filter(|r| r.executed).count()
    }

    pub fn failed_execution_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.execution_error.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketQuote {
    pub symbol: String,
    pub price: Decimal,
    pub change_24h_pct: Option<Decimal>,
}

/// Market snapshot handed to every agent at the start of a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketContext {
    pub round_id: String,
    pub quotes: Vec<MarketQuote>,
    pub fetched_at: DateTime<Utc>,
}

impl MarketContext {
    pub fn price_of(&self, symbol: &str) -> Option<Decimal> {
        self.quotes
            .iter()
            .find(|q| q.symbol == symbol)
            .map(|q| q.price)
    }
}
