use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decision::TradeAction;

/// Sentinel symbol for cross-symbol sentiment signals.
pub const MARKET_SYMBOL: &str = "MARKET";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStrength {
    /// Every agent in the round agrees.
    Unanimous,
    /// Two or more agents, but not all.
    Majority,
}

/// Agreement of two or more agents on the same symbol and action within one round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusSignal {
    pub round_id: String,
    /// A traded symbol, or [`MARKET_SYMBOL`] for cross-symbol sentiment.
    pub symbol: String,
    pub action: TradeAction,
    pub agent_count: usize,
    pub agreeing_agents: Vec<String>,
    pub dissenting_agents: Vec<String>,
    /// Weighted and boosted, 0 to 100.
    pub confidence: u8,
    pub strength: ConsensusStrength,
    pub average_quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl ConsensusSignal {
    pub fn is_market_wide(&self) -> bool {
        self.symbol == MARKET_SYMBOL
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DivergentDecision {
    pub agent_id: String,
    pub action: TradeAction,
    pub confidence: u8,
    pub quantity: Decimal,
}

/// Same-symbol, opposite-direction decisions within one round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusDivergence {
    pub round_id: String,
    pub symbol: String,
    pub decisions: Vec<DivergentDecision>,
    /// 0 to 100.
    pub divergence_score: u8,
    pub is_bull_bear_split: bool,
    pub timestamp: DateTime<Utc>,
}

/// Consensus analysis of one completed round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundConsensus {
    pub round_id: String,
    pub signals: Vec<ConsensusSignal>,
    pub divergences: Vec<ConsensusDivergence>,
    /// Agent ids that produced a decision this round.
    pub participants: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl RoundConsensus {
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.divergences.is_empty()
    }
}
