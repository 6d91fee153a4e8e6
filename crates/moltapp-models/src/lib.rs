pub mod config;
pub mod consensus;
pub mod decision;

pub use config::{
    AgentConfig, AgentsConfig, AppConfig, ConsensusConfig, MarketConfig, OrchestratorConfig,
    RateLimiterConfig, RateLimitsConfig, StoreConfig, StreamConfig, SymbolConfig,
};
pub use consensus::{
    ConsensusDivergence, ConsensusSignal, ConsensusStrength, DivergentDecision, RoundConsensus,
    MARKET_SYMBOL,
};
pub use decision::{
    AgentResult, Decision, ExecutionReceipt, MarketContext, MarketQuote, RoundResult,
    RoundTrigger, TradeAction,
};
