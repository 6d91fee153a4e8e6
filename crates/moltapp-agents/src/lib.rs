pub mod agent;
pub mod claude_cli;
pub mod error;
pub mod executor;
pub mod market;
pub mod orchestrator;
pub mod parser;
pub mod prompts;

pub mod test_support;

pub use agent::{ClaudeAgent, TradingAgent};
pub use claude_cli::check_cli_available;
pub use error::{AgentError, RoundError};
pub use executor::{PaperExecutor, TradeExecutor};
pub use market::{MarketDataSource, StaticMarketData};
pub use orchestrator::Orchestrator;
