use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level configuration for MoltApp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Timing knobs for a trading round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Per-agent timeout for the reasoning backend in seconds.
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_seconds: u64,
    /// Per-trade timeout for the execution backend in seconds.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_seconds: u64,
    /// Lower bound of the random delay applied before each execution call.
    #[serde(default = "default_jitter_min")]
    pub jitter_min_ms: u64,
    /// Upper bound of the random delay applied before each execution call.
    #[serde(default = "default_jitter_max")]
    pub jitter_max_ms: u64,
    /// Interval between scheduled rounds in seconds.
    #[serde(default = "default_round_interval")]
    pub round_interval_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            decision_timeout_seconds: default_decision_timeout(),
            execution_timeout_seconds: default_execution_timeout(),
            jitter_min_ms: default_jitter_min(),
            jitter_max_ms: default_jitter_max(),
            round_interval_seconds: default_round_interval(),
        }
    }
}

/// Token-bucket settings for one external dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimiterConfig {
    pub max_tokens: u32,
    /// Tokens added per elapsed interval.
    pub refill_rate: u32,
    pub refill_interval_ms: u64,
    /// None = unbounded queue.
    #[serde(default)]
    pub max_queue_size: Option<usize>,
    /// Tokens at construction. Defaults to `max_tokens`.
    #[serde(default)]
    pub initial_tokens: Option<u32>,
}

impl RateLimiterConfig {
    pub fn new(max_tokens: u32, refill_rate: u32, refill_interval_ms: u64) -> Self {
        Self {
            max_tokens,
            refill_rate,
            refill_interval_ms,
            max_queue_size: None,
            initial_tokens: None,
        }
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    pub fn with_initial_tokens(mut self, tokens: u32) -> Self {
        self.initial_tokens = Some(tokens);
        self
    }
}

/// One independent bucket per external dependency class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitsConfig {
    /// The LLM reasoning backends: slow, low per-minute budget.
    #[serde(default = "default_reasoning_limits")]
    pub reasoning: RateLimiterConfig,
    /// The trade settlement backend.
    #[serde(default = "default_execution_limits")]
    pub execution: RateLimiterConfig,
    /// The price feed.
    #[serde(default = "default_market_data_limits")]
    pub market_data: RateLimiterConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            reasoning: default_reasoning_limits(),
            execution: default_execution_limits(),
            market_data: default_market_data_limits(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Number of events kept for replay.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusConfig {
    /// Rounds kept in the rolling in-memory history.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Path to the SQLite database holding rounds and consensus records.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
        }
    }
}

/// Tradable symbols with reference prices for the static feed and paper settlement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<SymbolConfig>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolConfig {
    pub symbol: String,
    pub price: Decimal,
}

/// Configuration for the competing agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentsConfig {
    /// Model used when an agent does not override it.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            agents: default_agents(),
        }
    }
}

impl AgentsConfig {
    pub fn enabled(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents.iter().filter(|a| a.enabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    /// Override model for this agent. Falls back to `AgentsConfig::default_model`.
    #[serde(default)]
    pub model: Option<String>,
    /// Trading persona given to the agent's system prompt.
    #[serde(default)]
    pub strategy: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_decision_timeout() -> u64 {
    60
}
fn default_execution_timeout() -> u64 {
    30
}
fn default_jitter_min() -> u64 {
    1_000
}
fn default_jitter_max() -> u64 {
    5_000
}
fn default_round_interval() -> u64 {
    1_800
}
fn default_reasoning_limits() -> RateLimiterConfig {
    RateLimiterConfig::new(10, 10, 60_000).with_max_queue_size(50)
}
fn default_execution_limits() -> RateLimiterConfig {
    RateLimiterConfig::new(5, 5, 1_000).with_max_queue_size(100)
}
fn default_market_data_limits() -> RateLimiterConfig {
    RateLimiterConfig::new(20, 20, 1_000).with_max_queue_size(200)
}
fn default_buffer_capacity() -> usize {
    200
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_history_size() -> usize {
    100
}
fn default_sqlite_path() -> String {
    "data/moltapp.db".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}
fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<SymbolConfig> {
    [
        ("AAPLx", Decimal::new(22850, 2)),
        ("TSLAx", Decimal::new(34210, 2)),
        ("NVDAx", Decimal::new(13120, 2)),
        ("GOOGLx", Decimal::new(17640, 2)),
        ("AMZNx", Decimal::new(21075, 2)),
        ("MSFTx", Decimal::new(42830, 2)),
        ("METAx", Decimal::new(58710, 2)),
        ("SPYx", Decimal::new(59120, 2)),
        ("COINx", Decimal::new(26890, 2)),
        ("GMEx", Decimal::new(2715, 2)),
    ]
    .into_iter()
    .map(|(symbol, price)| SymbolConfig {
        symbol: symbol.to_string(),
        price,
    })
    .collect()
}

fn default_agents() -> Vec<AgentConfig> {
    [
        ("claude", "Claude", "Value investor focused on fundamentals and margin of safety."),
        ("gpt", "GPT", "Momentum trader following trend strength and volume."),
        ("grok", "Grok", "Contrarian trader fading crowded moves and sentiment extremes."),
    ]
    .into_iter()
    .map(|(id, name, strategy)| AgentConfig {
        id: id.to_string(),
        name: name.to_string(),
        model: None,
        strategy: strategy.to_string(),
        enabled: true,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn roundtrip_app_config() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn default_config_has_three_agents() {
        let agents = AgentsConfig::default();
        assert_eq!(agents.agents.len(), 3);
        assert_eq!(agents.enabled().count(), 3);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.stream.buffer_capacity, 200);
        assert_eq!(config.stream.heartbeat_interval_seconds, 30);
        assert_eq!(config.orchestrator.jitter_min_ms, 1_000);
        assert_eq!(config.rate_limits.reasoning.refill_interval_ms, 60_000);
        assert_eq!(config.rate_limits.execution.max_queue_size, Some(100));
        assert_eq!(config.market.symbols.len(), 10);
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[orchestrator]
decision_timeout_seconds = 20
jitter_min_ms = 0
jitter_max_ms = 0

[rate_limits.reasoning]
max_tokens = 2
refill_rate = 2
refill_interval_ms = 1000
max_queue_size = 3

[rate_limits.execution]
max_tokens = 1
refill_rate = 1
refill_interval_ms = 500
initial_tokens = 0

[store]
sqlite_path = "/tmp/rounds.db"

[[market.symbols]]
symbol = "AAPLx"
price = "228.50"

[agents]
default_model = "claude-3-5-haiku-latest"

[[agents.agents]]
id = "claude"
name = "Claude"
strategy = "value"

[[agents.agents]]
id = "grok"
name = "Grok"
model = "grok-4"
enabled = false
"#;

        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.orchestrator.decision_timeout_seconds, 20);
        assert_eq!(config.orchestrator.execution_timeout_seconds, 30);
        assert_eq!(config.rate_limits.reasoning.max_queue_size, Some(3));
        assert_eq!(config.rate_limits.execution.initial_tokens, Some(0));
        assert_eq!(config.rate_limits.market_data.max_tokens, 20);
        assert_eq!(config.store.sqlite_path, "/tmp/rounds.db");
        assert_eq!(config.market.symbols[0].price, dec!(228.50));
        assert_eq!(config.agents.agents.len(), 2);
        assert_eq!(config.agents.enabled().count(), 1);
        assert_eq!(config.agents.agents[1].model.as_deref(), Some("grok-4"));
    }
}
