//! MoltApp - competitive AI trading rounds
//!
//! Several AI agents receive the same market snapshot, decide independently
//! and trade through a shared execution backend. Every round feeds a
//! consensus engine, an event stream and a SQLite history.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use moltapp::models::{AppConfig, RoundTrigger};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = moltapp::load_config("config/moltapp.toml")?;
//! let runtime = moltapp::build_runtime(&config)?;
//! let round = runtime.orchestrator.run_round(RoundTrigger::Scheduled).await?;
//! println!("{} decisions", round.results.len());
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub use moltapp_agents as agents;
pub use moltapp_consensus as consensus;
pub use moltapp_limiter as limiter;
pub use moltapp_models as models;
pub use moltapp_store as store;
pub use moltapp_stream as stream;

pub mod scheduler;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use moltapp_agents::{
    ClaudeAgent, MarketDataSource, Orchestrator, PaperExecutor, StaticMarketData, TradeExecutor,
    TradingAgent,
};
use moltapp_consensus::ConsensusEngine;
use moltapp_limiter::RateLimiters;
use moltapp_models::config::{AppConfig, StoreConfig};
use moltapp_store::{RoundStore, SqliteRoundStore};
use moltapp_stream::EventBus;

/// Everything a running process needs, wired from one [`AppConfig`].
pub struct AppRuntime {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Option<Arc<dyn RoundStore>>,
}

impl AppRuntime {
    /// Wait for pending history writes, then close the rate limiters.
    /// Returns the number of queued requests that were rejected.
    pub async fn shutdown(&self) -> usize {
        self.orchestrator.flush_persistence().await;
        let rejected = self.orchestrator.limiters().shutdown();
        tracing::info!(rejected, "Runtime shut down");
        rejected
    }
}

/// Read and parse a TOML configuration file.
pub fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {path}"))?;
    toml::from_str(&config_str).with_context(|| format!("Failed to parse config: {path}"))
}

/// Open the round history database, creating its directory when needed.
pub fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<SqliteRoundStore>> {
    if let Some(parent) = Path::new(&config.sqlite_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let store = SqliteRoundStore::open(&config.sqlite_path)
        .with_context(|| format!("Failed to open round store: {}", config.sqlite_path))?;
    Ok(Arc::new(store))
}

/// Build the production runtime: Claude CLI agents, paper settlement, the
/// static price feed and the SQLite history.
///
/// Must be called from within a Tokio runtime.
pub fn build_runtime(config: &AppConfig) -> anyhow::Result<AppRuntime> {
    let timeout = Duration::from_secs(config.orchestrator.decision_timeout_seconds);
    let agents: Vec<Arc<dyn TradingAgent>> = config
        .agents
        .enabled()
        .map(|a| {
            Arc::new(ClaudeAgent::new(a, &config.agents.default_model, timeout))
                as Arc<dyn TradingAgent>
        })
        .collect();

    let store: Arc<dyn RoundStore> = open_store(&config.store)?;
    assemble(
        config,
        agents,
        Arc::new(PaperExecutor::from_config(&config.market)),
        Arc::new(StaticMarketData::from_config(&config.market)),
        Some(store),
    )
}

/// Wire a runtime around caller-supplied collaborators.
pub fn assemble(
    config: &AppConfig,
    agents: Vec<Arc<dyn TradingAgent>>,
    executor: Arc<dyn TradeExecutor>,
    market: Arc<dyn MarketDataSource>,
    store: Option<Arc<dyn RoundStore>>,
) -> anyhow::Result<AppRuntime> {
    if agents.is_empty() {
        tracing::warn!("No agents enabled; every round will fail");
    }

    let limiters =
        RateLimiters::from_config(&config.rate_limits).context("Invalid rate limit config")?;

    let mut orchestrator = Orchestrator::new(
        agents,
        executor,
        market,
        limiters,
        config.orchestrator.clone(),
    )
    .with_event_bus(EventBus::new(&config.stream))
    .with_consensus(Arc::new(ConsensusEngine::from_config(&config.consensus)));
    if let Some(store) = &store {
        orchestrator = orchestrator.with_store(Arc::clone(store));
    }

    tracing::info!(
        agents = orchestrator.agent_count(),
        persistent = store.is_some(),
        "Runtime assembled"
    );

    Ok(AppRuntime {
        orchestrator: Arc::new(orchestrator),
        store,
    })
}
