use async_trait::async_trait;
use chrono::Utc;
use moltapp_models::{MarketConfig, MarketContext, MarketQuote};

use crate::error::AgentError;

/// The price feed. Fetching a snapshot is the precondition of every round.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn snapshot(&self, round_id: &str) -> Result<MarketContext, AgentError>;
}

/// Serves the configured reference prices.
pub struct StaticMarketData {
    quotes: Vec<MarketQuote>,
}

impl StaticMarketData {
    pub fn new(quotes: Vec<MarketQuote>) -> Self {
        Self { quotes }
    }

    pub fn from_config(config: &MarketConfig) -> Self {
        Self::new(
            config
                .symbols
                .iter()
                .map(|s| MarketQuote {
                    symbol: s.symbol.clone(),
                    price: s.price,
                    change_24h_pct: None,
                })
                .collect(),
        )
    }
}

#[async_trait]
impl MarketDataSource for StaticMarketData {
    async fn snapshot(&self, round_id: &str) -> Result<MarketContext, AgentError> {
        if self.quotes.is_empty() {
            return Err(AgentError::MarketData("no symbols configured".to_string()));
        }
        Ok(MarketContext {
            round_id: round_id.to_string(),
            quotes: self.quotes.clone(),
            fetched_at: Utc::now(),
        })
    }
}
