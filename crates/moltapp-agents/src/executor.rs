use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use moltapp_models::{Decision, ExecutionReceipt, MarketConfig};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::AgentError;

/// The settlement backend. Mockable for testing.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(&self, agent_id: &str, decision: &Decision)
        -> Result<ExecutionReceipt, AgentError>;
}

/// Settles every trade instantly at the configured reference price.
pub struct PaperExecutor {
    prices: HashMap<String, Decimal>,
}

impl PaperExecutor {
    pub fn new(prices: HashMap<String, Decimal>) -> Self {
        Self { prices }
    }

    pub fn from_config(config: &MarketConfig) -> Self {
        Self::new(
            config
                .symbols
                .iter()
                .map(|s| (s.symbol.clone(), s.price))
                .collect(),
        )
    }
}

#[async_trait]
impl TradeExecutor for PaperExecutor {
    async fn execute(
        &self,
        agent_id: &str,
        decision: &Decision,
    ) -> Result<ExecutionReceipt, AgentError> {
        if decision.action.is_hold() {
            return Err(AgentError::Execution("hold decisions are not executed".to_string()));
        }
        if decision.quantity.is_zero() {
            return Err(AgentError::Execution(format!(
                "zero quantity for {}",
                decision.symbol
            )));
        }
        let price = self
            .prices
            .get(&decision.symbol)
            .copied()
            .ok_or_else(|| AgentError::Execution(format!("unknown symbol {}", decision.symbol)))?;

        let transaction_id = format!("paper_{}", Uuid::new_v4().simple());
        info!(
            agent = %agent_id,
            action = %decision.action,
            symbol = %decision.symbol,
            quantity = %decision.quantity,
            price = %price,
            tx = %transaction_id,
            "Paper trade settled"
        );

        Ok(ExecutionReceipt {
            success: true,
            settlement_price: Some(price),
            transaction_id: Some(transaction_id),
            settled_at: Utc::now(),
        })
    }
}
