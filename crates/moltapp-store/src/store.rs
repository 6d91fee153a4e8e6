use async_trait::async_trait;
use moltapp_models::{AgentResult, RoundConsensus, RoundResult};

use crate::error::StoreError;

/// Durable record of completed rounds. Mockable for testing.
///
/// Writes happen off the round's critical path; a failing store never fails a round.
#[async_trait]
pub trait RoundStore: Send + Sync {
    async fn persist_round(&self, round: &RoundResult) -> Result<(), StoreError>;

    async fn persist_consensus(&self, consensus: &RoundConsensus) -> Result<(), StoreError>;

    async fn round(&self, round_id: &str) -> Result<Option<RoundResult>, StoreError>;

    /// Most recent rounds first.
    async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundResult>, StoreError>;

    /// One agent's results across rounds, most recent first.
    async fn agent_history(&self, agent_id: &str, limit: usize)
        -> Result<Vec<AgentResult>, StoreError>;

    async fn consensus_for(&self, round_id: &str) -> Result<Option<RoundConsensus>, StoreError>;
}
