use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of event kinds published during a round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    RoundStarted,
    AgentDecision,
    TradeExecuted,
    TradeFailed,
    ConsensusSignal,
    DivergenceDetected,
    RoundCompleted,
    RoundFailed,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    /// Monotonically increasing per bus.
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl StreamEvent {
    /// The `agent_id` field of the payload, when the event concerns one agent.
    pub fn agent_id(&self) -> Option<&str> {
        self.data.get("agent_id").and_then(|v| v.as_str())
    }
}

/// Subscription filter. An absent field matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventFilter {
    pub types: Option<Vec<StreamEventType>>,
    /// Only constrains events that carry an `agent_id`; round-level events always pass.
    pub agent_ids: Option<Vec<String>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn types(types: impl IntoIterator<Item = StreamEventType>) -> Self {
        Self {
            types: Some(types.into_iter().collect()),
            agent_ids: None,
        }
    }

    pub fn with_agents<S: Into<String>>(mut self, agents: impl IntoIterator<Item = S>) -> Self {
        self.agent_ids = Some(agents.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, event: &StreamEvent) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let (Some(agent_ids), Some(agent)) = (&self.agent_ids, event.agent_id()) {
            if !agent_ids.iter().any(|a| a == agent) {
                return false;
            }
        }
        true
    }
}
