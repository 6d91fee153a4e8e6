use moltapp_limiter::LimiterError;
use thiserror::Error;

/// A failure inside one agent's pipeline. Never fails the round.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Claude CLI error: {0}")]
    Cli(String),

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Rate limited: {0}")]
    RateLimited(#[from] LimiterError),

    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Market data unavailable: {0}")]
    MarketData(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A failure before any agent pipeline starts. The only round-level failure.
#[derive(Error, Debug)]
pub enum RoundError {
    #[error("No agents configured")]
    NoAgents,

    #[error("Market data precondition failed: {0}")]
    MarketData(#[source] AgentError),
}
