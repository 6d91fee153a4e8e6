use std::time::Duration;

use async_trait::async_trait;
use moltapp_models::{AgentConfig, Decision, MarketContext};

use crate::claude_cli::{invoke_claude, ClaudeCliConfig};
use crate::error::AgentError;
use crate::parser::parse_decision;
use crate::prompts::{market_prompt, trading_system_prompt};

/// A competing trading agent: the reasoning backend. Mockable for testing.
#[async_trait]
pub trait TradingAgent: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;

    async fn decide(&self, context: &MarketContext) -> Result<Decision, AgentError>;
}

/// An agent that reasons through the Claude CLI.
pub struct ClaudeAgent {
    pub id: String,
    pub name: String,
    pub strategy: String,
    pub cli_config: ClaudeCliConfig,
}

impl ClaudeAgent {
    pub fn new(config: &AgentConfig, default_model: &str, timeout: Duration) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            strategy: config.strategy.clone(),
            cli_config: ClaudeCliConfig {
                model: config
                    .model
                    .clone()
                    .unwrap_or_else(|| default_model.to_string()),
                timeout,
                ..ClaudeCliConfig::default()
            },
        }
    }
}

#[async_trait]
impl TradingAgent for ClaudeAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, context: &MarketContext) -> Result<Decision, AgentError> {
        let system_prompt = trading_system_prompt(&self.name, &self.strategy);
        let user_prompt = market_prompt(context)?;
        let raw_output =
            invoke_claude(&self.id, &system_prompt, &user_prompt, &self.cli_config).await?;
        parse_decision(&raw_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_falls_back_to_default() {
        let config = AgentConfig {
            id: "gpt".to_string(),
            name: "GPT".to_string(),
            model: None,
            strategy: "Momentum".to_string(),
            enabled: true,
        };
        let agent = ClaudeAgent::new(&config, "claude-haiku-4-5", Duration::from_secs(20));
        assert_eq!(agent.id(), "gpt");
        assert_eq!(agent.cli_config.model, "claude-haiku-4-5");
        assert_eq!(agent.cli_config.timeout, Duration::from_secs(20));
        assert_eq!(agent.cli_config.program, "claude");

        let pinned = AgentConfig {
            model: Some("claude-opus-4-1".to_string()),
            ..config
        };
        let agent = ClaudeAgent::new(&pinned, "claude-haiku-4-5", Duration::from_secs(20));
        assert_eq!(agent.cli_config.model, "claude-opus-4-1");
    }
}
