use std::sync::Arc;

use moltapp_models::config::RateLimitsConfig;

use crate::bucket::{RateLimiterMetrics, TokenBucket};
use crate::error::LimiterError;

/// Independent buckets, one per external dependency class. They never share tokens.
#[derive(Clone)]
pub struct RateLimiters {
    pub reasoning: Arc<TokenBucket>,
    pub execution: Arc<TokenBucket>,
    pub market_data: Arc<TokenBucket>,
}

impl RateLimiters {
    /// Must be called from within a Tokio runtime.
    pub fn from_config(config: &RateLimitsConfig) -> Result<Self, LimiterError> {
        Ok(Self {
            reasoning: Arc::new(TokenBucket::new("reasoning", config.reasoning.clone())?),
            execution: Arc::new(TokenBucket::new("execution", config.execution.clone())?),
            market_data: Arc::new(TokenBucket::new("market_data", config.market_data.clone())?),
        })
    }

    pub fn metrics(&self) -> Vec<RateLimiterMetrics> {
        vec![
            self.reasoning.metrics(),
            self.execution.metrics(),
            self.market_data.metrics(),
        ]
    }

    /// Shut down every bucket. Returns the total number of rejected queued requests.
    pub fn shutdown(&self) -> usize {
        self.reasoning.shutdown() + self.execution.shutdown() + self.market_data.shutdown()
    }
}
