use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("Rate limiter '{limiter}' queue full ({max_queue_size} pending)")]
    QueueFull {
        limiter: String,
        max_queue_size: usize,
    },

    #[error("Rate limiter '{0}' shut down")]
    Shutdown(String),

    #[error("Invalid rate limiter config for '{limiter}': {reason}")]
    InvalidConfig { limiter: String, reason: String },
}
