pub mod bucket;
pub mod error;
pub mod registry;

pub use bucket::{RateLimiterMetrics, TokenBucket};
pub use error::LimiterError;
pub use registry::RateLimiters;
