//! Convenient re-exports for common tollgate types.
pub use crate::{
    clock::{Clock, SystemClock},
    config::{FixedWindowConfig, RateLimitConfig, TokenBucketConfig},
    error::{ConfigurationError, LimiterError},
    rate_limit::{Decision, InMemoryShardStore, RateLimitLayer, RateLimiter, Request, ShardStore},
    registry::LimitRegistry,
};
