#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tollgate
//!
//! Application-level admission control: per-request token bucket and fixed window limits
//! over a transactional store, sharded to keep write contention low.
//!
//! ## Features
//!
//! - **Token bucket** and **fixed window** strategies with optional capacity overrides
//! - **Reservations**: admit now against future capacity and get told how long to wait
//! - **Sharding** with two-choice probing and pooling of the probed pair
//! - **Pluggable storage** through [`ShardStore`]; an in-memory store is bundled
//! - **Tower middleware** for per-request limiting
//! - Injectable [`Clock`] and [`RandomSource`] for deterministic tests
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{InMemoryShardStore, RateLimitConfig, RateLimiter, Request};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::new(InMemoryShardStore::new());
//!     let config = RateLimitConfig::token_bucket(10.0, Duration::from_secs(60))
//!         .capacity(3.0)
//!         .build()
//!         .unwrap();
//!
//!     let request = Request::new("sendMessage", config).with_key("user-42");
//!     let decision = limiter.consume(&request).await.unwrap();
//!     assert!(decision.is_admitted());
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod prelude;
pub mod random;
pub mod rate_limit;
pub mod registry;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FixedWindowConfig, RateLimitConfig, TokenBucketConfig};
pub use error::{ConfigurationError, LimiterError};
pub use random::{RandomSource, ScriptedRandom, SeededRandom, ThreadRandom};
pub use rate_limit::{
    AdmissionError, Decision, InMemoryShardStore, RateLimitLayer, RateLimitService, RateLimiter,
    Request, ShardId, ShardState, ShardStore, ShardValue, ShardWrite,
};
pub use registry::{LimitRegistry, UnknownLimit};
