//! Admission decisions over sharded limiter state.
//!
//! This module provides the building blocks for rate limiting:
//! - [`evaluate`]: The per-shard state transition for token bucket and fixed window limits.
//! - [`validate`]: Rejects requests that no amount of waiting could satisfy.
//! - [`select`]: Probes one or two shards and pools them when neither suffices alone.
//! - [`RateLimiter`]: Runs the above against a [`ShardStore`] for check, consume and reset.
//! - [`RateLimitLayer`]: Tower middleware that consumes a token per request.
//!
//! # Architecture
//!
//! - **Logic**: `evaluate`, `validate` and `select` are pure functions of their inputs plus an
//!   injected [`RandomSource`](crate::random::RandomSource). They never touch storage.
//! - **Storage**: `ShardStore` reads and writes `(name, key, shard)` rows. It owns atomicity;
//!   the limiter re-runs the whole read-evaluate-write sequence when a write conflicts.
//! - **Middleware**: `RateLimitLayer` wraps a service and asks the limiter before each call.

use crate::config::RateLimitConfig;
use std::time::Duration;

pub mod evaluate;
pub mod limiter;
pub mod middleware;
pub mod select;
pub mod store;
pub mod validate;

pub use limiter::{RateLimiter, ShardValue};
pub use middleware::{AdmissionError, RateLimitLayer, RateLimitService};
pub use store::{InMemoryShardStore, ShardId, ShardStore, ShardWrite};

/// Persisted state of one shard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShardState {
    /// Tokens remaining; negative while a reservation is outstanding.
    pub value: f64,
    /// Token bucket: epoch millis of the last consumption.
    /// Fixed window: epoch millis at which the current window began.
    pub ts: i64,
}

/// The outcome of a limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The request may proceed.
    Admitted {
        /// Present when the request was admitted against a reservation: the caller must
        /// wait this long before doing the reserved work.
        retry_after: Option<Duration>,
    },
    /// The request was refused.
    Rejected {
        /// How long until the same request could succeed.
        retry_after: Duration,
    },
}

impl Decision {
    /// Helper to check if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }

    /// Wait carried by either variant.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Admitted { retry_after } => *retry_after,
            Decision::Rejected { retry_after } => Some(*retry_after),
        }
    }
}

/// A single admission request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Limit name, e.g. `"sendMessage"`.
    pub name: String,
    /// Per-tenant key. `None` shares one limiter across all callers of `name`.
    pub key: Option<String>,
    /// Tokens to consume.
    pub count: f64,
    /// Admit against future capacity instead of rejecting.
    pub reserve: bool,
    /// Surface rejections as [`LimiterError::RateLimited`](crate::LimiterError::RateLimited).
    pub throws: bool,
    /// Limit parameters.
    pub config: RateLimitConfig,
}

impl Request {
    /// Consume one token from the global limiter `name`.
    pub fn new(name: impl Into<String>, config: impl Into<RateLimitConfig>) -> Self {
        Self {
            name: name.into(),
            key: None,
            count: 1.0,
            reserve: false,
            throws: false,
            config: config.into(),
        }
    }

    /// Scope the request to `key`.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Consume `count` tokens instead of one.
    pub fn with_count(mut self, count: f64) -> Self {
        self.count = count;
        self
    }

    /// Allow reserving future capacity.
    pub fn with_reserve(mut self, reserve: bool) -> Self {
        self.reserve = reserve;
        self
    }

    /// Return rejections as errors.
    pub fn with_throws(mut self, throws: bool) -> Self {
        self.throws = throws;
        self
    }
}

/// Convert fractional milliseconds into a `Duration`: negative is zero, overflow saturates.
pub(crate) fn millis_to_duration(millis: f64) -> Duration {
    Duration::try_from_secs_f64(millis.max(0.0) / 1000.0).unwrap_or(Duration::MAX)
}
