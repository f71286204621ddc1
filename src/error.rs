//! Error types for limit configuration and admission.
use std::time::Duration;

/// A limit or request that can never be satisfied.
///
/// Always a caller bug, never transient exhaustion.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Rate must be positive and finite.
    #[error("rate must be a positive finite number (got {0})")]
    InvalidRate(f64),
    /// Period must be at least one millisecond.
    #[error("period must be at least 1ms (got {0:?})")]
    InvalidPeriod(Duration),
    /// At least one shard is required.
    #[error("shards must be >= 1 (got {0})")]
    InvalidShards(usize),
    /// Capacity must be positive and finite.
    #[error("capacity must be a positive finite number (got {0})")]
    InvalidCapacity(f64),
    /// Reservation bound must be non-negative and finite.
    #[error("max_reserved must be a non-negative finite number (got {0})")]
    InvalidMaxReserved(f64),
    /// Count must be non-negative and finite.
    #[error("count must be a non-negative finite number (got {0})")]
    InvalidCount(f64),
    /// Shard index outside `[0, shards)`.
    #[error("shard {shard} is out of range for {shards} shards")]
    ShardOutOfRange {
        /// Requested index.
        shard: usize,
        /// Configured shard count.
        shards: usize,
    },
    /// A limiter must attempt each consumption at least once.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    /// More tokens requested than the limit can ever hold.
    #[error("count {count} exceeds the maximum of {max} tokens available at once")]
    CountExceedsCapacity {
        /// Tokens requested.
        count: f64,
        /// Largest satisfiable count.
        max: f64,
    },
    /// More tokens requested than capacity plus the reservation bound.
    #[error("count {count} exceeds the maximum of {max} tokens that can be reserved at once")]
    CountExceedsReservation {
        /// Tokens requested.
        count: f64,
        /// Largest satisfiable count, reservations included.
        max: f64,
    },
}

/// Errors produced by [`RateLimiter`](crate::RateLimiter) operations.
///
/// `E` is the store's error type.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum LimiterError<E = std::convert::Infallible> {
    /// The request can never succeed under its configuration.
    #[error("invalid rate limit request: {0}")]
    Configuration(#[from] ConfigurationError),
    /// The request was rejected and the caller asked for rejections as errors.
    #[error("rate limit '{name}' exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// Limit name from the request.
        name: String,
        /// How long to wait before retrying.
        retry_after: Duration,
    },
    /// No configuration registered under the requested name.
    #[error("no rate limit registered as '{name}'")]
    UnknownLimit {
        /// Name that could not be resolved.
        name: String,
    },
    /// Every attempt lost a write conflict against concurrent callers.
    #[error("shard writes conflicted {attempts} times in a row")]
    Contention {
        /// Attempts made before giving up.
        attempts: usize,
    },
    /// The backing store failed.
    #[error("shard store failed: {0}")]
    Store(#[source] E),
}

impl<E> LimiterError<E> {
    /// Check if this error is a rate limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
    /// Check if this error is due to an unsatisfiable request.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
    /// Check if this error is due to exhausted write attempts.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }
    /// Retry delay carried by a rate limit rejection.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
    /// Borrow the configuration error if present.
    pub fn as_configuration(&self) -> Option<&ConfigurationError> {
        match self {
            Self::Configuration(e) => Some(e),
            _ => None,
        }
    }
    /// Get the store error if this is a `Store` variant.
    pub fn into_store(self) -> Option<E> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}
