//! Limit configuration: the strategy, its rate, and how it is sharded.
//!
//! A [`RateLimitConfig`] is a plain value supplied with every request. Builders on
//! [`TokenBucketConfig`] and [`FixedWindowConfig`] validate eagerly; configs assembled by
//! hand (or deserialized) are validated again on every request.
//!
//! ```
//! use tollgate::RateLimitConfig;
//! use std::time::Duration;
//!
//! let config = RateLimitConfig::token_bucket(10.0, Duration::from_secs(60))
//!     .capacity(3.0)
//!     .shards(10)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.shards(), 10);
//! ```

use crate::error::ConfigurationError;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Token bucket parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "camelCase"))]
pub struct TokenBucketConfig {
    /// Tokens added per `period`.
    pub rate: f64,
    /// Replenishment period.
    #[cfg_attr(feature = "serde", serde(with = "period_millis"))]
    pub period: Duration,
    /// Most tokens the bucket can hold. Defaults to `rate`.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub capacity: Option<f64>,
    /// Most tokens that can be borrowed ahead. Unbounded when absent.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub max_reserved: Option<f64>,
    /// Storage rows the capacity is split across. Defaults to 1.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub shards: Option<usize>,
}

/// Fixed window parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "camelCase"))]
pub struct FixedWindowConfig {
    /// Tokens granted at each window boundary.
    pub rate: f64,
    /// Window length.
    #[cfg_attr(feature = "serde", serde(with = "period_millis"))]
    pub period: Duration,
    /// Most tokens that can accumulate across windows. Defaults to `rate`.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub capacity: Option<f64>,
    /// Most tokens that can be borrowed from future windows. Unbounded when absent.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub max_reserved: Option<f64>,
    /// Storage rows the capacity is split across. Defaults to 1.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub shards: Option<usize>,
    /// Epoch milliseconds of any window boundary. When absent each shard picks a random
    /// phase in `[0, period)` at creation so independent limiters don't burst in lockstep.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub start: Option<i64>,
}

/// Admission strategy plus its parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(tag = "kind"))]
pub enum RateLimitConfig {
    /// Continuous replenishment at `rate / period`.
    #[cfg_attr(feature = "serde", serde(rename = "token bucket"))]
    TokenBucket(TokenBucketConfig),
    /// `rate` tokens at each aligned window boundary.
    #[cfg_attr(feature = "serde", serde(rename = "fixed window"))]
    FixedWindow(FixedWindowConfig),
}

impl TokenBucketConfig {
    /// Start a token bucket granting `rate` tokens per `period`.
    pub fn new(rate: f64, period: Duration) -> Self {
        Self { rate, period, capacity: None, max_reserved: None, shards: None }
    }

    /// Set the bucket capacity.
    pub fn capacity(mut self, capacity: f64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Bound how far the bucket may go negative through reservations.
    pub fn max_reserved(mut self, max_reserved: f64) -> Self {
        self.max_reserved = Some(max_reserved);
        self
    }

    /// Split the bucket across `shards` rows.
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    /// Validate and wrap.
    pub fn build(self) -> Result<RateLimitConfig, ConfigurationError> {
        let config = RateLimitConfig::TokenBucket(self);
        config.validate()?;
        Ok(config)
    }
}

impl FixedWindowConfig {
    /// Start a fixed window granting `rate` tokens every `period`.
    pub fn new(rate: f64, period: Duration) -> Self {
        Self { rate, period, capacity: None, max_reserved: None, shards: None, start: None }
    }

    /// Allow unused tokens to roll over up to `capacity`.
    pub fn capacity(mut self, capacity: f64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Bound how many future tokens may be reserved.
    pub fn max_reserved(mut self, max_reserved: f64) -> Self {
        self.max_reserved = Some(max_reserved);
        self
    }

    /// Split the window across `shards` rows.
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    /// Anchor window boundaries at `start` epoch milliseconds.
    pub fn start(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    /// Validate and wrap.
    pub fn build(self) -> Result<RateLimitConfig, ConfigurationError> {
        let config = RateLimitConfig::FixedWindow(self);
        config.validate()?;
        Ok(config)
    }
}

impl From<TokenBucketConfig> for RateLimitConfig {
    fn from(config: TokenBucketConfig) -> Self {
        RateLimitConfig::TokenBucket(config)
    }
}

impl From<FixedWindowConfig> for RateLimitConfig {
    fn from(config: FixedWindowConfig) -> Self {
        RateLimitConfig::FixedWindow(config)
    }
}

impl RateLimitConfig {
    /// Begin a token bucket config.
    pub fn token_bucket(rate: f64, period: Duration) -> TokenBucketConfig {
        TokenBucketConfig::new(rate, period)
    }

    /// Begin a fixed window config.
    pub fn fixed_window(rate: f64, period: Duration) -> FixedWindowConfig {
        FixedWindowConfig::new(rate, period)
    }

    /// Tokens granted per period.
    pub fn rate(&self) -> f64 {
        match self {
            RateLimitConfig::TokenBucket(c) => c.rate,
            RateLimitConfig::FixedWindow(c) => c.rate,
        }
    }

    /// Replenishment period or window length.
    pub fn period(&self) -> Duration {
        match self {
            RateLimitConfig::TokenBucket(c) => c.period,
            RateLimitConfig::FixedWindow(c) => c.period,
        }
    }

    /// Period in whole milliseconds, saturating.
    pub fn period_millis(&self) -> i64 {
        i64::try_from(self.period().as_millis()).unwrap_or(i64::MAX)
    }

    /// Maximum tokens held, defaulting to `rate`.
    pub fn capacity(&self) -> f64 {
        let capacity = match self {
            RateLimitConfig::TokenBucket(c) => c.capacity,
            RateLimitConfig::FixedWindow(c) => c.capacity,
        };
        capacity.unwrap_or_else(|| self.rate())
    }

    /// Reservation bound, if any.
    pub fn max_reserved(&self) -> Option<f64> {
        match self {
            RateLimitConfig::TokenBucket(c) => c.max_reserved,
            RateLimitConfig::FixedWindow(c) => c.max_reserved,
        }
    }

    /// Shard count, defaulting to 1.
    pub fn shards(&self) -> usize {
        let shards = match self {
            RateLimitConfig::TokenBucket(c) => c.shards,
            RateLimitConfig::FixedWindow(c) => c.shards,
        };
        shards.unwrap_or(1)
    }

    /// Window anchor; always `None` for token buckets.
    pub fn start(&self) -> Option<i64> {
        match self {
            RateLimitConfig::TokenBucket(_) => None,
            RateLimitConfig::FixedWindow(c) => c.start,
        }
    }

    /// How many shards' worth of capacity a single request can draw on.
    ///
    /// At most two shards are ever pooled, so with `n >= 3` shards a request sees `2/n` of the
    /// total; below three shards it sees one whole limit.
    pub fn shard_factor(&self) -> f64 {
        let shards = self.shards();
        if shards >= 3 {
            shards as f64 / 2.0
        } else {
            1.0
        }
    }

    /// The slice of this limit owned by one shard: `rate`, `capacity` and `max_reserved`
    /// divided by the shard count.
    pub fn per_shard(&self) -> RateLimitConfig {
        let shards = self.shards();
        if shards <= 1 {
            return self.clone();
        }
        let n = shards as f64;
        let capacity = Some(self.capacity() / n);
        let max_reserved = self.max_reserved().map(|m| m / n);
        match self {
            RateLimitConfig::TokenBucket(c) => RateLimitConfig::TokenBucket(TokenBucketConfig {
                rate: c.rate / n,
                capacity,
                max_reserved,
                ..c.clone()
            }),
            RateLimitConfig::FixedWindow(c) => RateLimitConfig::FixedWindow(FixedWindowConfig {
                rate: c.rate / n,
                capacity,
                max_reserved,
                ..c.clone()
            }),
        }
    }

    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let rate = self.rate();
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ConfigurationError::InvalidRate(rate));
        }
        if self.period() < Duration::from_millis(1) {
            return Err(ConfigurationError::InvalidPeriod(self.period()));
        }
        let capacity = self.capacity();
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(ConfigurationError::InvalidCapacity(capacity));
        }
        if let Some(max_reserved) = self.max_reserved() {
            if !(max_reserved.is_finite() && max_reserved >= 0.0) {
                return Err(ConfigurationError::InvalidMaxReserved(max_reserved));
            }
        }
        if self.shards() == 0 {
            return Err(ConfigurationError::InvalidShards(0));
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
mod period_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(period: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(period.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn defaults_follow_rate() {
        let config = RateLimitConfig::token_bucket(10.0, MINUTE).build().unwrap();
        assert_eq!(config.capacity(), 10.0);
        assert_eq!(config.shards(), 1);
        assert_eq!(config.max_reserved(), None);
        assert_eq!(config.start(), None);
        assert_eq!(config.period_millis(), 60_000);
    }

    #[test]
    fn shard_factor_pools_two_shards() {
        let factor = |shards| RateLimitConfig::token_bucket(1.0, MINUTE).shards(shards).build().unwrap().shard_factor();
        assert_eq!(factor(1), 1.0);
        assert_eq!(factor(2), 1.0);
        assert_eq!(factor(3), 1.5);
        assert_eq!(factor(10), 5.0);
    }

    #[test]
    fn per_shard_conserves_totals() {
        let config = RateLimitConfig::fixed_window(7.0, MINUTE)
            .capacity(11.0)
            .max_reserved(3.0)
            .shards(3)
            .start(5)
            .build()
            .unwrap();
        let shard = config.per_shard();
        assert!((shard.rate() * 3.0 - 7.0).abs() < 1e-9);
        assert!((shard.capacity() * 3.0 - 11.0).abs() < 1e-9);
        assert!((shard.max_reserved().unwrap() * 3.0 - 3.0).abs() < 1e-9);
        assert_eq!(shard.start(), Some(5));
        assert_eq!(shard.period(), MINUTE);
    }

    #[test]
    fn single_shard_is_unchanged() {
        let config = RateLimitConfig::token_bucket(4.0, MINUTE).capacity(8.0).build().unwrap();
        assert_eq!(config.per_shard(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_eq!(
            RateLimitConfig::token_bucket(0.0, MINUTE).build(),
            Err(ConfigurationError::InvalidRate(0.0))
        );
        assert!(matches!(
            RateLimitConfig::token_bucket(1.0, Duration::from_micros(10)).build(),
            Err(ConfigurationError::InvalidPeriod(_))
        ));
        assert_eq!(
            RateLimitConfig::fixed_window(1.0, MINUTE).shards(0).build(),
            Err(ConfigurationError::InvalidShards(0))
        );
        assert_eq!(
            RateLimitConfig::fixed_window(1.0, MINUTE).capacity(-1.0).build(),
            Err(ConfigurationError::InvalidCapacity(-1.0))
        );
        assert_eq!(
            RateLimitConfig::token_bucket(1.0, MINUTE).max_reserved(-2.0).build(),
            Err(ConfigurationError::InvalidMaxReserved(-2.0))
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_tagged_json() {
        let config: RateLimitConfig = serde_json::from_str(
            r#"{"kind":"fixed window","rate":10,"period":60000,"maxReserved":5,"shards":4}"#,
        )
        .unwrap();
        assert_eq!(
            config,
            RateLimitConfig::from(RateLimitConfig::fixed_window(10.0, MINUTE).max_reserved(5.0).shards(4))
        );
        let json = serde_json::to_value(&RateLimitConfig::from(
            RateLimitConfig::token_bucket(1.0, Duration::from_secs(1)),
        ))
        .unwrap();
        assert_eq!(json["kind"], "token bucket");
        assert_eq!(json["period"], 1000);
        assert!(json.get("capacity").is_none());
    }
}
