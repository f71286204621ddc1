//! Single-shard state transition.
//!
//! Evaluation is split into two steps so the selector can re-settle pooled shards:
//! - [`replenish`] credits the tokens earned since the state's timestamp, capped at capacity.
//! - [`settle`] applies the admission rule to a post-consumption value.
//!
//! All functions take the *per-shard* config (see [`RateLimitConfig::per_shard`]).

use super::ShardState;
use crate::config::RateLimitConfig;
use crate::random::RandomSource;

/// Result of evaluating one shard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// State after consumption. Persisted only when `admitted`.
    pub state: ShardState,
    /// Whether this shard alone can take the request.
    pub admitted: bool,
    /// Milliseconds until the shard's value is back to zero; present whenever
    /// `state.value` is negative.
    pub retry_after: Option<f64>,
}

/// State for a shard that has never been written: full capacity.
///
/// Fixed windows are aligned to `start` when configured, otherwise to a random phase, and then
/// moved to the latest boundary at or before `now`.
pub fn initial_state(config: &RateLimitConfig, now: i64, random: &dyn RandomSource) -> ShardState {
    let value = config.capacity();
    match config {
        RateLimitConfig::TokenBucket(_) => ShardState { value, ts: now },
        RateLimitConfig::FixedWindow(window) => {
            let period = config.period_millis();
            let anchor = window.start.unwrap_or_else(|| random.phase(period));
            let ts = anchor + now.saturating_sub(anchor).div_euclid(period) * period;
            ShardState { value, ts }
        }
    }
}

/// Credit tokens earned between `state.ts` and `now`.
///
/// A `now` behind the stored timestamp (clock skew between writers) earns nothing and never
/// moves the timestamp backwards.
pub fn replenish(state: ShardState, config: &RateLimitConfig, now: i64) -> ShardState {
    let max = config.capacity();
    let rate = config.rate();
    let period = config.period_millis();
    let elapsed = now.saturating_sub(state.ts).max(0);
    match config {
        RateLimitConfig::TokenBucket(_) => {
            let earned = elapsed as f64 * rate / period as f64;
            ShardState { value: (state.value + earned).min(max), ts: state.ts.max(now) }
        }
        RateLimitConfig::FixedWindow(_) => {
            let windows = elapsed / period;
            ShardState {
                value: (state.value + rate * windows as f64).min(max),
                ts: state.ts + windows * period,
            }
        }
    }
}

/// Apply the admission rule to a post-consumption `value` at window/touch time `ts`.
pub fn settle(
    value: f64,
    ts: i64,
    config: &RateLimitConfig,
    reserve: bool,
    now: i64,
) -> Evaluation {
    let retry_after = (value < 0.0).then(|| retry_millis(value, ts, config, now));
    let admitted = value >= 0.0
        || (reserve && config.max_reserved().map_or(true, |max_reserved| -value <= max_reserved));
    Evaluation { state: ShardState { value, ts }, admitted, retry_after }
}

/// Evaluate consuming `count` tokens from one shard.
pub fn evaluate(
    existing: Option<ShardState>,
    config: &RateLimitConfig,
    count: f64,
    reserve: bool,
    now: i64,
    random: &dyn RandomSource,
) -> Evaluation {
    let state = existing.unwrap_or_else(|| initial_state(config, now, random));
    let replenished = replenish(state, config, now);
    settle(replenished.value - count, replenished.ts, config, reserve, now)
}

fn retry_millis(value: f64, ts: i64, config: &RateLimitConfig, now: i64) -> f64 {
    let rate = config.rate();
    let period = config.period_millis() as f64;
    match config {
        RateLimitConfig::TokenBucket(_) => -value * period / rate,
        RateLimitConfig::FixedWindow(_) => {
            let windows = (-value / rate).ceil();
            ts.saturating_sub(now) as f64 + period * windows
        }
    }
}
