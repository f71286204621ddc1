//! Two-choice shard selection and pooling.
//!
//! Sharding spreads concurrent writers over independent rows. A request probes one random
//! shard; when that shard already exists and there are at least three shards, a second
//! distinct shard is probed too:
//!
//! - one shard admits alone: it takes the request;
//! - both admit: the one left with more tokens takes it, keeping shards level;
//! - neither admits: the two are pooled by [`combine`].

use super::evaluate::{evaluate, settle, Evaluation};
use super::{millis_to_duration, Decision, ShardState};
use crate::config::RateLimitConfig;
use crate::random::RandomSource;
use tracing::debug;

/// One shard read and evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    /// Shard index.
    pub shard: usize,
    /// State as read from the store; `None` for a shard never written.
    pub existing: Option<ShardState>,
    /// Result of consuming the full request from this shard alone.
    pub evaluation: Evaluation,
}

impl Probe {
    /// Evaluate the request against `shard` using the per-shard `config`.
    pub fn evaluate(
        shard: usize,
        existing: Option<ShardState>,
        config: &RateLimitConfig,
        count: f64,
        reserve: bool,
        now: i64,
        random: &dyn RandomSource,
    ) -> Self {
        Self { shard, existing, evaluation: evaluate(existing, config, count, reserve, now, random) }
    }
}

/// A pending write produced by an admitting decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShardUpdate {
    /// Shard index.
    pub shard: usize,
    /// State the decision was computed from; `None` inserts a new row.
    pub previous: Option<ShardState>,
    /// State to persist.
    pub state: ShardState,
}

/// Decision plus the writes that make it durable. Rejections carry no writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub decision: Decision,
    pub updates: Vec<ShardUpdate>,
}

/// Uniform first probe.
pub fn first_shard(shards: usize, random: &dyn RandomSource) -> usize {
    random.index(shards)
}

/// Uniform second probe among the `shards - 1` indices other than `first`.
pub fn second_shard(shards: usize, first: usize, random: &dyn RandomSource) -> usize {
    let draw = random.index(shards - 1);
    if draw >= first {
        draw + 1
    } else {
        draw
    }
}

/// A fresh shard is full, so it never needs a partner; below three shards pooling would
/// span the whole limit and is skipped.
pub fn needs_second(shards: usize, first: &Probe) -> bool {
    shards >= 3 && first.existing.is_some()
}

/// Pick the outcome from one or two probes.
pub fn resolve(
    first: Probe,
    second: Option<Probe>,
    config: &RateLimitConfig,
    count: f64,
    reserve: bool,
    now: i64,
) -> Outcome {
    let Some(second) = second else {
        return alone(first);
    };
    match (first.evaluation.admitted, second.evaluation.admitted) {
        (true, false) => alone(first),
        (false, true) => alone(second),
        (true, true) => {
            if second.evaluation.state.value > first.evaluation.state.value {
                alone(second)
            } else {
                alone(first)
            }
        }
        (false, false) => combine(first, second, config, count, reserve, now),
    }
}

/// Pool two shards that each failed alone.
///
/// `balance` is the pair's combined value after consumption. Each shard lends or borrows
/// `value + count - balance / 2` so both end at `balance / 2`, then the admission rule runs
/// on each. Equal values under one config must agree, so a split verdict is a bug.
pub fn combine(
    a: Probe,
    b: Probe,
    config: &RateLimitConfig,
    count: f64,
    reserve: bool,
    now: i64,
) -> Outcome {
    let balance = a.evaluation.state.value + b.evaluation.state.value + count;
    let pooled = balance / 2.0;
    let left = settle(pooled, a.evaluation.state.ts, config, reserve, now);
    let right = settle(pooled, b.evaluation.state.ts, config, reserve, now);
    debug!(first = a.shard, second = b.shard, balance, admitted = left.admitted, "pooled shards");

    match (left.admitted, right.admitted) {
        (true, true) => {
            let retry_after = match (left.retry_after, right.retry_after) {
                (None, None) => None,
                (l, r) => Some(l.unwrap_or(0.0).max(r.unwrap_or(0.0))),
            };
            Outcome {
                decision: Decision::Admitted { retry_after: retry_after.map(millis_to_duration) },
                updates: vec![
                    ShardUpdate { shard: a.shard, previous: a.existing, state: left.state },
                    ShardUpdate { shard: b.shard, previous: b.existing, state: right.state },
                ],
            }
        }
        (false, false) => {
            let retry_after = left.retry_after.unwrap_or(0.0).max(right.retry_after.unwrap_or(0.0));
            Outcome {
                decision: Decision::Rejected { retry_after: millis_to_duration(retry_after) },
                updates: Vec::new(),
            }
        }
        (left_ok, right_ok) => panic!(
            "pooled shards {} and {} split on admission ({} vs {}) at value {}",
            a.shard, b.shard, left_ok, right_ok, pooled
        ),
    }
}

/// Run the full probe against synchronously readable state.
///
/// `config` is the whole limit; `read` returns the stored state of a shard index.
pub fn select(
    config: &RateLimitConfig,
    count: f64,
    reserve: bool,
    now: i64,
    random: &dyn RandomSource,
    mut read: impl FnMut(usize) -> Option<ShardState>,
) -> Outcome {
    let shards = config.shards();
    let per_shard = config.per_shard();
    let index = first_shard(shards, random);
    let first = Probe::evaluate(index, read(index), &per_shard, count, reserve, now, random);
    let second = needs_second(shards, &first).then(|| {
        let index = second_shard(shards, first.shard, random);
        Probe::evaluate(index, read(index), &per_shard, count, reserve, now, random)
    });
    resolve(first, second, &per_shard, count, reserve, now)
}

fn alone(probe: Probe) -> Outcome {
    let evaluation = probe.evaluation;
    if evaluation.admitted {
        Outcome {
            decision: Decision::Admitted { retry_after: evaluation.retry_after.map(millis_to_duration) },
            updates: vec![ShardUpdate {
                shard: probe.shard,
                previous: probe.existing,
                state: evaluation.state,
            }],
        }
    } else {
        Outcome {
            decision: Decision::Rejected {
                retry_after: millis_to_duration(evaluation.retry_after.unwrap_or_default()),
            },
            updates: Vec::new(),
        }
    }
}
