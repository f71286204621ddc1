//! Check, consume and reset against a [`ShardStore`].

use super::evaluate::{initial_state, replenish};
use super::select::{first_shard, needs_second, resolve, second_shard, Outcome, Probe};
use super::store::{ShardId, ShardStore, ShardWrite};
use super::validate::validate;
use super::{Decision, Request, ShardState};
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::{ConfigurationError, LimiterError};
use crate::random::{RandomSource, ThreadRandom};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of read-evaluate-write attempts per consumption.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Replenished view of one shard, as reported by [`RateLimiter::get_value`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShardValue {
    /// Shard index that was sampled.
    pub shard: usize,
    /// Tokens available in that shard now.
    pub value: f64,
    /// Touch time (token bucket) or window start (fixed window).
    pub ts: i64,
    /// The per-shard config the value was computed with.
    pub config: RateLimitConfig,
}

/// Admission control over a shard store.
///
/// Clones share the store, clock and random source.
#[derive(Debug)]
pub struct RateLimiter<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    max_attempts: usize,
}

impl<S> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            random: self.random.clone(),
            max_attempts: self.max_attempts,
        }
    }
}

impl<S> RateLimiter<S>
where
    S: ShardStore + 'static,
{
    /// Create a limiter backed by `store` using the system clock and thread RNG.
    pub fn new(store: S) -> Self {
        Self::with_shared_store(Arc::new(store))
    }

    /// Create a limiter over a store shared with other handles.
    pub fn with_shared_store(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            random: Arc::new(ThreadRandom),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override the random source used for shard choice and window phase.
    pub fn with_random<R: RandomSource + 'static>(mut self, random: R) -> Self {
        self.random = Arc::new(random);
        self
    }

    /// Override how many times a conflicting write is re-evaluated; must be > 0.
    pub fn with_max_attempts(mut self, attempts: usize) -> Result<Self, ConfigurationError> {
        if attempts == 0 {
            return Err(ConfigurationError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decide whether `request` would be admitted without consuming anything.
    pub async fn check(&self, request: &Request) -> Result<Decision, LimiterError<S::Error>> {
        validate(&request.config, request.count, request.reserve)?;
        let now = self.clock.now_millis();
        let outcome = self.decide(request, now).await?;
        debug!(name = %request.name, key = ?request.key, admitted = outcome.decision.is_admitted(), "rate limit check");
        self.finish(request, outcome.decision)
    }

    /// Decide and, when admitted, persist the consumption.
    ///
    /// The read-evaluate-write sequence is re-run from scratch when the store reports a write
    /// conflict, up to the configured number of attempts.
    pub async fn consume(&self, request: &Request) -> Result<Decision, LimiterError<S::Error>> {
        validate(&request.config, request.count, request.reserve)?;
        for attempt in 1..=self.max_attempts {
            let now = self.clock.now_millis();
            let outcome = self.decide(request, now).await?;
            if !outcome.decision.is_admitted() {
                debug!(name = %request.name, key = ?request.key, retry_after = ?outcome.decision.retry_after(), "rate limited");
                return self.finish(request, outcome.decision);
            }

            let writes = Self::writes(request, &outcome);
            if self.store.write_shards(&writes).await.map_err(LimiterError::Store)? {
                debug!(
                    name = %request.name,
                    key = ?request.key,
                    shards = ?outcome.updates.iter().map(|u| u.shard).collect::<Vec<_>>(),
                    retry_after = ?outcome.decision.retry_after(),
                    "rate limit consumed"
                );
                return Ok(outcome.decision);
            }
            warn!(name = %request.name, key = ?request.key, attempt, "shard write conflicted; re-evaluating");
        }
        warn!(name = %request.name, key = ?request.key, attempts = self.max_attempts, "giving up after repeated shard write conflicts");
        Err(LimiterError::Contention { attempts: self.max_attempts })
    }

    /// Forget all state for `(name, key)`, restoring full capacity.
    pub async fn reset(&self, name: &str, key: Option<&str>) -> Result<(), LimiterError<S::Error>> {
        self.store.delete_shards(name, key).await.map_err(LimiterError::Store)?;
        debug!(name, key = ?key, "rate limit reset");
        Ok(())
    }

    /// Report the replenished value of one shard of `(name, key)` without writing.
    ///
    /// A random shard is sampled unless `shard` is given.
    pub async fn get_value(
        &self,
        name: &str,
        key: Option<&str>,
        config: &RateLimitConfig,
        shard: Option<usize>,
    ) -> Result<ShardValue, LimiterError<S::Error>> {
        config.validate()?;
        let shards = config.shards();
        let shard = match shard {
            Some(shard) if shard < shards => shard,
            Some(shard) => return Err(ConfigurationError::ShardOutOfRange { shard, shards }.into()),
            None => first_shard(shards, &*self.random),
        };
        let per_shard = config.per_shard();
        let now = self.clock.now_millis();
        let stored = self.store.read_shard(name, key, shard).await.map_err(LimiterError::Store)?;
        let state = stored.unwrap_or_else(|| initial_state(&per_shard, now, &*self.random));
        let ShardState { value, ts } = replenish(state, &per_shard, now);
        Ok(ShardValue { shard, value, ts, config: per_shard })
    }

    async fn decide(&self, request: &Request, now: i64) -> Result<Outcome, LimiterError<S::Error>> {
        let shards = request.config.shards();
        let per_shard = request.config.per_shard();
        let random = &*self.random;

        let index = first_shard(shards, random);
        let existing = self.read(request, index).await?;
        let first = Probe::evaluate(index, existing, &per_shard, request.count, request.reserve, now, random);

        let second = if needs_second(shards, &first) {
            let index = second_shard(shards, first.shard, random);
            let existing = self.read(request, index).await?;
            Some(Probe::evaluate(index, existing, &per_shard, request.count, request.reserve, now, random))
        } else {
            None
        };
        Ok(resolve(first, second, &per_shard, request.count, request.reserve, now))
    }

    async fn read(&self, request: &Request, shard: usize) -> Result<Option<ShardState>, LimiterError<S::Error>> {
        self.store
            .read_shard(&request.name, request.key.as_deref(), shard)
            .await
            .map_err(LimiterError::Store)
    }

    fn writes(request: &Request, outcome: &Outcome) -> Vec<ShardWrite> {
        outcome
            .updates
            .iter()
            .map(|update| ShardWrite {
                id: ShardId { name: request.name.clone(), key: request.key.clone(), shard: update.shard },
                state: update.state,
                expected: update.previous,
            })
            .collect()
    }

    fn finish(&self, request: &Request, decision: Decision) -> Result<Decision, LimiterError<S::Error>> {
        match decision {
            Decision::Rejected { retry_after } if request.throws => {
                Err(LimiterError::RateLimited { name: request.name.clone(), retry_after })
            }
            decision => Ok(decision),
        }
    }
}
