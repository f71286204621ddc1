use async_trait::async_trait;

use super::ShardState;

/// Identifies one stored shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardId {
    pub name: String,
    pub key: Option<String>,
    pub shard: usize,
}

/// A shard write carrying the state it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardWrite {
    pub id: ShardId,
    /// New state.
    pub state: ShardState,
    /// State read before evaluation; `None` means the row must not exist yet.
    pub expected: Option<ShardState>,
}

/// Abstract storage interface for shard state.
///
/// This trait is designed to support both in-memory and transactional backends (SQL rows,
/// a document store, a replicated KV). The limiter treats every call within one consumption
/// as part of a single logical transaction and relies on `write_shards` to detect conflicts.
#[async_trait]
pub trait ShardStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the state of one shard.
    async fn read_shard(
        &self,
        name: &str,
        key: Option<&str>,
        shard: usize,
    ) -> Result<Option<ShardState>, Self::Error>;

    /// Apply every write atomically, inserting or updating rows.
    ///
    /// Each write names the state its caller read (optimistic locking). If any row no longer
    /// matches, nothing is written and `Ok(false)` is returned so the caller can re-evaluate.
    async fn write_shards(&self, writes: &[ShardWrite]) -> Result<bool, Self::Error>;

    /// Remove every shard of `(name, key)`.
    async fn delete_shards(&self, name: &str, key: Option<&str>) -> Result<(), Self::Error>;
}

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

type LimitKey = (String, Option<String>);

/// Simple in-memory shard store.
///
/// Clones share the same rows.
#[derive(Default, Clone, Debug)]
pub struct InMemoryShardStore {
    // (name, key) -> shard index -> state
    data: Arc<Mutex<HashMap<LimitKey, BTreeMap<usize, ShardState>>>>,
}

impl InMemoryShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored shards of `(name, key)`, ordered by index.
    pub fn shards(&self, name: &str, key: Option<&str>) -> Vec<(usize, ShardState)> {
        let guard = self.data.lock().expect("shard store poisoned");
        guard
            .get(&(name.to_string(), key.map(str::to_string)))
            .map(|rows| rows.iter().map(|(shard, state)| (*shard, *state)).collect())
            .unwrap_or_default()
    }

    /// Overwrite one shard, bypassing conflict checks.
    pub fn put(&self, name: &str, key: Option<&str>, shard: usize, state: ShardState) {
        let mut guard = self.data.lock().expect("shard store poisoned");
        guard.entry((name.to_string(), key.map(str::to_string))).or_default().insert(shard, state);
    }

    /// Total number of stored shards.
    pub fn len(&self) -> usize {
        self.data.lock().expect("shard store poisoned").values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ShardStore for InMemoryShardStore {
    type Error = std::convert::Infallible;

    async fn read_shard(
        &self,
        name: &str,
        key: Option<&str>,
        shard: usize,
    ) -> Result<Option<ShardState>, Self::Error> {
        let guard = self.data.lock().expect("shard store poisoned");
        Ok(guard
            .get(&(name.to_string(), key.map(str::to_string)))
            .and_then(|rows| rows.get(&shard))
            .copied())
    }

    async fn write_shards(&self, writes: &[ShardWrite]) -> Result<bool, Self::Error> {
        let mut guard = self.data.lock().expect("shard store poisoned");

        let conflicted = writes.iter().any(|write| {
            let current = guard
                .get(&(write.id.name.clone(), write.id.key.clone()))
                .and_then(|rows| rows.get(&write.id.shard));
            current != write.expected.as_ref()
        });
        if conflicted {
            return Ok(false); // Race detected
        }

        for write in writes {
            guard
                .entry((write.id.name.clone(), write.id.key.clone()))
                .or_default()
                .insert(write.id.shard, write.state);
        }
        Ok(true)
    }

    async fn delete_shards(&self, name: &str, key: Option<&str>) -> Result<(), Self::Error> {
        let mut guard = self.data.lock().expect("shard store poisoned");
        guard.remove(&(name.to_string(), key.map(str::to_string)));
        Ok(())
    }
}
