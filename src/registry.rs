//! Registry of named limit configurations.
//!
//! Lets callers define limits once (`"sendMessage"`, `"failedLogins"`) and refer to them by
//! name; the limiter itself only ever sees a resolved [`RateLimitConfig`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::RateLimitConfig;
use crate::error::{ConfigurationError, LimiterError};
use crate::rate_limit::{Decision, RateLimiter, Request, ShardStore};
use tracing::warn;

/// Lookup of a name nobody registered.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("no rate limit registered as '{name}'")]
pub struct UnknownLimit {
    /// Identifier that could not be located.
    pub name: String,
}

impl<E> From<UnknownLimit> for LimiterError<E> {
    fn from(err: UnknownLimit) -> Self {
        LimiterError::UnknownLimit { name: err.name }
    }
}

/// In-memory registry backed by an RwLock. Clones share entries.
#[derive(Default, Clone, Debug)]
pub struct LimitRegistry {
    inner: Arc<RwLock<HashMap<String, RateLimitConfig>>>,
}

impl LimitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `config` under `name`, overwriting any existing entry.
    ///
    /// The last registration wins; shards already written under the old config keep their
    /// state and are read with the new parameters.
    pub fn register(
        &self,
        name: impl Into<String>,
        config: impl Into<RateLimitConfig>,
    ) -> Result<(), ConfigurationError> {
        let name = name.into();
        let config = config.into();
        config.validate()?;
        let mut map = self.inner.write().expect("limit registry poisoned");
        if map.contains_key(&name) {
            warn!(target: "tollgate::registry", name = %name, "rate limit replaced; last registration wins");
        }
        map.insert(name, config);
        Ok(())
    }

    /// Config registered under `name`.
    pub fn get(&self, name: &str) -> Option<RateLimitConfig> {
        self.inner.read().expect("limit registry poisoned").get(name).cloned()
    }

    /// Drop `name`, returning its config.
    pub fn remove(&self, name: &str) -> Option<RateLimitConfig> {
        self.inner.write().expect("limit registry poisoned").remove(name)
    }

    /// A one-token global request for `name`, ready for further `with_*` adjustments.
    pub fn request(&self, name: &str) -> Result<Request, UnknownLimit> {
        self.get(name)
            .map(|config| Request::new(name, config))
            .ok_or_else(|| UnknownLimit { name: name.to_string() })
    }

    /// Registered limits sorted by name.
    pub fn snapshot(&self) -> Vec<(String, RateLimitConfig)> {
        let map = self.inner.read().expect("limit registry poisoned");
        let mut entries: Vec<(String, RateLimitConfig)> =
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl<S> RateLimiter<S>
where
    S: ShardStore + 'static,
{
    /// Consume one token from the registered limit `name`, scoped to `key`.
    pub async fn limit(
        &self,
        registry: &LimitRegistry,
        name: &str,
        key: Option<&str>,
    ) -> Result<Decision, LimiterError<S::Error>> {
        let mut request = registry.request(name)?;
        request.key = key.map(str::to_string);
        self.consume(&request).await
    }
}
