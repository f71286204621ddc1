//! Static request checks.
//!
//! A request fails here when it could never succeed: more tokens than the reachable capacity,
//! or more than capacity plus the reservation bound. That is a bug in the caller, so it is an
//! error rather than a rejection with a retry time.

use crate::config::RateLimitConfig;
use crate::error::ConfigurationError;

/// Check `config` and the request parameters against each other.
///
/// A request draws on at most two pooled shards, so with `n >= 3` shards the reachable
/// capacity is `capacity * 2 / n` (see [`RateLimitConfig::shard_factor`]).
pub fn validate(config: &RateLimitConfig, count: f64, reserve: bool) -> Result<(), ConfigurationError> {
    config.validate()?;
    if !(count.is_finite() && count >= 0.0) {
        return Err(ConfigurationError::InvalidCount(count));
    }
    let shard_factor = config.shard_factor();
    let max = config.capacity() / shard_factor;
    if reserve {
        if let Some(max_reserved) = config.max_reserved() {
            let max = max + max_reserved / shard_factor;
            if count > max {
                return Err(ConfigurationError::CountExceedsReservation { count, max });
            }
        }
    } else if count > max {
        return Err(ConfigurationError::CountExceedsCapacity { count, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn count_above_capacity_fails_without_reserve() {
        let config = RateLimitConfig::fixed_window(1.0, SECOND).build().unwrap();
        let err = validate(&config, 2.0, false).unwrap_err();
        assert_eq!(err, ConfigurationError::CountExceedsCapacity { count: 2.0, max: 1.0 });
        assert!(err.to_string().contains("maximum of 1 "));
        assert!(validate(&config, 1.0, false).is_ok());
    }

    #[test]
    fn unbounded_reservation_accepts_any_count() {
        let config = RateLimitConfig::token_bucket(1.0, SECOND).build().unwrap();
        assert!(validate(&config, 1_000.0, true).is_ok());
    }

    #[test]
    fn bounded_reservation_adds_to_capacity() {
        let config = RateLimitConfig::token_bucket(2.0, SECOND).max_reserved(3.0).build().unwrap();
        assert!(validate(&config, 5.0, true).is_ok());
        assert_eq!(
            validate(&config, 5.5, true),
            Err(ConfigurationError::CountExceedsReservation { count: 5.5, max: 5.0 })
        );
    }

    #[test]
    fn sharding_shrinks_reachable_capacity() {
        let config = RateLimitConfig::token_bucket(10.0, SECOND).shards(10).build().unwrap();
        assert!(validate(&config, 2.0, false).is_ok());
        assert_eq!(
            validate(&config, 2.5, false),
            Err(ConfigurationError::CountExceedsCapacity { count: 2.5, max: 2.0 })
        );

        let two = RateLimitConfig::token_bucket(10.0, SECOND).shards(2).build().unwrap();
        assert!(validate(&two, 10.0, false).is_ok());
    }

    #[test]
    fn sharded_reservation_bound_scales_too() {
        let config = RateLimitConfig::fixed_window(6.0, SECOND)
            .max_reserved(6.0)
            .shards(6)
            .build()
            .unwrap();
        assert!(validate(&config, 4.0, true).is_ok());
        assert!(validate(&config, 4.5, true).is_err());
    }

    #[test]
    fn bad_counts_and_configs_fail() {
        let config = RateLimitConfig::token_bucket(1.0, SECOND).build().unwrap();
        assert_eq!(validate(&config, -1.0, false), Err(ConfigurationError::InvalidCount(-1.0)));
        assert!(matches!(validate(&config, f64::NAN, true), Err(ConfigurationError::InvalidCount(_))));

        let broken = RateLimitConfig::TokenBucket(crate::config::TokenBucketConfig {
            shards: Some(0),
            ..RateLimitConfig::token_bucket(1.0, SECOND)
        });
        assert_eq!(validate(&broken, 1.0, false), Err(ConfigurationError::InvalidShards(0)));
    }
}
