//! Randomness used for shard selection and fixed-window phase.
//!
//! Notes:
//! - RNG: [`ThreadRandom`] uses `rand`'s thread-local RNG; [`SeededRandom`] wraps a `StdRng`
//!   for reproducible simulations.
//! - [`ScriptedRandom`] replays fixed draws so tests can force which shards get probed.

use rand::rngs::StdRng;
use rand::{rng, Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Source of the uniform draws the limiter needs.
pub trait RandomSource: Send + Sync + std::fmt::Debug {
    /// Uniform index in `[0, bound)`. Callers guarantee `bound > 0`.
    fn index(&self, bound: usize) -> usize;

    /// Uniform offset in `[0, period)` milliseconds. Callers guarantee `period > 0`.
    fn phase(&self, period: i64) -> i64;
}

/// Thread-local RNG; the default source.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn index(&self, bound: usize) -> usize {
        rng().random_range(0..bound)
    }

    fn phase(&self, period: i64) -> i64 {
        rng().random_range(0..period)
    }
}

/// Deterministic RNG seeded once.
#[derive(Debug)]
pub struct SeededRandom {
    inner: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self { inner: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl RandomSource for SeededRandom {
    fn index(&self, bound: usize) -> usize {
        self.inner.lock().expect("seeded rng poisoned").random_range(0..bound)
    }

    fn phase(&self, period: i64) -> i64 {
        self.inner.lock().expect("seeded rng poisoned").random_range(0..period)
    }
}

/// Replays scripted draws in order.
///
/// Index draws are reduced modulo the requested bound; once the script runs out every draw
/// is `0`. Phase draws always return the configured phase modulo the period.
#[derive(Debug, Default)]
pub struct ScriptedRandom {
    indices: Mutex<VecDeque<usize>>,
    phase: i64,
}

impl ScriptedRandom {
    /// Script raw index draws.
    ///
    /// The second shard of a probe is drawn from the `shards - 1` indices that skip the first,
    /// so a draw `d` maps to shard `d` when `d < first` and to `d + 1` otherwise.
    pub fn new(indices: impl IntoIterator<Item = usize>) -> Self {
        Self { indices: Mutex::new(indices.into_iter().collect()), phase: 0 }
    }

    /// Fix the fixed-window phase offset.
    pub fn with_phase(mut self, phase: i64) -> Self {
        self.phase = phase;
        self
    }
}

impl RandomSource for ScriptedRandom {
    fn index(&self, bound: usize) -> usize {
        let next = self.indices.lock().expect("scripted rng poisoned").pop_front().unwrap_or(0);
        next % bound
    }

    fn phase(&self, period: i64) -> i64 {
        self.phase.rem_euclid(period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_random_stays_in_bounds() {
        for _ in 0..200 {
            assert!(ThreadRandom.index(7) < 7);
            let phase = ThreadRandom.phase(1_000);
            assert!((0..1_000).contains(&phase));
        }
    }

    #[test]
    fn seeded_random_is_reproducible() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);
        let left: Vec<usize> = (0..16).map(|_| a.index(10)).collect();
        let right: Vec<usize> = (0..16).map(|_| b.index(10)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn scripted_random_replays_then_defaults_to_zero() {
        let random = ScriptedRandom::new([3, 9]).with_phase(1_250);
        assert_eq!(random.index(5), 3);
        assert_eq!(random.index(5), 4);
        assert_eq!(random.index(5), 0);
        assert_eq!(random.phase(1_000), 250);
    }
}
