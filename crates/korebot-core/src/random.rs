//! Randomness source for movement perturbation.
//!
//! Kiting movement adds small random offsets so the character does not walk
//! perfectly predictable lines. The source is a trait so tests can script
//! exact values and assert coordinates.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Supplies random perturbations.
pub trait Jitter: Send {
    /// A uniform sample in `[low, high]`.
    fn uniform(&mut self, low: f64, high: f64) -> f64;

    /// A uniform integer in `[low, high]`.
    fn offset(&mut self, low: i32, high: i32) -> i32;
}

/// [`Jitter`] backed by a real RNG.
#[derive(Debug, Clone)]
pub struct RngJitter<R = StdRng> {
    rng: R,
}

impl RngJitter<StdRng> {
    /// Seeded from the operating system.
    pub fn from_os_rng() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic, for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng + Send> RngJitter<R> {
    /// Wrap an existing RNG.
    pub const fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng + Send> Jitter for RngJitter<R> {
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.rng.random_range(low..=high)
    }

    fn offset(&mut self, low: i32, high: i32) -> i32 {
        if high <= low {
            return low;
        }
        self.rng.random_range(low..=high)
    }
}

/// [`Jitter`] that replays queued values, clamped to the requested range.
///
/// When a queue runs dry it returns zero (clamped), i.e. no perturbation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedJitter {
    uniforms: VecDeque<f64>,
    offsets: VecDeque<i32>,
}

impl ScriptedJitter {
    /// No perturbation at all.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Replay the given samples in order.
    pub fn new(uniforms: impl IntoIterator<Item = f64>, offsets: impl IntoIterator<Item = i32>) -> Self {
        Self {
            uniforms: uniforms.into_iter().collect(),
            offsets: offsets.into_iter().collect(),
        }
    }
}

impl Jitter for ScriptedJitter {
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        self.uniforms.pop_front().unwrap_or(0.0).clamp(low, high.max(low))
    }

    fn offset(&mut self, low: i32, high: i32) -> i32 {
        self.offsets.pop_front().unwrap_or(0).clamp(low, high.max(low))
    }
}
