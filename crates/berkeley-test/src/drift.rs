//! Clock drift and offset generation for simulated processes
//!
//! - [`ClockDriftModel`]: rate error of a process's oscillator
//! - [`DriftingClock`]: a shared manual clock seen through that model
//! - [`OffsetGenerator`]: seeded initial offsets, optionally with outliers

use std::sync::Arc;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use berkeley_core::Timestamp;
use berkeley_time::{Clock, ManualClock};

/// Drift model for a simulated process
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockDriftModel {
    /// 1.0 = perfect, >1.0 = fast, <1.0 = slow
    pub drift_rate: f64,
}

impl ClockDriftModel {
    pub fn new(drift_rate: f64) -> Self {
        ClockDriftModel { drift_rate }
    }

    pub fn perfect() -> Self {
        Self::new(1.0)
    }

    /// Gains a millisecond per second
    pub fn fast() -> Self {
        Self::new(1.001)
    }

    /// Loses a millisecond per second
    pub fn slow() -> Self {
        Self::new(0.999)
    }

    /// Error accumulated over `elapsed` seconds of true time
    pub fn error_after(&self, elapsed: f64) -> f64 {
        elapsed * (self.drift_rate - 1.0)
    }
}

impl Default for ClockDriftModel {
    fn default() -> Self {
        Self::perfect()
    }
}

/// A clock that runs at `drift_rate` relative to a shared source, starting
/// from the source's time at construction
pub struct DriftingClock {
    source: Arc<ManualClock>,
    epoch: Timestamp,
    model: ClockDriftModel,
}

impl DriftingClock {
    pub fn new(source: Arc<ManualClock>, model: ClockDriftModel) -> Self {
        let epoch = source.now();
        DriftingClock {
            source,
            epoch,
            model,
        }
    }

    pub fn model(&self) -> ClockDriftModel {
        self.model
    }
}

impl Clock for DriftingClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.source.now() - self.epoch;
        self.epoch.offset_by(elapsed * self.model.drift_rate)
    }
}

/// Seeded source of initial clock offsets
pub struct OffsetGenerator {
    rng: StdRng,
}

impl OffsetGenerator {
    pub fn with_seed(seed: u64) -> Self {
        OffsetGenerator {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `count` offsets drawn uniformly from `[-spread, spread]`
    pub fn uniform(&mut self, count: usize, spread: f64) -> Vec<f64> {
        let dist = Uniform::new_inclusive(-spread, spread);
        (0..count).map(|_| dist.sample(&mut self.rng)).collect()
    }

    /// Like [`uniform`](Self::uniform), with `outlier` appended
    pub fn with_outlier(&mut self, count: usize, spread: f64, outlier: f64) -> Vec<f64> {
        let mut offsets = self.uniform(count, spread);
        offsets.push(outlier);
        offsets
    }
}
