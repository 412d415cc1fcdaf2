//! Outlier filtering and consensus offset
//!
//! The coordinator is ground truth for its own round: it contributes one
//! sample of offset 0.0 to both the pre-filter statistics and the final
//! mean, and that sample is never filtered.

use serde::{Deserialize, Serialize};

use berkeley_core::{SyncError, SyncResult};

use crate::{mean, sample_std_dev};

/// The coordinator's own sample
pub const COORDINATOR_OFFSET: f64 = 0.0;

/// An estimated offset attributed to one client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OffsetSample<K> {
    pub client: K,
    pub offset: f64,
}

impl<K> OffsetSample<K> {
    pub fn new(client: K, offset: f64) -> Self {
        OffsetSample { client, offset }
    }
}

/// Consensus configuration
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// A client sample is kept when `|offset - mean| <= deviation_threshold * stddev`
    pub deviation_threshold: f64,
}

impl ConsensusConfig {
    /// ±1σ
    pub const STRICT: f64 = 1.0;
    /// ±2σ
    pub const LOOSE: f64 = 2.0;

    pub fn strict() -> Self {
        ConsensusConfig {
            deviation_threshold: Self::STRICT,
        }
    }

    pub fn loose() -> Self {
        ConsensusConfig {
            deviation_threshold: Self::LOOSE,
        }
    }

    /// Custom threshold; `None` unless finite and non-negative
    pub fn with_threshold(deviation_threshold: f64) -> Option<Self> {
        (deviation_threshold.is_finite() && deviation_threshold >= 0.0)
            .then_some(ConsensusConfig { deviation_threshold })
    }
}

/// ±2σ. Clients excluded at ±1σ receive no adjustment, so a wide initial
/// spread can stay excluded in every later cycle.
impl Default for ConsensusConfig {
    fn default() -> Self {
        Self::loose()
    }
}

/// Outcome of filtering and averaging one cycle's samples
#[derive(Clone, Debug, PartialEq)]
pub struct ConsensusResult<K> {
    /// Mean of the retained client offsets and the coordinator's 0.0
    pub consensus: f64,
    /// Pre-filter mean, coordinator included
    pub mean: f64,
    /// Pre-filter sample standard deviation; `None` when filtering was skipped
    pub std_dev: Option<f64>,
    /// Samples that receive an adjustment
    pub retained: Vec<OffsetSample<K>>,
    /// Samples rejected as outliers
    pub excluded: Vec<OffsetSample<K>>,
}

impl<K> ConsensusResult<K> {
    /// Correction a client with `offset` must add to its clock
    #[inline]
    pub fn adjustment_for(&self, offset: f64) -> f64 {
        self.consensus - offset
    }

    /// `(client, adjustment)` for every retained sample
    pub fn adjustments(&self) -> impl Iterator<Item = (&K, f64)> + '_ {
        self.retained
            .iter()
            .map(|s| (&s.client, self.adjustment_for(s.offset)))
    }
}

/// Computes the consensus offset of a set of samples
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsensusEngine {
    config: ConsensusConfig,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        ConsensusEngine { config }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Filter outliers and average what is left.
    ///
    /// Fails with [`SyncError::AllSamplesFiltered`] when client samples were
    /// present but none survived the filter.
    pub fn compute<K>(&self, samples: Vec<OffsetSample<K>>) -> SyncResult<ConsensusResult<K>> {
        let mut offsets: Vec<f64> = samples.iter().map(|s| s.offset).collect();
        offsets.push(COORDINATOR_OFFSET);

        let pre_mean = mean(&offsets).unwrap_or(COORDINATOR_OFFSET);
        let Some(std_dev) = sample_std_dev(&offsets) else {
            // Coordinator alone: nothing to filter
            return Ok(ConsensusResult {
                consensus: pre_mean,
                mean: pre_mean,
                std_dev: None,
                retained: samples,
                excluded: Vec::new(),
            });
        };

        let limit = self.config.deviation_threshold * std_dev;
        let (retained, excluded): (Vec<_>, Vec<_>) = samples
            .into_iter()
            .partition(|s| (s.offset - pre_mean).abs() <= limit);

        if retained.is_empty() {
            return Err(SyncError::AllSamplesFiltered);
        }

        let mut kept: Vec<f64> = retained.iter().map(|s| s.offset).collect();
        kept.push(COORDINATOR_OFFSET);
        let consensus = mean(&kept).unwrap_or(COORDINATOR_OFFSET);

        Ok(ConsensusResult {
            consensus,
            mean: pre_mean,
            std_dev: Some(std_dev),
            retained,
            excluded,
        })
    }
}
