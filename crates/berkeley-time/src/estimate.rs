//! RTT-compensated offset estimation
//!
//! The coordinator timestamps a request at `t0` and the reply at `t2`.
//! Assuming symmetric one-way delay, the client sampled its clock when the
//! coordinator's clock read `t0 + RTT/2`.

use serde::{Deserialize, Serialize};

use berkeley_core::Timestamp;

/// One request/response exchange as seen by the coordinator
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoundTrip {
    /// Request sent
    pub t0: Timestamp,
    /// Response received
    pub t2: Timestamp,
    /// Time reported by the client
    pub reported: Timestamp,
}

impl RoundTrip {
    pub fn new(t0: Timestamp, reported: Timestamp, t2: Timestamp) -> Self {
        RoundTrip { t0, t2, reported }
    }

    /// Round-trip time in seconds
    #[inline]
    pub fn rtt(&self) -> f64 {
        self.t2 - self.t0
    }

    /// Estimated coordinator reading at the instant the client sampled
    #[inline]
    pub fn coordinator_midpoint(&self) -> Timestamp {
        self.t0.midpoint(self.t2)
    }

    /// Client clock minus coordinator clock, in seconds
    #[inline]
    pub fn offset(&self) -> f64 {
        self.reported - self.coordinator_midpoint()
    }
}

/// Aggregate round-trip statistics of a cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RttSummary {
    pub count: usize,
    pub mean: f64,
    pub max: f64,
}

impl RttSummary {
    pub fn from_rtts(rtts: impl IntoIterator<Item = f64>) -> Self {
        let mut summary = RttSummary::default();
        let mut total = 0.0;
        for rtt in rtts {
            summary.count += 1;
            total += rtt;
            summary.max = summary.max.max(rtt);
        }
        if summary.count > 0 {
            summary.mean = total / summary.count as f64;
        }
        summary
    }
}
