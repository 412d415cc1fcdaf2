//! Typed outcome of one coordinator cycle

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use berkeley_core::{CycleIndex, SyncError, SyncResult};
use berkeley_time::{OffsetSample, RttSummary};

use crate::ClientOutcome;

/// How a cycle ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    /// Consensus computed and adjustments sent
    Synchronized,
    /// No client completed the exchange
    NoResponses,
    /// Every client sample was rejected; nothing was sent
    AllSamplesFiltered,
}

/// Adjustment sent (or attempted) to one client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub peer: SocketAddr,
    pub offset: f64,
    pub adjustment: f64,
    /// `None` when the payload was sent and the connection closed cleanly
    pub error: Option<String>,
}

impl Delivery {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything an external collaborator needs after a cycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: CycleIndex,
    pub status: CycleStatus,
    pub expected_clients: usize,
    pub connected_clients: usize,
    pub outcomes: Vec<ClientOutcome>,
    pub rtt: RttSummary,
    /// Pre-filter mean, coordinator sample included
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub consensus: Option<f64>,
    pub excluded: Vec<OffsetSample<SocketAddr>>,
    pub deliveries: Vec<Delivery>,
    /// Coordinator's virtual clock offset after the cycle
    pub coordinator_offset: f64,
}

impl CycleReport {
    pub(crate) fn new(cycle: CycleIndex, expected_clients: usize) -> Self {
        CycleReport {
            cycle,
            status: CycleStatus::NoResponses,
            expected_clients,
            connected_clients: 0,
            outcomes: Vec::new(),
            rtt: RttSummary::default(),
            mean: None,
            std_dev: None,
            consensus: None,
            excluded: Vec::new(),
            deliveries: Vec::new(),
            coordinator_offset: 0.0,
        }
    }

    /// Fewer clients connected than expected
    pub fn accept_window_exhausted(&self) -> bool {
        self.connected_clients < self.expected_clients
    }

    /// Number of clients that produced a sample
    pub fn sampled_clients(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Adjustment sent to a peer, if it received one
    pub fn adjustment_for(&self, peer: SocketAddr) -> Option<f64> {
        self.deliveries
            .iter()
            .find(|d| d.peer == peer && d.succeeded())
            .map(|d| d.adjustment)
    }

    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SyncError::StoreError(e.to_string()))
    }
}
