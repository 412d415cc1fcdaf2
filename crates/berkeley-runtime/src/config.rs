//! Coordinator and client configuration

use std::time::Duration;

use berkeley_core::{ProcessId, DEFAULT_PORT};
use berkeley_time::ConsensusConfig;

/// Coordinator configuration
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Endpoint to listen on (`host:port`)
    pub bind_addr: String,
    /// Number of clients expected per cycle
    pub expected_clients: usize,
    /// Total time allowed for clients to connect
    pub accept_budget: Duration,
    /// Longest single wait on `accept` before the budget is rechecked
    pub accept_poll_interval: Duration,
    /// Deadline for each read/write on a client connection
    pub response_timeout: Duration,
    /// Outlier filter
    pub consensus: ConsensusConfig,
    /// Shift the coordinator's own virtual clock by the consensus
    pub apply_consensus: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            expected_clients: 3,
            accept_budget: Duration::from_secs(30),
            accept_poll_interval: Duration::from_secs(1),
            response_timeout: Duration::from_secs(10),
            consensus: ConsensusConfig::default(),
            apply_consensus: true,
        }
    }
}

impl CoordinatorConfig {
    /// Classroom setup: five machines on one LAN
    pub fn local_lab() -> Self {
        CoordinatorConfig {
            expected_clients: 5,
            ..Self::default()
        }
    }

    /// Ephemeral loopback port with short deadlines, for in-process runs
    pub fn loopback(expected_clients: usize) -> Self {
        CoordinatorConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            expected_clients,
            accept_budget: Duration::from_secs(5),
            accept_poll_interval: Duration::from_millis(100),
            response_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }
}

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Coordinator endpoint (`host:port`)
    pub coordinator_addr: String,
    /// Name used in logs and offset history
    pub process_id: ProcessId,
    pub connect_timeout: Duration,
    /// Deadline for the `REQUEST_TIME` marker and for sending the reply
    pub response_timeout: Duration,
    /// Deadline for the adjustment.
    ///
    /// The coordinator answers only after every handler has finished, so
    /// this must cover its accept budget plus its response timeout.
    pub adjustment_timeout: Duration,
}

impl ClientConfig {
    pub fn new(coordinator_addr: impl Into<String>, process_id: ProcessId) -> Self {
        ClientConfig {
            coordinator_addr: coordinator_addr.into(),
            process_id,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(10),
            adjustment_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(format!("127.0.0.1:{}", DEFAULT_PORT), ProcessId::default())
    }
}
