//! In-process cluster: one coordinator plus scripted clients on loopback
//!
//! Every participant reads the same [`ManualClock`], so with a frozen clock
//! round trips take zero simulated time and offset estimates are exact.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use berkeley_core::{ProcessId, SyncResult, Timestamp};
use berkeley_runtime::{
    ClientConfig, Coordinator, CoordinatorConfig, CycleReport, MemoryOffsetStore, OffsetStore,
    RoundOutcome, SyncClient,
};
use berkeley_time::{Clock, ConsensusConfig, ManualClock, VirtualClock};
use berkeley_transport::Connection;

use crate::drift::{ClockDriftModel, DriftingClock};

/// Simulated time every cluster starts at
pub const CLUSTER_EPOCH: f64 = 1_000.0;

/// How a simulated client behaves during a cycle
#[derive(Clone, Debug, PartialEq)]
pub enum ClientBehaviour {
    /// Full protocol with the given initial offset
    Honest { offset: f64, drift: ClockDriftModel },
    /// Connects, reads the request, never answers
    Silent,
    /// Connects, reads the request, disconnects
    DropAfterRequest,
    /// Answers the request with a fixed payload
    Malformed(String),
    /// Answers correctly after a delay
    Delayed { offset: f64, delay: Duration },
    /// Never connects
    Absent,
}

impl ClientBehaviour {
    pub fn honest(offset: f64) -> Self {
        ClientBehaviour::Honest {
            offset,
            drift: ClockDriftModel::perfect(),
        }
    }

    pub fn drifting(offset: f64, drift: ClockDriftModel) -> Self {
        ClientBehaviour::Honest { offset, drift }
    }
}

/// What one client observed during a cycle
#[derive(Clone, Debug, PartialEq)]
pub enum ClientRun {
    /// Round outcome of an honest client
    Round(RoundOutcome),
    /// Bytes a scripted client read after its own step, up to close
    Scripted { trailing: Vec<u8> },
    Absent,
    /// Client task panicked; its state is lost
    Crashed(String),
}

impl ClientRun {
    pub fn adjustment(&self) -> Option<f64> {
        match self {
            ClientRun::Round(outcome) => outcome.adjustment(),
            _ => None,
        }
    }

    pub fn is_adjusted(&self) -> bool {
        self.adjustment().is_some()
    }
}

/// Timeouts for a cluster run
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub consensus: ConsensusConfig,
    pub accept_budget: Duration,
    pub response_timeout: Duration,
    /// Client-side deadline for the adjustment
    pub adjustment_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            consensus: ConsensusConfig::default(),
            accept_budget: Duration::from_secs(5),
            response_timeout: Duration::from_millis(500),
            adjustment_timeout: Duration::from_secs(10),
        }
    }
}

impl ClusterConfig {
    pub fn strict() -> Self {
        ClusterConfig {
            consensus: ConsensusConfig::strict(),
            ..Self::default()
        }
    }

    pub fn loose() -> Self {
        ClusterConfig {
            consensus: ConsensusConfig::loose(),
            ..Self::default()
        }
    }

    /// Short accept window for runs where some client never shows up
    pub fn short_window(mut self) -> Self {
        self.accept_budget = Duration::from_millis(500);
        self
    }
}

struct SimulatedProcess {
    id: ProcessId,
    behaviour: ClientBehaviour,
    client: Option<SyncClient>,
}

/// One cycle of the cluster
#[derive(Debug)]
pub struct ClusterCycle {
    pub report: CycleReport,
    /// Per client, in the order the behaviours were given
    pub runs: Vec<(ProcessId, ClientRun)>,
}

impl ClusterCycle {
    pub fn run(&self, id: &str) -> Option<&ClientRun> {
        self.runs
            .iter()
            .find(|(pid, _)| pid.as_str() == id)
            .map(|(_, run)| run)
    }

    pub fn adjustment(&self, id: &str) -> Option<f64> {
        self.run(id).and_then(ClientRun::adjustment)
    }
}

/// Coordinator and clients sharing one manual clock
pub struct SimulatedCluster {
    clock: Arc<ManualClock>,
    coordinator: Coordinator,
    processes: Vec<SimulatedProcess>,
    store: Arc<MemoryOffsetStore>,
    config: ClusterConfig,
}

impl SimulatedCluster {
    /// Bind a loopback coordinator expecting one client per behaviour
    pub async fn start(
        config: ClusterConfig,
        behaviours: Vec<ClientBehaviour>,
    ) -> SyncResult<Self> {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs_f64(CLUSTER_EPOCH)));
        let store = Arc::new(MemoryOffsetStore::new());

        let coordinator_config = CoordinatorConfig {
            consensus: config.consensus,
            accept_budget: config.accept_budget,
            accept_poll_interval: Duration::from_millis(50),
            response_timeout: config.response_timeout,
            ..CoordinatorConfig::loopback(behaviours.len())
        };
        let coordinator_clock = Arc::new(VirtualClock::new(clock.clone(), 0.0));
        let coordinator = Coordinator::bind(coordinator_config, coordinator_clock)
            .await?
            .with_store(store.clone())?;
        let addr = coordinator.local_addr().to_string();

        let mut processes = Vec::with_capacity(behaviours.len());
        for (i, behaviour) in behaviours.into_iter().enumerate() {
            let id = ProcessId::new(format!("P{}", i + 1));
            let client = match &behaviour {
                ClientBehaviour::Honest { offset, drift } => {
                    let client_config = ClientConfig {
                        connect_timeout: Duration::from_secs(2),
                        response_timeout: Duration::from_secs(2),
                        adjustment_timeout: config.adjustment_timeout,
                        ..ClientConfig::new(addr.clone(), id.clone())
                    };
                    let client_clock: Arc<dyn Clock> =
                        Arc::new(DriftingClock::new(clock.clone(), *drift));
                    let client_store: Arc<dyn OffsetStore> = store.clone();
                    Some(SyncClient::from_store(
                        client_config,
                        client_clock,
                        client_store,
                        Some(*offset),
                    )?)
                }
                _ => None,
            };
            processes.push(SimulatedProcess {
                id,
                behaviour,
                client,
            });
        }

        Ok(SimulatedCluster {
            clock,
            coordinator,
            processes,
            store,
            config,
        })
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<MemoryOffsetStore> {
        &self.store
    }

    /// Current offset of an honest client
    pub fn offset_of(&self, id: &str) -> Option<f64> {
        self.processes
            .iter()
            .find(|p| p.id.as_str() == id)
            .and_then(|p| p.client.as_ref())
            .map(|c| c.state().offset)
    }

    /// Advance simulated time between cycles
    pub fn advance(&self, secs: f64) {
        self.clock.advance(secs);
    }

    /// Run every client against one coordinator cycle
    pub async fn run_cycle(&mut self) -> ClusterCycle {
        let addr = self.coordinator.local_addr().to_string();
        let mut tasks: Vec<ClientTask> = Vec::with_capacity(self.processes.len());

        for process in &mut self.processes {
            let task = match (&process.behaviour, process.client.take()) {
                (ClientBehaviour::Honest { .. }, Some(mut client)) => {
                    ClientTask::Honest(tokio::spawn(async move {
                        let outcome = client.run_round().await;
                        (client, outcome)
                    }))
                }
                (ClientBehaviour::Absent, _) => ClientTask::Absent,
                (behaviour, _) => ClientTask::Scripted(tokio::spawn(scripted_client(
                    addr.clone(),
                    behaviour.clone(),
                    self.clock.clone(),
                    self.config.response_timeout * 4,
                ))),
            };
            tasks.push(task);
        }

        let report = self.coordinator.run_cycle().await;

        let mut runs = Vec::with_capacity(tasks.len());
        for (process, task) in self.processes.iter_mut().zip(tasks) {
            let run = match task {
                ClientTask::Honest(handle) => match handle.await {
                    Ok((client, outcome)) => {
                        process.client = Some(client);
                        ClientRun::Round(outcome)
                    }
                    Err(e) => ClientRun::Crashed(e.to_string()),
                },
                ClientTask::Scripted(handle) => ClientRun::Scripted {
                    trailing: handle.await.unwrap_or_default(),
                },
                ClientTask::Absent => ClientRun::Absent,
            };
            runs.push((process.id.clone(), run));
        }

        ClusterCycle { report, runs }
    }
}

enum ClientTask {
    Honest(JoinHandle<(SyncClient, RoundOutcome)>),
    Scripted(JoinHandle<Vec<u8>>),
    Absent,
}

/// Misbehaving peer driving a bare connection
async fn scripted_client(
    addr: String,
    behaviour: ClientBehaviour,
    clock: Arc<ManualClock>,
    linger: Duration,
) -> Vec<u8> {
    let Ok(conn) = Connection::connect(&addr, linger).await else {
        return Vec::new();
    };
    let mut conn = conn.with_io_timeout(linger);

    if conn.recv().await.is_err() {
        return Vec::new();
    }

    match behaviour {
        ClientBehaviour::DropAfterRequest => return Vec::new(),
        ClientBehaviour::Silent => {}
        ClientBehaviour::Malformed(payload) => {
            let _ = conn.send(payload.as_bytes()).await;
        }
        ClientBehaviour::Delayed { offset, delay } => {
            tokio::time::sleep(delay).await;
            let reported = clock.now().offset_by(offset);
            let _ = conn
                .send(reported.as_secs_f64().to_string().as_bytes())
                .await;
        }
        ClientBehaviour::Honest { .. } | ClientBehaviour::Absent => {}
    }

    conn.recv_until_close()
        .await
        .map(|trailing| trailing.to_vec())
        .unwrap_or_default()
}
