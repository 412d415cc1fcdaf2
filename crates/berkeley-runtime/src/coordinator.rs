//! Coordinator - one synchronization cycle per call
//!
//! 1. Accept up to `expected_clients` connections within the accept budget
//! 2. Exchange `REQUEST_TIME` with every client concurrently
//! 3. Join all handlers
//! 4. Filter outliers and compute the consensus offset
//! 5. Send every retained client its adjustment
//! 6. Apply the consensus to the coordinator's own virtual clock

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use berkeley_core::{CycleIndex, Message, ProcessId, SyncError, SyncResult, FIRST_CYCLE};
use berkeley_time::{
    Clock, ConsensusEngine, OffsetSample, RoundTrip, RttSummary, VirtualClock,
};
use berkeley_transport::{Connection, TcpAcceptor};

use crate::{
    ClientRecord, CoordinatorConfig, CycleReport, CycleStatus, Delivery, OffsetRecord,
    OffsetStore, SampleAggregator,
};

/// The coordinator role
pub struct Coordinator {
    config: CoordinatorConfig,
    acceptor: TcpAcceptor,
    clock: Arc<VirtualClock>,
    engine: ConsensusEngine,
    store: Option<Arc<dyn OffsetStore>>,
    cycle: CycleIndex,
}

impl Coordinator {
    /// Bind the listening endpoint. This is the only fatal failure.
    pub async fn bind(config: CoordinatorConfig, clock: Arc<VirtualClock>) -> SyncResult<Self> {
        let acceptor = TcpAcceptor::bind(&config.bind_addr).await?;
        info!(
            addr = %acceptor.local_addr(),
            expected = config.expected_clients,
            "coordinator listening"
        );

        Ok(Coordinator {
            engine: ConsensusEngine::new(config.consensus),
            config,
            acceptor,
            clock,
            store: None,
            cycle: FIRST_CYCLE,
        })
    }

    /// Persist the coordinator's offset after every cycle.
    /// Cycle numbering continues from the stored history.
    pub fn with_store(mut self, store: Arc<dyn OffsetStore>) -> SyncResult<Self> {
        self.cycle = store.next_cycle(&ProcessId::coordinator())?;
        self.store = Some(store);
        Ok(self)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Index the next cycle will carry
    pub fn cycle(&self) -> CycleIndex {
        self.cycle
    }

    /// Run one complete cycle. Per-client failures are recorded in the
    /// report, never returned.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::new(self.cycle, self.config.expected_clients);
        let aggregator = Arc::new(SampleAggregator::new());

        let mut handlers = self.accept_clients(&aggregator).await;
        report.connected_clients = aggregator.connected();
        if report.accept_window_exhausted() {
            let condition = SyncError::AcceptWindowExhausted {
                connected: report.connected_clients,
                expected: report.expected_clients,
            };
            warn!("{}; continuing with the connected subset", condition);
        }

        // Join barrier: no sample is read while a handler may still write one
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                error!("connection handler aborted: {}", e);
            }
        }

        let snapshot = aggregator.take_snapshot();
        report.outcomes = snapshot.outcomes;
        report.rtt = RttSummary::from_rtts(snapshot.records.iter().map(|r| r.exchange.rtt()));

        if snapshot.records.is_empty() {
            warn!(cycle = self.cycle, "no time received from any client");
            report.status = CycleStatus::NoResponses;
            return self.finish(report);
        }

        let samples: Vec<OffsetSample<usize>> = snapshot
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| OffsetSample::new(i, r.offset()))
            .collect();

        let result = match self.engine.compute(samples) {
            Ok(result) => result,
            Err(e) => {
                warn!(cycle = self.cycle, "{}; no adjustments sent", e);
                report.status = CycleStatus::AllSamplesFiltered;
                close_all(snapshot.records).await;
                return self.finish(report);
            }
        };

        report.mean = Some(result.mean);
        report.std_dev = result.std_dev;
        report.consensus = Some(result.consensus);
        info!(
            cycle = self.cycle,
            mean = result.mean,
            consensus = result.consensus,
            retained = result.retained.len(),
            excluded = result.excluded.len(),
            "consensus computed"
        );

        let mut records: Vec<Option<ClientRecord>> =
            snapshot.records.into_iter().map(Some).collect();

        for sample in &result.excluded {
            if let Some(record) = records[sample.client].take() {
                info!(peer = %record.peer, offset = sample.offset, "excluded as outlier");
                report
                    .excluded
                    .push(OffsetSample::new(record.peer, sample.offset));
                close_quietly(record.conn).await;
            }
        }

        for sample in &result.retained {
            if let Some(record) = records[sample.client].take() {
                let adjustment = result.adjustment_for(sample.offset);
                report
                    .deliveries
                    .push(deliver(record, sample.offset, adjustment).await);
            }
        }

        if self.config.apply_consensus {
            let offset = self.clock.adjust(result.consensus);
            debug!(offset, "coordinator clock adjusted");
        }

        report.status = CycleStatus::Synchronized;
        self.finish(report)
    }

    /// Accept until every expected client connected or the budget ran out,
    /// spawning a handler per connection as it arrives
    async fn accept_clients(&self, aggregator: &Arc<SampleAggregator>) -> JoinSet<()> {
        let mut handlers = JoinSet::new();
        let started = Instant::now();
        let mut accepted = 0;

        info!(
            expected = self.config.expected_clients,
            budget = ?self.config.accept_budget,
            "waiting for clients"
        );

        while accepted < self.config.expected_clients {
            let Some(remaining) = self.config.accept_budget.checked_sub(started.elapsed()) else {
                break;
            };
            let wait = remaining.min(self.config.accept_poll_interval);

            match self.acceptor.accept_within(wait).await {
                Ok(Some(conn)) => {
                    let conn = conn.with_io_timeout(self.config.response_timeout);
                    info!(peer = %conn.peer_addr(), "client connected");
                    aggregator.register(conn.peer_addr());
                    accepted += 1;

                    let clock: Arc<dyn Clock> = self.clock.clone();
                    handlers.spawn(exchange_time(conn, clock, Arc::clone(aggregator)));
                }
                Ok(None) => {}
                Err(e) => warn!("accept failed: {}", e),
            }
        }

        handlers
    }

    fn finish(&mut self, mut report: CycleReport) -> CycleReport {
        report.coordinator_offset = self.clock.offset();

        if let Some(store) = &self.store {
            let record = OffsetRecord {
                cycle: self.cycle,
                offset: report.coordinator_offset,
            };
            if let Err(e) = store.record(&ProcessId::coordinator(), record) {
                error!("cannot persist coordinator offset: {}", e);
            }
        }

        info!(
            cycle = self.cycle,
            status = ?report.status,
            delivered = report.deliveries.iter().filter(|d| d.succeeded()).count(),
            "cycle finished"
        );
        self.cycle += 1;
        report
    }
}

/// Handler for one connection: request the client's time and record the
/// RTT-compensated offset. Failures are logged and leave no sample.
async fn exchange_time(
    mut conn: Connection,
    clock: Arc<dyn Clock>,
    aggregator: Arc<SampleAggregator>,
) {
    let peer = conn.peer_addr();
    match request_time(&mut conn, clock.as_ref()).await {
        Ok(exchange) => {
            info!(
                %peer,
                reported = %exchange.reported,
                rtt = exchange.rtt(),
                offset = exchange.offset(),
                "time received"
            );
            aggregator.record(ClientRecord::new(conn, exchange));
        }
        Err(e) => {
            warn!(%peer, "exchange failed: {}", e);
            aggregator.record_failure(peer, &e);
        }
    }
}

async fn request_time(conn: &mut Connection, clock: &dyn Clock) -> SyncResult<RoundTrip> {
    let t0 = clock.now();
    conn.send(&Message::TimeRequest.encode()).await?;
    let payload = conn.recv().await?;
    let t2 = clock.now();

    let reported = Message::parse_time_reply(&payload)?;
    Ok(RoundTrip::new(t0, reported, t2))
}

/// Send one adjustment and close. Failure is isolated to this client.
async fn deliver(record: ClientRecord, offset: f64, adjustment: f64) -> Delivery {
    let ClientRecord { mut conn, peer, .. } = record;

    let sent = async {
        conn.send(&Message::Adjustment(adjustment).encode()).await?;
        conn.close().await
    }
    .await;

    let error = match sent {
        Ok(()) => {
            info!(%peer, adjustment, "adjustment sent");
            None
        }
        Err(e) => {
            let failure = SyncError::DeliveryFailure(e.to_string());
            warn!(%peer, "{}", failure);
            Some(failure.to_string())
        }
    };

    Delivery {
        peer,
        offset,
        adjustment,
        error,
    }
}

async fn close_quietly(conn: Connection) {
    let peer = conn.peer_addr();
    if let Err(e) = conn.close().await {
        debug!(%peer, "close failed: {}", e);
    }
}

async fn close_all(records: Vec<ClientRecord>) {
    for record in records {
        close_quietly(record.conn).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientConfig, MemoryOffsetStore, RoundOutcome, SyncClient};
    use berkeley_core::Timestamp;
    use berkeley_time::{ConsensusConfig, ManualClock};

    #[tokio::test]
    async fn test_cycle_with_two_clients() {
        let base = Arc::new(ManualClock::new(Timestamp::from_secs_f64(1_000.0)));
        let store = Arc::new(MemoryOffsetStore::new());
        let config = CoordinatorConfig {
            consensus: ConsensusConfig::loose(),
            ..CoordinatorConfig::loopback(2)
        };
        let mut coordinator = Coordinator::bind(
            config,
            Arc::new(VirtualClock::new(base.clone(), 0.0)),
        )
        .await
        .unwrap()
        .with_store(store.clone())
        .unwrap();
        let addr = coordinator.local_addr().to_string();

        let mut clients = JoinSet::new();
        for (name, offset) in [("P1", 4.0), ("P2", -1.0)] {
            let mut client = SyncClient::new(
                ClientConfig::new(addr.clone(), ProcessId::new(name)),
                base.clone(),
                offset,
            );
            clients.spawn(async move { client.run_round().await });
        }

        let report = coordinator.run_cycle().await;
        let mut adjustments = Vec::new();
        while let Some(outcome) = clients.join_next().await {
            if let RoundOutcome::Adjusted { adjustment, .. } = outcome.unwrap() {
                adjustments.push(adjustment);
            }
        }
        adjustments.sort_by(|a, b| a.total_cmp(b));

        assert_eq!(report.status, CycleStatus::Synchronized);
        assert_eq!(report.cycle, 1);
        assert_eq!(report.connected_clients, 2);
        // mean(4, -1, 0) = 1
        assert!((report.consensus.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(adjustments.len(), 2);
        assert!((adjustments[0] + 3.0).abs() < 1e-9);
        assert!((adjustments[1] - 2.0).abs() < 1e-9);

        assert!((coordinator.clock().offset() - 1.0).abs() < 1e-9);
        assert_eq!(coordinator.cycle(), 2);
        assert_eq!(
            store.current_offset(&ProcessId::coordinator()).unwrap(),
            Some(report.coordinator_offset)
        );
    }

    #[tokio::test]
    async fn test_empty_cycle_leaves_clock_alone() {
        let config = CoordinatorConfig {
            accept_budget: std::time::Duration::from_millis(200),
            ..CoordinatorConfig::loopback(3)
        };
        let mut coordinator = Coordinator::bind(config, Arc::new(VirtualClock::system(0.5)))
            .await
            .unwrap();

        let report = coordinator.run_cycle().await;
        assert_eq!(report.status, CycleStatus::NoResponses);
        assert!(report.accept_window_exhausted());
        assert_eq!(report.coordinator_offset, 0.5);
    }
}
