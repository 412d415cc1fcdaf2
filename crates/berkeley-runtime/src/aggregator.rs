//! Per-cycle sample aggregation
//!
//! Connection handlers run concurrently and each appends at most one
//! record. The coordinator reads the aggregate only after every handler
//! has been joined.

use std::net::SocketAddr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use berkeley_core::{FailureKind, SyncError, Timestamp};
use berkeley_time::RoundTrip;
use berkeley_transport::Connection;

/// A client that completed the time exchange. Owns its connection until
/// the adjustment is delivered.
#[derive(Debug)]
pub struct ClientRecord {
    pub conn: Connection,
    pub peer: SocketAddr,
    pub exchange: RoundTrip,
}

impl ClientRecord {
    pub fn new(conn: Connection, exchange: RoundTrip) -> Self {
        let peer = conn.peer_addr();
        ClientRecord {
            conn,
            peer,
            exchange,
        }
    }

    /// Estimated client offset, RTT compensated
    #[inline]
    pub fn offset(&self) -> f64 {
        self.exchange.offset()
    }
}

/// What the coordinator learned from one client's exchange
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSummary {
    pub reported: Timestamp,
    pub rtt: f64,
    pub offset: f64,
}

/// Per-client result of the exchange phase
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientOutcome {
    pub peer: SocketAddr,
    pub result: Result<ExchangeSummary, FailureKind>,
}

#[derive(Debug, Default)]
struct AggregatorState {
    roster: Vec<SocketAddr>,
    records: Vec<ClientRecord>,
    outcomes: Vec<ClientOutcome>,
}

/// Everything the handlers produced, taken after the join barrier
#[derive(Debug, Default)]
pub struct AggregateSnapshot {
    /// Every accepted peer, in accept order
    pub roster: Vec<SocketAddr>,
    /// Successful exchanges, in completion order
    pub records: Vec<ClientRecord>,
    /// One entry per handler
    pub outcomes: Vec<ClientOutcome>,
}

/// Shared, internally synchronized collector for one cycle
#[derive(Debug, Default)]
pub struct SampleAggregator {
    state: Mutex<AggregatorState>,
}

impl SampleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to the connected roster
    pub fn register(&self, peer: SocketAddr) {
        self.state.lock().roster.push(peer);
    }

    /// Store a completed exchange
    pub fn record(&self, record: ClientRecord) {
        let outcome = ClientOutcome {
            peer: record.peer,
            result: Ok(ExchangeSummary {
                reported: record.exchange.reported,
                rtt: record.exchange.rtt(),
                offset: record.offset(),
            }),
        };
        let mut state = self.state.lock();
        state.outcomes.push(outcome);
        state.records.push(record);
    }

    /// Note a failed exchange; it contributes no sample
    pub fn record_failure(&self, peer: SocketAddr, error: &SyncError) {
        self.state.lock().outcomes.push(ClientOutcome {
            peer,
            result: Err(error.kind()),
        });
    }

    pub fn connected(&self) -> usize {
        self.state.lock().roster.len()
    }

    /// Drain the collected state. Call only after all handlers are joined.
    pub fn take_snapshot(&self) -> AggregateSnapshot {
        let state = std::mem::take(&mut *self.state.lock());
        AggregateSnapshot {
            roster: state.roster,
            records: state.records,
            outcomes: state.outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_failures_leave_no_record() {
        let aggregator = SampleAggregator::new();
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        aggregator.register(peer);
        aggregator.record_failure(peer, &SyncError::ConnectionTimeout(Duration::from_secs(10)));

        assert_eq!(aggregator.connected(), 1);
        let snapshot = aggregator.take_snapshot();
        assert!(snapshot.records.is_empty());
        assert_eq!(
            snapshot.outcomes,
            vec![ClientOutcome {
                peer,
                result: Err(FailureKind::Timeout)
            }]
        );

        // Drained
        assert_eq!(aggregator.connected(), 0);
    }
}
