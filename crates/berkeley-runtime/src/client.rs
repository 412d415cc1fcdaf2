//! Client - one synchronization round per call
//!
//! `Idle → Connected → AwaitingRequest → SentTime → AwaitingAdjustment →
//! {Adjusted | Unadjusted} → Terminated`
//!
//! A round never retries. A failed round leaves the offset untouched; the
//! next invocation tries again.
//!
//! Every round that reaches the coordinator appends one history row and
//! advances the cycle index, adjusted or not. Rows of unadjusted rounds
//! repeat the previous offset.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use berkeley_core::{
    CycleIndex, FailureKind, Message, SyncError, SyncResult, Timestamp, FIRST_CYCLE,
};
use berkeley_time::Clock;
use berkeley_transport::Connection;

use crate::{ClientConfig, OffsetRecord, OffsetStore};

/// Where a round currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    Idle,
    Connected,
    AwaitingRequest,
    SentTime,
    AwaitingAdjustment,
    Adjusted,
    Unadjusted,
    Terminated,
}

/// Client-side synchronization state
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    /// Accumulated offset of the simulated clock, in seconds
    pub offset: f64,
    /// Cycle the next round belongs to
    pub cycle: CycleIndex,
}

/// Result of one round
#[derive(Clone, Debug, PartialEq)]
pub enum RoundOutcome {
    Adjusted {
        cycle: CycleIndex,
        /// Simulated time sent to the coordinator
        reported: Timestamp,
        adjustment: f64,
        /// Offset after accumulating the adjustment
        offset: f64,
        /// `reported + adjustment`
        adjusted_time: Timestamp,
    },
    Unadjusted {
        cycle: CycleIndex,
        /// Last phase reached before the round gave up
        stopped_at: RoundPhase,
        kind: FailureKind,
        reason: String,
    },
}

impl RoundOutcome {
    pub fn is_adjusted(&self) -> bool {
        matches!(self, RoundOutcome::Adjusted { .. })
    }

    pub fn adjustment(&self) -> Option<f64> {
        match self {
            RoundOutcome::Adjusted { adjustment, .. } => Some(*adjustment),
            RoundOutcome::Unadjusted { .. } => None,
        }
    }
}

/// The client role
pub struct SyncClient {
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    state: ClientState,
    phase: RoundPhase,
    store: Option<Arc<dyn OffsetStore>>,
}

impl SyncClient {
    /// Client starting from a caller-supplied offset at cycle 1
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>, initial_offset: f64) -> Self {
        SyncClient {
            config,
            clock,
            state: ClientState {
                offset: initial_offset,
                cycle: FIRST_CYCLE,
            },
            phase: RoundPhase::Idle,
            store: None,
        }
    }

    /// Client resuming from persisted state.
    ///
    /// `initial_offset` overrides the stored offset when given; with neither
    /// the clock starts undisturbed at 0.0.
    pub fn from_store(
        config: ClientConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn OffsetStore>,
        initial_offset: Option<f64>,
    ) -> SyncResult<Self> {
        let id = &config.process_id;
        let offset = match initial_offset {
            Some(offset) => offset,
            None => store.current_offset(id)?.unwrap_or(0.0),
        };
        let cycle = store.next_cycle(id)?;

        let mut client = SyncClient::new(config, clock, offset);
        client.state.cycle = cycle;
        client.store = Some(store);
        Ok(client)
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Real clock plus the accumulated offset
    pub fn simulated_now(&self) -> Timestamp {
        self.clock.now().offset_by(self.state.offset)
    }

    /// Run one round against the coordinator. Always ends `Terminated`.
    pub async fn run_round(&mut self) -> RoundOutcome {
        self.phase = RoundPhase::Idle;
        let id = self.config.process_id.clone();

        let outcome = match self.exchange().await {
            Ok((reported, adjustment)) => {
                self.transition(RoundPhase::Adjusted);
                self.apply_adjustment(reported, adjustment)
            }
            Err(e) => {
                let stopped_at = self.phase;
                match &e {
                    SyncError::Disconnected if stopped_at == RoundPhase::AwaitingAdjustment => {
                        info!(process = %id, "no adjustment received from coordinator")
                    }
                    _ => warn!(process = %id, phase = ?stopped_at, "round failed: {}", e),
                }
                self.transition(RoundPhase::Unadjusted);
                let cycle = self.state.cycle;
                if stopped_at != RoundPhase::Idle {
                    self.close_cycle();
                }
                RoundOutcome::Unadjusted {
                    cycle,
                    stopped_at,
                    kind: e.kind(),
                    reason: e.to_string(),
                }
            }
        };

        self.transition(RoundPhase::Terminated);
        outcome
    }

    /// Protocol steps; returns the reported time and the adjustment
    async fn exchange(&mut self) -> SyncResult<(Timestamp, f64)> {
        let mut conn = Connection::connect(&self.config.coordinator_addr, self.config.connect_timeout)
            .await?
            .with_io_timeout(self.config.response_timeout);
        self.transition(RoundPhase::Connected);

        self.transition(RoundPhase::AwaitingRequest);
        let request = conn.recv().await?;
        Message::parse_request(&request)?;

        let reported = self.simulated_now();
        info!(
            process = %self.config.process_id,
            offset = self.state.offset,
            local = %reported,
            "local clock sampled"
        );
        conn.send(&Message::TimeReply(reported).encode()).await?;
        self.transition(RoundPhase::SentTime);

        self.transition(RoundPhase::AwaitingAdjustment);
        let mut conn = conn.with_io_timeout(self.config.adjustment_timeout);
        let reply = conn.recv_until_close().await?;
        if reply.is_empty() {
            return Err(SyncError::Disconnected);
        }
        let adjustment = Message::parse_adjustment(&reply)?;
        Ok((reported, adjustment))
    }

    fn apply_adjustment(&mut self, reported: Timestamp, adjustment: f64) -> RoundOutcome {
        let id = &self.config.process_id;
        let cycle = self.state.cycle;
        self.state.offset += adjustment;
        let adjusted_time = reported.offset_by(adjustment);

        info!(
            process = %id,
            adjustment = format_args!("{:+.2}", adjustment),
            adjusted = %adjusted_time,
            offset = self.state.offset,
            "adjustment applied"
        );

        self.close_cycle();

        RoundOutcome::Adjusted {
            cycle,
            reported,
            adjustment,
            offset: self.state.offset,
            adjusted_time,
        }
    }

    /// Persist the current offset under this cycle and move to the next
    fn close_cycle(&mut self) {
        if let Some(store) = &self.store {
            let id = &self.config.process_id;
            let record = OffsetRecord {
                cycle: self.state.cycle,
                offset: self.state.offset,
            };
            if let Err(e) = store.record(id, record) {
                error!(process = %id, "cannot persist offset: {}", e);
            }
        }
        self.state.cycle += 1;
    }

    fn transition(&mut self, next: RoundPhase) {
        debug!(process = %self.config.process_id, from = ?self.phase, to = ?next, "round phase");
        self.phase = next;
    }
}
