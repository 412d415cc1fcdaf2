//! End-to-end cycle scenarios over loopback TCP
//!
//! - Consensus with and without outliers
//! - Clients that time out, disconnect or send garbage
//! - Partial attendance
//! - Convergence over repeated cycles under drift

use crate::cluster::{ClientBehaviour, ClientRun, ClusterConfig, ClusterCycle, SimulatedCluster};

/// Spread (max - min) of the offsets the coordinator estimated this cycle
pub fn estimated_spread(cycle: &ClusterCycle) -> Option<f64> {
    let offsets: Vec<f64> = cycle
        .report
        .outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok().map(|s| s.offset))
        .collect();
    let max = offsets.iter().copied().reduce(f64::max)?;
    let min = offsets.iter().copied().reduce(f64::min)?;
    Some(max - min)
}

/// Spread of the clients' simulated clocks right now
pub fn clock_spread(cluster: &SimulatedCluster, ids: &[&str]) -> Option<f64> {
    let offsets: Vec<f64> = ids.iter().filter_map(|id| cluster.offset_of(id)).collect();
    let max = offsets.iter().copied().reduce(f64::max)?;
    let min = offsets.iter().copied().reduce(f64::min)?;
    Some(max - min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use berkeley_core::{FailureKind, ProcessId};
    use berkeley_runtime::{CoordinatorConfig, CycleStatus, OffsetStore, RoundOutcome, RoundPhase};

    use crate::drift::{ClockDriftModel, OffsetGenerator};

    const EPS: f64 = 1e-6;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < EPS,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[tokio::test]
    async fn test_three_clients_converge_on_mean() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::loose(),
            vec![
                ClientBehaviour::honest(5.0),
                ClientBehaviour::honest(-3.0),
                ClientBehaviour::honest(1.5),
            ],
        )
        .await
        .unwrap();

        let cycle = cluster.run_cycle().await;
        let report = &cycle.report;

        assert_eq!(report.status, CycleStatus::Synchronized);
        assert_eq!(report.connected_clients, 3);
        assert!(report.excluded.is_empty());
        assert_close(report.consensus.unwrap(), 0.875);

        assert_close(cycle.adjustment("P1").unwrap(), -4.125);
        assert_close(cycle.adjustment("P2").unwrap(), 3.875);
        assert_close(cycle.adjustment("P3").unwrap(), -0.625);

        for id in ["P1", "P2", "P3"] {
            assert_close(cluster.offset_of(id).unwrap(), 0.875);
        }
        assert_close(report.coordinator_offset, 0.875);
        assert_close(cluster.coordinator().clock().offset(), 0.875);
    }

    #[tokio::test]
    async fn test_shipped_threshold_converges_over_cycles() {
        let config = ClusterConfig {
            consensus: CoordinatorConfig::default().consensus,
            ..ClusterConfig::default()
        };
        let mut cluster = SimulatedCluster::start(
            config,
            vec![
                ClientBehaviour::honest(5.0),
                ClientBehaviour::honest(-3.0),
                ClientBehaviour::honest(1.5),
            ],
        )
        .await
        .unwrap();
        let ids = ["P1", "P2", "P3"];

        for round in 1..=5 {
            let cycle = cluster.run_cycle().await;

            assert_eq!(cycle.report.status, CycleStatus::Synchronized);
            assert!(cycle.report.excluded.is_empty(), "cycle {}", round);
            for id in ids {
                assert!(cycle.run(id).unwrap().is_adjusted(), "{} in cycle {}", id, round);
            }
            assert!(clock_spread(&cluster, &ids).unwrap() < EPS);
            cluster.advance(2.0);
        }

        for id in ids {
            assert_close(cluster.offset_of(id).unwrap(), 0.875);
        }
        assert_close(cluster.coordinator().clock().offset(), 0.875);
    }

    #[tokio::test]
    async fn test_outlier_is_excluded_and_unadjusted() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::strict(),
            vec![
                ClientBehaviour::honest(5.0),
                ClientBehaviour::honest(-3.0),
                ClientBehaviour::honest(500.0),
            ],
        )
        .await
        .unwrap();

        let cycle = cluster.run_cycle().await;
        let report = &cycle.report;

        assert_eq!(report.status, CycleStatus::Synchronized);
        assert_eq!(report.excluded.len(), 1);
        assert_close(report.excluded[0].offset, 500.0);
        assert_close(report.consensus.unwrap(), 2.0 / 3.0);
        assert_eq!(report.deliveries.len(), 2);

        assert_close(cycle.adjustment("P1").unwrap(), 2.0 / 3.0 - 5.0);
        assert_close(cycle.adjustment("P2").unwrap(), 2.0 / 3.0 + 3.0);
        assert!(matches!(
            cycle.run("P3"),
            Some(ClientRun::Round(RoundOutcome::Unadjusted {
                stopped_at: RoundPhase::AwaitingAdjustment,
                kind: FailureKind::Disconnected,
                ..
            }))
        ));
        assert_close(cluster.offset_of("P3").unwrap(), 500.0);
    }

    #[tokio::test]
    async fn test_silent_client_does_not_block_cycle() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::loose(),
            vec![
                ClientBehaviour::honest(5.0),
                ClientBehaviour::honest(-3.0),
                ClientBehaviour::Silent,
            ],
        )
        .await
        .unwrap();

        let cycle = cluster.run_cycle().await;
        let report = &cycle.report;

        assert_eq!(report.connected_clients, 3);
        assert_eq!(report.sampled_clients(), 2);
        assert!(report
            .outcomes
            .iter()
            .any(|o| o.result == Err(FailureKind::Timeout)));
        assert_close(report.consensus.unwrap(), 2.0 / 3.0);
        assert!(cycle.run("P1").unwrap().is_adjusted());
        assert!(cycle.run("P2").unwrap().is_adjusted());
        assert_eq!(
            cycle.run("P3"),
            Some(&ClientRun::Scripted {
                trailing: Vec::new()
            })
        );
    }

    #[tokio::test]
    async fn test_disconnect_after_request() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::loose(),
            vec![
                ClientBehaviour::honest(2.0),
                ClientBehaviour::DropAfterRequest,
            ],
        )
        .await
        .unwrap();

        let cycle = cluster.run_cycle().await;

        assert_eq!(cycle.report.sampled_clients(), 1);
        assert!(cycle
            .report
            .outcomes
            .iter()
            .any(|o| o.result == Err(FailureKind::Disconnected)));
        // Coordinator and P1 alone: consensus is their mean
        assert_close(cycle.report.consensus.unwrap(), 1.0);
        assert_close(cycle.adjustment("P1").unwrap(), -1.0);
    }

    #[tokio::test]
    async fn test_malformed_reply_contributes_nothing() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::loose(),
            vec![
                ClientBehaviour::honest(4.0),
                ClientBehaviour::Malformed("half past noon".to_string()),
            ],
        )
        .await
        .unwrap();

        let cycle = cluster.run_cycle().await;

        assert!(cycle
            .report
            .outcomes
            .iter()
            .any(|o| o.result == Err(FailureKind::Malformed)));
        assert_close(cycle.report.consensus.unwrap(), 2.0);
        assert_eq!(cycle.report.deliveries.len(), 1);
        assert_eq!(
            cycle.run("P2"),
            Some(&ClientRun::Scripted {
                trailing: Vec::new()
            })
        );
    }

    #[tokio::test]
    async fn test_late_reply_times_out() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::loose(),
            vec![
                ClientBehaviour::honest(1.0),
                ClientBehaviour::Delayed {
                    offset: 1.0,
                    delay: Duration::from_secs(1),
                },
            ],
        )
        .await
        .unwrap();

        let cycle = cluster.run_cycle().await;

        assert_eq!(cycle.report.sampled_clients(), 1);
        assert!(cycle
            .report
            .outcomes
            .iter()
            .any(|o| o.result == Err(FailureKind::Timeout)));
        assert!(cycle.run("P1").unwrap().is_adjusted());
    }

    #[tokio::test]
    async fn test_partial_attendance() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::loose().short_window(),
            vec![
                ClientBehaviour::honest(3.0),
                ClientBehaviour::honest(-1.0),
                ClientBehaviour::Absent,
            ],
        )
        .await
        .unwrap();

        let cycle = cluster.run_cycle().await;
        let report = &cycle.report;

        assert!(report.accept_window_exhausted());
        assert_eq!(report.expected_clients, 3);
        assert_eq!(report.connected_clients, 2);
        assert_eq!(report.status, CycleStatus::Synchronized);
        assert_close(report.consensus.unwrap(), 2.0 / 3.0);
        assert_eq!(cycle.run("P3"), Some(&ClientRun::Absent));
    }

    #[tokio::test]
    async fn test_nobody_connects() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::strict().short_window(),
            vec![ClientBehaviour::Absent, ClientBehaviour::Absent],
        )
        .await
        .unwrap();

        let cycle = cluster.run_cycle().await;

        assert_eq!(cycle.report.status, CycleStatus::NoResponses);
        assert_eq!(cycle.report.connected_clients, 0);
        assert!(cycle.report.deliveries.is_empty());
        assert_eq!(cycle.report.coordinator_offset, 0.0);
    }

    #[tokio::test]
    async fn test_second_cycle_is_idempotent() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::loose(),
            vec![
                ClientBehaviour::honest(5.0),
                ClientBehaviour::honest(-3.0),
                ClientBehaviour::honest(1.5),
            ],
        )
        .await
        .unwrap();

        cluster.run_cycle().await;
        let second = cluster.run_cycle().await;

        assert_eq!(second.report.cycle, 2);
        assert_close(second.report.consensus.unwrap(), 0.0);
        for id in ["P1", "P2", "P3"] {
            assert_close(second.adjustment(id).unwrap(), 0.0);
            assert_close(cluster.offset_of(id).unwrap(), 0.875);
        }
        assert_close(second.report.coordinator_offset, 0.875);
    }

    #[tokio::test]
    async fn test_drifting_clocks_stay_bounded() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::loose(),
            vec![
                ClientBehaviour::drifting(5.0, ClockDriftModel::fast()),
                ClientBehaviour::drifting(-3.0, ClockDriftModel::slow()),
                ClientBehaviour::drifting(1.5, ClockDriftModel::perfect()),
            ],
        )
        .await
        .unwrap();
        let ids = ["P1", "P2", "P3"];

        let first = cluster.run_cycle().await;
        assert_close(estimated_spread(&first).unwrap(), 8.0);
        assert!(clock_spread(&cluster, &ids).unwrap() < EPS);

        for _ in 0..4 {
            cluster.advance(10.0);
            let cycle = cluster.run_cycle().await;

            assert_eq!(cycle.report.status, CycleStatus::Synchronized);
            // Fast and slow clocks drift 10ms apiece per 10s interval
            assert!(estimated_spread(&cycle).unwrap() < 0.02 + EPS);
        }
    }

    #[tokio::test]
    async fn test_random_offsets_with_one_outlier() {
        let offsets = OffsetGenerator::with_seed(42).with_outlier(8, 2.0, 500.0);
        let behaviours = offsets.iter().map(|o| ClientBehaviour::honest(*o)).collect();
        let mut cluster = SimulatedCluster::start(ClusterConfig::strict(), behaviours)
            .await
            .unwrap();

        let cycle = cluster.run_cycle().await;
        let report = &cycle.report;

        assert_eq!(report.excluded.len(), 1);
        assert_close(report.excluded[0].offset, 500.0);
        assert_eq!(report.deliveries.len(), 8);
        assert!(report.consensus.unwrap().abs() <= 2.0);
        assert!(!cycle.run("P9").unwrap().is_adjusted());
    }

    #[tokio::test]
    async fn test_excluded_client_history_follows_cycles() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::strict(),
            vec![
                ClientBehaviour::honest(5.0),
                ClientBehaviour::honest(-3.0),
                ClientBehaviour::honest(500.0),
            ],
        )
        .await
        .unwrap();

        cluster.run_cycle().await;
        let second = cluster.run_cycle().await;
        assert_eq!(second.report.excluded.len(), 1);

        let p3 = cluster.store().history(&ProcessId::new("P3")).unwrap();
        assert_eq!(p3.iter().map(|r| r.cycle).collect::<Vec<_>>(), vec![1, 2]);
        assert!(p3.iter().all(|r| r.offset == 500.0));
        assert_eq!(cluster.coordinator().cycle(), 3);
    }

    #[tokio::test]
    async fn test_history_is_recorded() {
        let mut cluster = SimulatedCluster::start(
            ClusterConfig::loose(),
            vec![ClientBehaviour::honest(5.0), ClientBehaviour::honest(-3.0)],
        )
        .await
        .unwrap();

        cluster.run_cycle().await;
        cluster.run_cycle().await;

        let store = cluster.store();
        let p1 = store.history(&ProcessId::new("P1")).unwrap();
        assert_eq!(p1.iter().map(|r| r.cycle).collect::<Vec<_>>(), vec![1, 2]);

        let coordinator = store.history(&ProcessId::coordinator()).unwrap();
        assert_eq!(coordinator.len(), 2);
        assert_close(coordinator[0].offset, 2.0 / 3.0);
        assert_close(coordinator[1].offset, 2.0 / 3.0);
    }
}
