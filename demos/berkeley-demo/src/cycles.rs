//! Berkeley cycle driver - coordinator plus P1..P3 in one process
//!
//! The first cycle starts the processes at +5.0s, -3.0s and +1.5s. Later
//! cycles resume from the offsets saved in the state directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinSet;
use tracing::{info, warn};

use berkeley_core::ProcessId;
use berkeley_runtime::{
    init_logging, ClientConfig, Coordinator, CoordinatorConfig, FileOffsetStore, OffsetStore,
    RoundOutcome, SyncClient,
};
use berkeley_time::{Clock, ConsensusConfig, SystemClock, VirtualClock};

const PROCESSES: [(&str, f64); 3] = [("P1", 5.0), ("P2", -3.0), ("P3", 1.5)];

#[derive(Parser, Debug)]
#[command(name = "berkeley-cycles")]
#[command(about = "Run repeated synchronization cycles over loopback", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "30")]
    cycles: u64,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Directory holding offset_*.txt and offset_*.csv
    #[arg(long, default_value = ".")]
    state_dir: PathBuf,

    /// Keep samples within this many standard deviations of the mean
    #[arg(long, default_value_t = ConsensusConfig::LOOSE)]
    deviation_threshold: f64,

    /// Pause between cycles
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    pause: Duration,

    /// Delete stored offsets before the first cycle
    #[arg(long)]
    fresh: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(if args.verbose { "debug" } else { "warn" });

    let store = Arc::new(FileOffsetStore::new(&args.state_dir));
    if args.fresh {
        let removed = store.reset()?;
        info!(removed, "stored offsets cleared");
    }

    let consensus = ConsensusConfig::with_threshold(args.deviation_threshold)
        .ok_or_else(|| format!("invalid deviation threshold: {}", args.deviation_threshold))?;
    let addr = format!("{}:{}", args.host, args.port);
    let config = CoordinatorConfig {
        bind_addr: addr.clone(),
        expected_clients: PROCESSES.len(),
        consensus,
        ..CoordinatorConfig::default()
    };
    let coordinator_offset = store
        .current_offset(&ProcessId::coordinator())?
        .unwrap_or(0.0);
    let clock = Arc::new(VirtualClock::system(coordinator_offset));
    let mut coordinator = Coordinator::bind(config, clock)
        .await?
        .with_store(store.clone())?;

    for round in 1..=args.cycles {
        let mut clients = JoinSet::new();
        for (name, initial) in PROCESSES {
            let id = ProcessId::new(name);
            // Initial offsets apply to the first cycle only
            let initial = (round == 1).then_some(initial);
            let mut client = SyncClient::from_store(
                ClientConfig::new(addr.clone(), id.clone()),
                Arc::new(SystemClock),
                store.clone(),
                initial,
            )?;
            clients.spawn(async move { (id, client.run_round().await) });
        }

        let report = coordinator.run_cycle().await;

        let mut line = format!(
            "cycle {:>3} [{}] consensus {}",
            report.cycle,
            SystemClock.now(),
            report
                .consensus
                .map_or_else(|| "-".to_string(), |c| format!("{:+.4}", c)),
        );
        let mut results = Vec::with_capacity(PROCESSES.len());
        while let Some(joined) = clients.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("process task failed: {}", e),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, outcome) in results {
            let offset = match outcome {
                RoundOutcome::Adjusted { offset, .. } => format!("{:+.4}", offset),
                RoundOutcome::Unadjusted { .. } => "unadjusted".to_string(),
            };
            line.push_str(&format!("  {} {}", id, offset));
        }
        println!("{}", line);

        if round < args.cycles {
            tokio::time::sleep(args.pause).await;
        }
    }

    Ok(())
}
