//! Berkeley coordinator - runs one synchronization cycle and exits
//!
//! Prints the consensus offset on stdout. The coordinator's own offset is
//! loaded from and saved to the state directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use berkeley_core::{ProcessId, DEFAULT_PORT};
use berkeley_runtime::{
    init_logging, Coordinator, CoordinatorConfig, CycleStatus, FileOffsetStore, OffsetStore,
};
use berkeley_time::{ConsensusConfig, VirtualClock};

#[derive(Parser, Debug)]
#[command(name = "berkeley-coordinator")]
#[command(about = "Collect client clocks and send each its Berkeley adjustment", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Clients expected this cycle
    #[arg(short, long, default_value = "3")]
    clients: usize,

    /// Total time allowed for clients to connect
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    accept_budget: Duration,

    /// Deadline for each client's reply
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    response_timeout: Duration,

    /// Keep samples within this many standard deviations of the mean
    #[arg(long, default_value_t = ConsensusConfig::LOOSE)]
    deviation_threshold: f64,

    /// Directory holding offset_*.txt and offset_*.csv
    #[arg(long, default_value = ".")]
    state_dir: PathBuf,

    /// Write the cycle report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(if args.verbose { "debug" } else { "info" });

    let consensus = ConsensusConfig::with_threshold(args.deviation_threshold)
        .ok_or_else(|| format!("invalid deviation threshold: {}", args.deviation_threshold))?;
    let config = CoordinatorConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        expected_clients: args.clients,
        accept_budget: args.accept_budget,
        response_timeout: args.response_timeout,
        consensus,
        ..CoordinatorConfig::default()
    };

    let store = Arc::new(FileOffsetStore::new(&args.state_dir));
    let offset = store
        .current_offset(&ProcessId::coordinator())?
        .unwrap_or(0.0);
    let clock = Arc::new(VirtualClock::system(offset));

    let mut coordinator = Coordinator::bind(config, clock).await?.with_store(store)?;
    info!(
        cycle = coordinator.cycle(),
        budget = %humantime::format_duration(args.accept_budget),
        "starting cycle"
    );

    let report = coordinator.run_cycle().await;

    if let Some(path) = &args.report {
        std::fs::write(path, report.to_json()?)?;
        info!(path = %path.display(), "report written");
    }

    match report.status {
        CycleStatus::Synchronized => {
            if let Some(consensus) = report.consensus {
                println!("{}", consensus);
            }
        }
        CycleStatus::NoResponses => eprintln!("no client responded; clocks unchanged"),
        CycleStatus::AllSamplesFiltered => {
            eprintln!("every sample was rejected as an outlier; clocks unchanged")
        }
    }

    Ok(())
}
