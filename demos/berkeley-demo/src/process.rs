//! Berkeley process - one client round against the coordinator
//!
//! Without `--offset` the offset persisted by the previous round is used.
//! Prints the offset after the round on stdout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use berkeley_core::{ProcessId, DEFAULT_PORT};
use berkeley_runtime::{init_logging, ClientConfig, FileOffsetStore, RoundOutcome, SyncClient};
use berkeley_time::SystemClock;

#[derive(Parser, Debug)]
#[command(name = "berkeley-process")]
#[command(about = "Report this clock to the coordinator and apply its adjustment", long_about = None)]
struct Args {
    /// Coordinator host
    #[arg(long)]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Initial clock offset in seconds
    #[arg(short, long, allow_hyphen_values = true)]
    offset: Option<f64>,

    /// Process name used in logs and state files
    #[arg(long, default_value = "N/A")]
    id: String,

    /// Directory holding offset_*.txt and offset_*.csv
    #[arg(long, default_value = ".")]
    state_dir: PathBuf,

    /// How long to wait for the adjustment
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    adjustment_timeout: Duration,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(if args.verbose { "debug" } else { "info" });

    let config = ClientConfig {
        adjustment_timeout: args.adjustment_timeout,
        ..ClientConfig::new(format!("{}:{}", args.host, args.port), ProcessId::new(args.id))
    };
    let store = Arc::new(FileOffsetStore::new(&args.state_dir));
    let mut client = SyncClient::from_store(config, Arc::new(SystemClock), store, args.offset)?;

    if let RoundOutcome::Unadjusted { reason, .. } = client.run_round().await {
        eprintln!("clock not adjusted: {}", reason);
    }
    println!("{}", client.state().offset);

    Ok(())
}
