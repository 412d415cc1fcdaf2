//! Berkeley offsets - list the offsets stored in a state directory

use std::path::PathBuf;

use clap::Parser;

use berkeley_runtime::{init_logging, FileOffsetStore, OffsetStore};

#[derive(Parser, Debug)]
#[command(name = "berkeley-offsets")]
#[command(about = "Show stored clock offsets", long_about = None)]
struct Args {
    /// Directory holding offset_*.txt and offset_*.csv
    #[arg(long, default_value = ".")]
    state_dir: PathBuf,

    /// Print every recorded cycle, not just the current offset
    #[arg(long)]
    history: bool,

    /// Delete all stored offsets
    #[arg(long, conflicts_with = "history")]
    reset: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging("warn");

    let store = FileOffsetStore::new(&args.state_dir);
    if args.reset {
        let removed = store.reset()?;
        println!("removed {} files from {}", removed, store.dir().display());
        return Ok(());
    }

    let processes = store.processes()?;
    if processes.is_empty() {
        println!("no offsets in {}", store.dir().display());
        return Ok(());
    }

    for id in processes {
        match store.current_offset(&id) {
            Ok(Some(offset)) => println!("{}: {:+.4}", id, offset),
            Ok(None) => println!("{}: -", id),
            Err(e) => println!("{}: unreadable ({})", id, e),
        }
        if args.history {
            for record in store.history(&id)? {
                println!("  cycle {:>3}  {:+.4}", record.cycle, record.offset);
            }
        }
    }

    Ok(())
}
