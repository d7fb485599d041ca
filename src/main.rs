//! vibecore - storage core maintenance tool

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use log::info;
use std::path::PathBuf;
use vibecore::database::{Database, DatabaseConfig};

/// Create or open a vibecore database, recovering it if needed
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base path of the database files (<path>.xid, <path>.log, <path>.db)
    path: PathBuf,

    /// Create a new database instead of opening one
    #[arg(short, long)]
    create: bool,

    /// Page cache memory in MiB
    #[arg(short, long, default_value = "64")]
    memory_mb: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = DatabaseConfig::new(&args.path).with_cache_memory(args.memory_mb * 1024 * 1024);

    let database = if args.create {
        Database::create(&config)
            .with_context(|| format!("Failed to create database at {}", args.path.display()))?
    } else {
        Database::open(&config)
            .with_context(|| format!("Failed to open database at {}", args.path.display()))?
    };

    info!("Pages: {}", database.page_number());
    info!("Transactions: {}", database.transaction_count());
    match database.recovery_stats() {
        Some(stats) => info!(
            "Recovered: {} records analyzed, {} redone, {} undone, {} transactions aborted",
            stats.records_analyzed,
            stats.records_redone,
            stats.records_undone,
            stats.transactions_aborted.len()
        ),
        None => info!("Last session closed cleanly"),
    }

    database.close().context("Failed to close database")?;
    Ok(())
}
