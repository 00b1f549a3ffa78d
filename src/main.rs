//! Listing-Harvest main entry point
//!
//! This is the command-line interface for the listing harvester.

use anyhow::Context;
use clap::Parser;
use listing_harvest::config::{load_config_with_hash, Config};
use listing_harvest::output::{
    load_statistics, print_dry_run, print_run_results, print_statistics, RECENT_RUNS,
};
use listing_harvest::sites::AdapterRegistry;
use listing_harvest::storage::SqliteStore;
use listing_harvest::Harvester;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Listing-Harvest: schedule and profile harvester
///
/// Crawls each configured site's schedule page, visits every listed profile,
/// normalizes what it finds and keeps the result in a local SQLite database.
#[derive(Parser, Debug)]
#[command(name = "listing-harvest")]
#[command(version)]
#[command(about = "Harvests listing schedules and profiles into SQLite", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Site key to run; repeat for several (default: all enabled sites)
    #[arg(long = "site", value_name = "KEY")]
    sites: Vec<String>,

    /// Run the selected sites concurrently
    #[arg(long)]
    parallel: bool,

    /// Repeat the harvest every SECONDS until interrupted
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    every: Option<u64>,

    /// Validate config and show what would be harvested without fetching
    #[arg(long, conflicts_with_all = ["stats", "list_sites"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "list_sites"])]
    stats: bool,

    /// List registered adapters and configured sites and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    list_sites: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.list_sites {
        handle_list_sites(&config);
        return Ok(());
    }
    if cli.stats {
        return handle_stats(&config, cli.json);
    }

    let harvester = Harvester::new(config, config_hash);
    if cli.dry_run {
        let sites = harvester.select_sites(&cli.sites)?;
        print_dry_run(harvester.config(), &sites);
        return Ok(());
    }

    handle_harvest(&harvester, &cli).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("listing_harvest=info,warn"),
            1 => EnvFilter::new("listing_harvest=debug,info"),
            2 => EnvFilter::new("listing_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --list-sites mode
fn handle_list_sites(config: &Config) {
    let registry = AdapterRegistry::with_builtin();

    println!("=== Sites ===\n");
    println!("Registered adapters: {}", registry.keys().join(", "));

    println!("\nConfigured ({}):", config.sites.len());
    for site in &config.sites {
        let state = if site.enabled { "enabled" } else { "disabled" };
        println!("  - {} ({}) {} [{}]", site.key, site.short_name, site.name, state);
    }
}

/// Handles the --stats mode: prints store statistics and recent runs
fn handle_stats(config: &Config, json: bool) -> anyhow::Result<()> {
    let path = Path::new(&config.output.database_path);
    if !path.exists() {
        println!("No database found at: {}", path.display());
        println!("Run a harvest first to generate statistics.");
        return Ok(());
    }

    let store = SqliteStore::open(path)?;
    let stats = load_statistics(&store, RECENT_RUNS)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_statistics(&stats);
    }
    Ok(())
}

/// Handles the main harvest mode, once or on an interval
async fn handle_harvest(harvester: &Harvester, cli: &Cli) -> anyhow::Result<()> {
    let sites = harvester.select_sites(&cli.sites)?;
    if sites.is_empty() {
        println!("No enabled sites to harvest");
        return Ok(());
    }

    let cancel = harvester.cancel_token();
    spawn_interrupt_handler(cancel.clone());

    let mut ticker = cli
        .every
        .map(|secs| tokio::time::interval(Duration::from_secs(secs)));

    loop {
        if let Some(ticker) = ticker.as_mut() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }
        }

        tracing::info!(sites = sites.len(), parallel = cli.parallel, "Starting harvest");
        let results = harvester.run_many(&sites, cli.parallel).await;
        print_run_results(&results, cli.json)?;

        if ticker.is_none() || cancel.is_cancelled() {
            break;
        }
    }

    println!("\n✓ Harvest complete");
    Ok(())
}

/// Cancels the token on the first Ctrl-C
///
/// In-flight runs stop at their next profile boundary.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupt received, stopping after current profiles");
                cancel.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}
