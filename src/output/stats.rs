//! Statistics from the harvest database
//!
//! This module loads store-wide counts and recent run history, and prints
//! them for the `--stats` mode.

use crate::storage::{RunRecord, Store, StoreStatistics};
use crate::HarvestError;
use serde::Serialize;

/// Runs shown by `--stats`
pub const RECENT_RUNS: usize = 10;

/// Store counts plus the most recent runs
#[derive(Debug, Clone, Serialize)]
pub struct HarvestStatistics {
    #[serde(flatten)]
    pub counts: StoreStatistics,

    /// Most recent first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The store to query
/// * `recent` - How many recent runs to include
pub fn load_statistics(store: &dyn Store, recent: usize) -> Result<HarvestStatistics, HarvestError> {
    Ok(HarvestStatistics {
        counts: store.statistics()?,
        recent_runs: store.latest_runs(recent)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    let counts = &stats.counts;
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Sources: {}", counts.sources);
    println!(
        "  Listings: {} ({} active)",
        counts.listings, counts.active_listings
    );
    println!("  Schedules: {}", counts.schedules);
    println!("  Locations: {}", counts.locations);
    println!("  Tags: {}", counts.tags);
    println!("  Runs recorded: {}", counts.runs);
    println!();

    if stats.recent_runs.is_empty() {
        println!("No runs recorded yet");
        return;
    }

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!("  {}", run_line(run));
    }
}

fn run_line(run: &RunRecord) -> String {
    format!(
        "#{} {} {} [{}] total {}, new {}, updated {}, errors {}",
        run.id,
        run.started_at,
        run.source,
        run.status.to_db_string(),
        run.total,
        run.new,
        run.updated,
        run.errors
    )
}
