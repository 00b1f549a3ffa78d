//! Console reporting
//!
//! This module handles:
//! - Printing run results as text or JSON
//! - Printing the dry-run plan for a configuration
//! - Loading and printing store statistics

pub mod stats;

pub use stats::{load_statistics, print_statistics, HarvestStatistics, RECENT_RUNS};

use crate::config::{Config, FetcherKind, SiteConfig};
use crate::harvest::RunResult;

/// Renders one run result as a short multi-line text block
pub fn format_run_result(result: &RunResult) -> String {
    let mut out = format!(
        "{} [{}] {} profiles ({} schedule rows): {} new, {} updated, {} errors",
        result.source,
        result.status.to_db_string(),
        result.total,
        result.schedule_items,
        result.new,
        result.updated,
        result.errors
    );
    if let Some(secs) = result.duration_seconds() {
        out.push_str(&format!(" in {:.1}s", secs));
    }
    for detail in &result.error_details {
        match &detail.profile {
            Some(profile) => out.push_str(&format!("\n  - {}: {}", profile, detail.error)),
            None => out.push_str(&format!("\n  - {}", detail.error)),
        }
    }
    if result.errors > result.error_details.len() {
        out.push_str(&format!(
            "\n  ... and {} more",
            result.errors - result.error_details.len()
        ));
    }
    out
}

/// Prints run results, as pretty JSON when `json` is set
pub fn print_run_results(results: &[RunResult], json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    println!("=== Harvest Results ===\n");
    for result in results {
        println!("{}", format_run_result(result));
    }
    Ok(())
}

/// Prints what a run with this configuration would do
pub fn print_dry_run(config: &Config, sites: &[&SiteConfig]) {
    println!("=== Listing-Harvest Dry Run ===\n");

    println!("Harvest Settings:");
    println!("  Batch size: {}", config.harvest.batch_size);
    println!("  Max retries: {}", config.harvest.max_retries);
    println!("  Retry backoff: {}ms", config.harvest.retry_backoff_ms);
    println!("  Request timeout: {}s", config.harvest.request_timeout_secs);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nKnown Towns ({}):", config.locations.known_towns.len());
    if !config.locations.known_towns.is_empty() {
        println!("  {}", config.locations.known_towns.join(", "));
    }

    println!("\nSites to Run ({}):", sites.len());
    for site in sites {
        let fetcher = match site.fetcher {
            FetcherKind::Static => "static",
            FetcherKind::Stealth => "stealth",
        };
        println!(
            "  - {} [{}] {} via {} fetcher, {}s between requests",
            site.short_name, site.key, site.name, fetcher, site.rate_limit_seconds
        );
        println!("    * schedule: {}", site.schedule_url);
        if !site.tiers.is_empty() || !site.locations.is_empty() {
            println!(
                "    * seeds: {} tiers, {} locations",
                site.tiers.len(),
                site.locations.len()
            );
        }
    }

    println!("\n✓ Configuration is valid");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{ErrorKind, ProfileError};
    use crate::storage::RunStatus;

    #[test]
    fn test_format_run_result_lists_details() {
        let mut result = RunResult::new("SFT").with_error_cap(1);
        result.total = 4;
        result.new = 2;
        result.record_error(&ProfileError::new("cleo", ErrorKind::Fetch, "HTTP 500"));
        result.record_error(&ProfileError::new("dana", ErrorKind::Persist, "locked"));
        result.finish(RunStatus::Completed);

        let text = format_run_result(&result);
        assert!(text.starts_with("SFT [completed] 4 profiles (0 schedule rows): 2 new, 0 updated, 2 errors"));
        assert!(text.contains("\n  - cleo: fetch failed: HTTP 500"));
        assert!(text.ends_with("\n  ... and 1 more"));
    }

    #[test]
    fn test_format_failed_run_without_profile() {
        let mut result = RunResult::new("DD");
        result.fail("Fetch error: blocked");
        let text = format_run_result(&result);
        assert!(text.contains("[failed]"));
        assert!(text.contains("\n  - Fetch error: blocked"));
    }
}
