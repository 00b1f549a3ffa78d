//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::config::TierSpec;
use crate::harvest::RunResult;
use crate::sites::ScrapedListing;
use crate::storage::{
    ListingRecord, LocationRecord, RunRecord, ScheduleRecord, ScheduleRow, SourceRecord,
    SourceSpec, StoreStatistics, TierRecord,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock error: {0}")]
    Lock(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every write takes `&mut self`. Batches nest: only the outermost
/// `end_batch` commits, so concurrent runs can share one connection.
/// Lookups on town, detail and tier names are case-insensitive.
pub trait Store {
    // ===== Sources =====

    /// Gets the source with the spec's name, creating it on first sight
    ///
    /// A new source also gets its default location (`Unknown` / `unknown`).
    fn get_or_create_source(&mut self, spec: &SourceSpec) -> StorageResult<SourceRecord>;

    /// Records the time of the source's latest run
    fn touch_source(&mut self, source_id: i64, at: DateTime<Utc>) -> StorageResult<()>;

    // ===== Listings =====

    fn find_listing(&self, source_id: i64, name: &str) -> StorageResult<Option<ListingRecord>>;

    /// Inserts or updates a listing by `(source, name)`
    ///
    /// # Returns
    ///
    /// The stored record and whether it was newly created
    fn upsert_listing(
        &mut self,
        source_id: i64,
        listing: &ScrapedListing,
    ) -> StorageResult<(ListingRecord, bool)>;

    /// Deletes every schedule of the listing, then inserts `rows`
    fn replace_schedules(&mut self, listing_id: i64, rows: &[ScheduleRow]) -> StorageResult<()>;

    /// Schedules of a listing ordered by weekday
    fn listing_schedules(&self, listing_id: i64) -> StorageResult<Vec<ScheduleRecord>>;

    /// Associates tags with a listing; existing associations are kept
    fn ensure_tags(&mut self, listing_id: i64, tags: &[String]) -> StorageResult<()>;

    /// Tag names of a listing, sorted
    fn listing_tags(&self, listing_id: i64) -> StorageResult<Vec<String>>;

    // ===== Locations =====

    fn find_location(
        &self,
        source_id: i64,
        town: &str,
        detail: &str,
    ) -> StorageResult<Option<LocationRecord>>;

    /// Locations of a town; `partial` matches the town as a substring
    fn find_locations_by_town(
        &self,
        source_id: i64,
        town: &str,
        partial: bool,
    ) -> StorageResult<Vec<LocationRecord>>;

    /// Creates a location; a new default demotes the previous one
    fn create_location(
        &mut self,
        source_id: i64,
        town: &str,
        detail: &str,
        is_default: bool,
    ) -> StorageResult<LocationRecord>;

    fn get_default_location(&self, source_id: i64) -> StorageResult<LocationRecord>;

    // ===== Tiers =====

    fn upsert_tier(&mut self, source_id: i64, tier: &TierSpec) -> StorageResult<TierRecord>;

    fn find_tier(&self, source_id: i64, name: &str) -> StorageResult<Option<TierRecord>>;

    // ===== Batch Control =====

    /// Opens the run-wide batch transaction, or joins one already open
    fn begin_batch(&mut self) -> StorageResult<()>;

    /// Commits pending batch work and reopens the batch
    fn flush_batch(&mut self) -> StorageResult<()>;

    /// Leaves the batch; the outermost call commits pending work
    fn end_batch(&mut self) -> StorageResult<()>;

    /// Opens a savepoint for one profile
    fn begin_profile(&mut self) -> StorageResult<()>;

    fn commit_profile(&mut self) -> StorageResult<()>;

    /// Undoes every write since `begin_profile`
    fn rollback_profile(&mut self) -> StorageResult<()>;

    // ===== Run History =====

    fn record_run(&mut self, result: &RunResult, config_hash: &str) -> StorageResult<i64>;

    /// Most recent runs first
    fn latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    fn statistics(&self) -> StorageResult<StoreStatistics>;
}
