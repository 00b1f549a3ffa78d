//! One SQLite connection shared by concurrent runs
//!
//! Runs joined on one task cannot each hold a write transaction on their own
//! connection: the second writer sees `SQLITE_BUSY` until the first commits,
//! and the first never yields the lock while it awaits fetches. Sharing one
//! connection nests every run inside the same batch transaction instead.
//! Profile savepoints stay disjoint because a profile is persisted without
//! awaiting in between.

use crate::config::TierSpec;
use crate::harvest::RunResult;
use crate::sites::ScrapedListing;
use crate::storage::{
    ListingRecord, LocationRecord, RunRecord, ScheduleRecord, ScheduleRow, SourceRecord,
    SourceSpec, SqliteStore, StorageError, StorageResult, Store, StoreStatistics, TierRecord,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable handle to a [`SqliteStore`]
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<SqliteStore>>,
}

impl SharedStore {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, SqliteStore>> {
        self.inner
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }
}

impl Store for SharedStore {
    fn get_or_create_source(&mut self, spec: &SourceSpec) -> StorageResult<SourceRecord> {
        self.lock()?.get_or_create_source(spec)
    }

    fn touch_source(&mut self, source_id: i64, at: DateTime<Utc>) -> StorageResult<()> {
        self.lock()?.touch_source(source_id, at)
    }

    fn find_listing(&self, source_id: i64, name: &str) -> StorageResult<Option<ListingRecord>> {
        self.lock()?.find_listing(source_id, name)
    }

    fn upsert_listing(
        &mut self,
        source_id: i64,
        listing: &ScrapedListing,
    ) -> StorageResult<(ListingRecord, bool)> {
        self.lock()?.upsert_listing(source_id, listing)
    }

    fn replace_schedules(&mut self, listing_id: i64, rows: &[ScheduleRow]) -> StorageResult<()> {
        self.lock()?.replace_schedules(listing_id, rows)
    }

    fn listing_schedules(&self, listing_id: i64) -> StorageResult<Vec<ScheduleRecord>> {
        self.lock()?.listing_schedules(listing_id)
    }

    fn ensure_tags(&mut self, listing_id: i64, tags: &[String]) -> StorageResult<()> {
        self.lock()?.ensure_tags(listing_id, tags)
    }

    fn listing_tags(&self, listing_id: i64) -> StorageResult<Vec<String>> {
        self.lock()?.listing_tags(listing_id)
    }

    fn find_location(
        &self,
        source_id: i64,
        town: &str,
        detail: &str,
    ) -> StorageResult<Option<LocationRecord>> {
        self.lock()?.find_location(source_id, town, detail)
    }

    fn find_locations_by_town(
        &self,
        source_id: i64,
        town: &str,
        partial: bool,
    ) -> StorageResult<Vec<LocationRecord>> {
        self.lock()?.find_locations_by_town(source_id, town, partial)
    }

    fn create_location(
        &mut self,
        source_id: i64,
        town: &str,
        detail: &str,
        is_default: bool,
    ) -> StorageResult<LocationRecord> {
        self.lock()?.create_location(source_id, town, detail, is_default)
    }

    fn get_default_location(&self, source_id: i64) -> StorageResult<LocationRecord> {
        self.lock()?.get_default_location(source_id)
    }

    fn upsert_tier(&mut self, source_id: i64, tier: &TierSpec) -> StorageResult<TierRecord> {
        self.lock()?.upsert_tier(source_id, tier)
    }

    fn find_tier(&self, source_id: i64, name: &str) -> StorageResult<Option<TierRecord>> {
        self.lock()?.find_tier(source_id, name)
    }

    fn begin_batch(&mut self) -> StorageResult<()> {
        self.lock()?.begin_batch()
    }

    fn flush_batch(&mut self) -> StorageResult<()> {
        self.lock()?.flush_batch()
    }

    fn end_batch(&mut self) -> StorageResult<()> {
        self.lock()?.end_batch()
    }

    fn begin_profile(&mut self) -> StorageResult<()> {
        self.lock()?.begin_profile()
    }

    fn commit_profile(&mut self) -> StorageResult<()> {
        self.lock()?.commit_profile()
    }

    fn rollback_profile(&mut self) -> StorageResult<()> {
        self.lock()?.rollback_profile()
    }

    fn record_run(&mut self, result: &RunResult, config_hash: &str) -> StorageResult<i64> {
        self.lock()?.record_run(result, config_hash)
    }

    fn latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        self.lock()?.latest_runs(limit)
    }

    fn statistics(&self) -> StorageResult<StoreStatistics> {
        self.lock()?.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> SourceSpec {
        SourceSpec {
            name: name.to_string(),
            schedule_url: format!("https://{}.example.com/schedule", name),
            base_url: format!("https://{}.example.com/", name),
            image_base_url: None,
        }
    }

    #[test]
    fn test_clones_nest_batches_on_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let shared = SharedStore::new(SqliteStore::open(&path).unwrap());
        let mut first = shared.clone();
        let mut second = shared.clone();
        let reader = SqliteStore::open(&path).unwrap();

        first.begin_batch().unwrap();
        second.begin_batch().unwrap();
        first.get_or_create_source(&spec("sft")).unwrap();
        second.get_or_create_source(&spec("dd")).unwrap();
        first.end_batch().unwrap();

        // second's batch is still open, so nothing is visible elsewhere yet
        assert_eq!(reader.statistics().unwrap().sources, 0);

        second.end_batch().unwrap();
        assert_eq!(reader.statistics().unwrap().sources, 2);
    }
}
