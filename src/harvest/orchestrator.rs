//! One harvest run for one source
//!
//! `Start -> FetchSchedule -> (per profile: FetchProfile -> Normalize -> Persist) -> Finalize`
//!
//! Schedule failures end the run. Profile failures are recorded and the run
//! moves on to the next profile.

use super::result::{ErrorKind, ProfileError, ProfileOutcome, RunResult, MAX_ERROR_DETAILS};
use crate::config::SiteConfig;
use crate::location::LocationResolver;
use crate::normalize::next_date_for;
use crate::sites::{ScheduleItem, ScrapedListing, SiteAdapter};
use crate::storage::{RunStatus, ScheduleRow, SourceSpec, StorageResult, Store};
use crate::transport::Fetcher;
use crate::HarvestError;
use chrono::{Local, NaiveDate, Utc};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Profiles between progress log lines
const PROGRESS_EVERY: usize = 5;

const DEFAULT_BATCH_SIZE: usize = 10;

/// Drives a single run: schedule, then each profile in turn
pub struct Orchestrator<'a> {
    site: &'a SiteConfig,
    adapter: &'a dyn SiteAdapter,
    fetcher: &'a mut dyn Fetcher,
    store: &'a mut dyn Store,
    known_towns: &'a [String],
    batch_size: usize,
    max_error_details: usize,
    cancel: CancellationToken,
    today: Option<NaiveDate>,
}

impl<'a> Orchestrator<'a> {
    /// Creates an orchestrator for one site
    ///
    /// # Arguments
    ///
    /// * `site` - The site being harvested
    /// * `adapter` - Parser for the site's pages
    /// * `fetcher` - Transport; opened at run start and closed on every exit
    /// * `store` - Persistence for this run
    pub fn new(
        site: &'a SiteConfig,
        adapter: &'a dyn SiteAdapter,
        fetcher: &'a mut dyn Fetcher,
        store: &'a mut dyn Store,
    ) -> Self {
        Self {
            site,
            adapter,
            fetcher,
            store,
            known_towns: &[],
            batch_size: DEFAULT_BATCH_SIZE,
            max_error_details: MAX_ERROR_DETAILS,
            cancel: CancellationToken::new(),
            today: None,
        }
    }

    /// Town vocabulary for location resolution
    pub fn known_towns(mut self, towns: &'a [String]) -> Self {
        self.known_towns = towns;
        self
    }

    /// Successful upserts between batch commits
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn max_error_details(mut self, cap: usize) -> Self {
        self.max_error_details = cap;
        self
    }

    /// Token checked before each profile
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Pins the date schedule rows are projected from
    pub fn today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Runs the harvest
    ///
    /// # Returns
    ///
    /// * `Ok(RunResult)` - The run finished, was cancelled, or had only
    ///   per-profile failures
    /// * `Err(HarvestError)` - The fetcher could not open, or the schedule
    ///   page could not be fetched or parsed
    pub async fn run(&mut self) -> Result<RunResult, HarvestError> {
        let mut result =
            RunResult::new(&self.site.short_name).with_error_cap(self.max_error_details);
        tracing::info!(source = %self.site.short_name, "Starting harvest");

        if let Err(e) = self.fetcher.open().await {
            self.fetcher.close().await;
            return Err(e.into());
        }

        let outcome = self.run_opened(&mut result).await;
        self.fetcher.close().await;

        let status = outcome?;
        result.finish(status);
        tracing::info!(
            source = %result.source,
            "Harvest {} in {:.1}s: {} new, {} updated, {} errors",
            status.to_db_string(),
            result.duration_seconds().unwrap_or_default(),
            result.new,
            result.updated,
            result.errors
        );
        Ok(result)
    }

    async fn run_opened(&mut self, result: &mut RunResult) -> Result<RunStatus, HarvestError> {
        let source = self
            .store
            .get_or_create_source(&SourceSpec::from_site(self.site))?;

        let options = self
            .adapter
            .schedule_options()
            .with_cookies(&self.site.cookies);
        let html = self.fetcher.fetch(&self.site.schedule_url, &options).await?;
        let items = self.adapter.parse_schedule(&html)?;
        result.schedule_items = items.len();

        let groups = group_by_profile(items);
        result.total = groups.len();
        tracing::info!(
            source = %self.site.short_name,
            "Found {} schedule items across {} profiles",
            result.schedule_items,
            groups.len()
        );

        let mut resolver = LocationResolver::new(
            source.id,
            self.known_towns,
            self.site.auto_create_locations,
        );

        self.store.begin_batch()?;
        let processed = self
            .process_groups(source.id, &groups, &mut resolver, result)
            .await;
        let flushed = self.store.end_batch();
        let status = processed?;
        flushed?;

        self.store.touch_source(source.id, Utc::now())?;
        Ok(status)
    }

    async fn process_groups(
        &mut self,
        source_id: i64,
        groups: &[Vec<ScheduleItem>],
        resolver: &mut LocationResolver,
        result: &mut RunResult,
    ) -> Result<RunStatus, HarvestError> {
        let mut since_flush = 0;

        for (index, group) in groups.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(
                    source = %self.site.short_name,
                    "Cancelled after {} of {} profiles",
                    index,
                    groups.len()
                );
                return Ok(RunStatus::Cancelled);
            }

            match self.process_profile(source_id, group, resolver).await {
                Ok(outcome) => {
                    result.record_outcome(outcome);
                    since_flush += 1;
                    if since_flush >= self.batch_size {
                        self.store.flush_batch()?;
                        since_flush = 0;
                    }
                }
                Err(e) => {
                    tracing::error!(profile = %e.profile_ref, "Profile failed: {}", e);
                    result.record_error(&e);
                }
            }

            let done = index + 1;
            if done % PROGRESS_EVERY == 0 {
                tracing::info!("Progress: {}/{} profiles", done, groups.len());
            }
        }

        Ok(RunStatus::Completed)
    }

    async fn process_profile(
        &mut self,
        source_id: i64,
        group: &[ScheduleItem],
        resolver: &mut LocationResolver,
    ) -> Result<ProfileOutcome, ProfileError> {
        let first = &group[0];
        let profile_ref = first.profile_ref.as_str();
        let url = self.adapter.profile_url(profile_ref);
        tracing::debug!(profile = profile_ref, url = %url, "Fetching profile");

        let options = self
            .adapter
            .profile_options()
            .with_cookies(&self.site.cookies);
        let html = self
            .fetcher
            .fetch(&url, &options)
            .await
            .map_err(|e| ProfileError::new(profile_ref, ErrorKind::Fetch, e))?;

        let fields = self.adapter.parse_profile(&html);
        let mut listing = self.adapter.normalize_listing(first, fields, group);
        if listing.name.trim().is_empty() {
            return Err(ProfileError::new(
                profile_ref,
                ErrorKind::Parse,
                "listing has no name",
            ));
        }
        if !self.site.variable_pricing {
            self.fill_tier_rates(source_id, &mut listing)
                .map_err(|e| ProfileError::new(profile_ref, ErrorKind::Persist, e))?;
        }

        self.persist(source_id, &listing, resolver)
            .map_err(|e| ProfileError::new(profile_ref, ErrorKind::Persist, e))
    }

    /// Copies the seeded tier's rates into any rate the profile page left empty
    fn fill_tier_rates(&self, source_id: i64, listing: &mut ScrapedListing) -> StorageResult<()> {
        let Some(tier_name) = listing.tier.as_deref() else {
            return Ok(());
        };
        let Some(tier) = self.store.find_tier(source_id, tier_name)? else {
            return Ok(());
        };

        for (slot, rate) in [
            (&mut listing.incall_30min, tier.incall_30min),
            (&mut listing.incall_45min, tier.incall_45min),
            (&mut listing.incall_1hr, tier.incall_1hr),
            (&mut listing.outcall_1hr, tier.outcall_1hr),
        ] {
            if slot.is_none() {
                *slot = rate;
            }
        }
        Ok(())
    }

    /// Writes one listing inside its own savepoint
    fn persist(
        &mut self,
        source_id: i64,
        listing: &ScrapedListing,
        resolver: &mut LocationResolver,
    ) -> StorageResult<ProfileOutcome> {
        self.store.begin_profile()?;
        match self.write_listing(source_id, listing, resolver) {
            Ok(outcome) => {
                self.store.commit_profile()?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = self.store.rollback_profile() {
                    tracing::warn!(error = %rollback, "Profile rollback failed");
                }
                // Locations created inside the savepoint are gone now
                resolver.clear_cache();
                Err(e)
            }
        }
    }

    fn write_listing(
        &mut self,
        source_id: i64,
        listing: &ScrapedListing,
        resolver: &mut LocationResolver,
    ) -> StorageResult<ProfileOutcome> {
        let (record, is_new) = self.store.upsert_listing(source_id, listing)?;

        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        let mut rows = Vec::with_capacity(listing.schedules.len());
        for schedule in &listing.schedules {
            let location_id = resolver.resolve(&mut *self.store, &schedule.location)?;
            rows.push(ScheduleRow {
                location_id,
                day: schedule.day,
                date: next_date_for(schedule.day, today),
                start_time: schedule.start_time.clone(),
                end_time: schedule.end_time.clone(),
            });
        }
        self.store.replace_schedules(record.id, &rows)?;
        self.store.ensure_tags(record.id, &listing.tags)?;

        Ok(if is_new {
            ProfileOutcome::Created
        } else {
            ProfileOutcome::Updated
        })
    }
}

/// Groups schedule rows by profile, keeping first-appearance order
fn group_by_profile(items: Vec<ScheduleItem>) -> Vec<Vec<ScheduleItem>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<ScheduleItem>> = Vec::new();
    for item in items {
        match index.get(&item.profile_ref) {
            Some(&position) => groups[position].push(item),
            None => {
                index.insert(item.profile_ref.clone(), groups.len());
                groups.push(vec![item]);
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, TierSpec};
    use crate::location::UNKNOWN_DETAIL;
    use crate::sites::SftAdapter;
    use crate::storage::{
        ListingRecord, LocationRecord, RunRecord, ScheduleRecord, SourceRecord, SqliteStore,
        StorageError, StoreStatistics, TierRecord,
    };
    use crate::transport::{FetchError, FetchOptions};
    use async_trait::async_trait;
    use chrono::Weekday;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const SCHEDULE_URL: &str = "https://example.com/schedule";

    /// Serves canned pages; any URL containing `fail_on` errors
    struct FakeFetcher {
        schedule: Option<String>,
        fail_on: Option<&'static str>,
        fetches: Arc<AtomicU32>,
        closed: Arc<AtomicU32>,
        cancel_after: Option<(u32, CancellationToken)>,
    }

    impl FakeFetcher {
        fn new(schedule: &str) -> Self {
            Self {
                schedule: Some(schedule.to_string()),
                fail_on: None,
                fetches: Arc::new(AtomicU32::new(0)),
                closed: Arc::new(AtomicU32::new(0)),
                cancel_after: None,
            }
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&mut self, url: &str, _options: &FetchOptions) -> Result<String, FetchError> {
            let count = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, token)) = &self.cancel_after {
                if count >= *after {
                    token.cancel();
                }
            }
            if url == SCHEDULE_URL {
                return self.schedule.clone().ok_or(FetchError::Status {
                    url: url.to_string(),
                    status: 503,
                });
            }
            if self.fail_on.is_some_and(|needle| url.contains(needle)) {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: 500,
                });
            }
            Ok(format!(
                "<html><body><div class=\"content\"><p>Age: 25</p><p>{}</p></div></body></html>",
                if url.contains("ava") { "*ELITE* New" } else { "Petite" }
            ))
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Delegates to an in-memory store but fails one `replace_schedules` call
    struct FailingStore {
        inner: SqliteStore,
        schedule_writes: u32,
        fail_on_write: u32,
    }

    impl FailingStore {
        fn failing_on(fail_on_write: u32) -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                schedule_writes: 0,
                fail_on_write,
            }
        }
    }

    impl Store for FailingStore {
        fn get_or_create_source(&mut self, spec: &SourceSpec) -> StorageResult<SourceRecord> {
            self.inner.get_or_create_source(spec)
        }
        fn touch_source(&mut self, source_id: i64, at: chrono::DateTime<Utc>) -> StorageResult<()> {
            self.inner.touch_source(source_id, at)
        }
        fn find_listing(&self, source_id: i64, name: &str) -> StorageResult<Option<ListingRecord>> {
            self.inner.find_listing(source_id, name)
        }
        fn upsert_listing(
            &mut self,
            source_id: i64,
            listing: &ScrapedListing,
        ) -> StorageResult<(ListingRecord, bool)> {
            self.inner.upsert_listing(source_id, listing)
        }
        fn replace_schedules(&mut self, listing_id: i64, rows: &[ScheduleRow]) -> StorageResult<()> {
            self.schedule_writes += 1;
            if self.schedule_writes == self.fail_on_write {
                return Err(StorageError::Lock("disk I/O error".to_string()));
            }
            self.inner.replace_schedules(listing_id, rows)
        }
        fn listing_schedules(&self, listing_id: i64) -> StorageResult<Vec<ScheduleRecord>> {
            self.inner.listing_schedules(listing_id)
        }
        fn ensure_tags(&mut self, listing_id: i64, tags: &[String]) -> StorageResult<()> {
            self.inner.ensure_tags(listing_id, tags)
        }
        fn listing_tags(&self, listing_id: i64) -> StorageResult<Vec<String>> {
            self.inner.listing_tags(listing_id)
        }
        fn find_location(
            &self,
            source_id: i64,
            town: &str,
            detail: &str,
        ) -> StorageResult<Option<LocationRecord>> {
            self.inner.find_location(source_id, town, detail)
        }
        fn find_locations_by_town(
            &self,
            source_id: i64,
            town: &str,
            partial: bool,
        ) -> StorageResult<Vec<LocationRecord>> {
            self.inner.find_locations_by_town(source_id, town, partial)
        }
        fn create_location(
            &mut self,
            source_id: i64,
            town: &str,
            detail: &str,
            is_default: bool,
        ) -> StorageResult<LocationRecord> {
            self.inner.create_location(source_id, town, detail, is_default)
        }
        fn get_default_location(&self, source_id: i64) -> StorageResult<LocationRecord> {
            self.inner.get_default_location(source_id)
        }
        fn upsert_tier(&mut self, source_id: i64, tier: &TierSpec) -> StorageResult<TierRecord> {
            self.inner.upsert_tier(source_id, tier)
        }
        fn find_tier(&self, source_id: i64, name: &str) -> StorageResult<Option<TierRecord>> {
            self.inner.find_tier(source_id, name)
        }
        fn begin_batch(&mut self) -> StorageResult<()> {
            self.inner.begin_batch()
        }
        fn flush_batch(&mut self) -> StorageResult<()> {
            self.inner.flush_batch()
        }
        fn end_batch(&mut self) -> StorageResult<()> {
            self.inner.end_batch()
        }
        fn begin_profile(&mut self) -> StorageResult<()> {
            self.inner.begin_profile()
        }
        fn commit_profile(&mut self) -> StorageResult<()> {
            self.inner.commit_profile()
        }
        fn rollback_profile(&mut self) -> StorageResult<()> {
            self.inner.rollback_profile()
        }
        fn record_run(&mut self, result: &RunResult, config_hash: &str) -> StorageResult<i64> {
            self.inner.record_run(result, config_hash)
        }
        fn latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
            self.inner.latest_runs(limit)
        }
        fn statistics(&self) -> StorageResult<StoreStatistics> {
            self.inner.statistics()
        }
    }

    fn site() -> SiteConfig {
        let toml = r#"
[output]
database-path = "./unused.db"

[[site]]
key = "sft"
name = "Test Friends"
short-name = "SFT"
schedule-url = "https://example.com/schedule"
base-url = "https://example.com/"
fetcher = "static"
"#;
        parse_config(toml).unwrap().sites.remove(0)
    }

    fn five_profiles() -> String {
        let links: String = ["ava", "bella", "cleo", "dana", "eve"]
            .iter()
            .map(|n| format!("<a href=\"/{n}/\">{} 12PM-8PM</a>", n.to_uppercase()))
            .collect();
        format!(
            "<html><body><div class=\"content\"><h5>DOWNTOWN INCALL</h5><h6>MONDAY</h6>{}\
             <h6>TUESDAY</h6><a href=\"/ava/\">*ULTRA VIP* AVA 1PM-9PM</a></div></body></html>",
            links
        )
    }

    fn towns() -> Vec<String> {
        vec!["Downtown".to_string()]
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 8).unwrap()
    }

    #[test]
    fn test_group_by_profile_keeps_first_appearance_order() {
        let item = |r: &str| ScheduleItem {
            name: r.to_uppercase(),
            profile_ref: r.to_string(),
            day: Some(Weekday::Mon),
            location: "Downtown".to_string(),
            start_time: None,
            end_time: None,
            tier: None,
        };
        let groups = group_by_profile(vec![item("b"), item("a"), item("b"), item("c")]);
        let refs: Vec<&str> = groups.iter().map(|g| g[0].profile_ref.as_str()).collect();
        assert_eq!(refs, vec!["b", "a", "c"]);
        assert_eq!(groups[0].len(), 2);
    }

    #[tokio::test]
    async fn test_one_failing_profile_does_not_stop_the_run() {
        let site = site();
        let adapter = SftAdapter::new(&site);
        let mut fetcher = FakeFetcher::new(&five_profiles());
        fetcher.fail_on = Some("cleo");
        let closed = fetcher.closed.clone();
        let mut store = SqliteStore::open_in_memory().unwrap();
        let towns = towns();

        let result = Orchestrator::new(&site, &adapter, &mut fetcher, &mut store)
            .known_towns(&towns)
            .batch_size(2)
            .today(today())
            .run()
            .await
            .unwrap();

        assert_eq!(result.total, 5);
        assert_eq!(result.schedule_items, 6);
        assert_eq!(result.new, 4);
        assert_eq!(result.errors, 1);
        assert_eq!(result.error_details[0].profile.as_deref(), Some("cleo"));
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let source = store
            .get_or_create_source(&SourceSpec::from_site(&site))
            .unwrap();
        for name in ["Ava", "Bella", "Dana", "Eve"] {
            assert!(store.find_listing(source.id, name).unwrap().is_some());
        }
        assert!(store.find_listing(source.id, "Cleo").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_schedule_rows_and_tier_are_persisted() {
        let site = site();
        let adapter = SftAdapter::new(&site);
        let mut fetcher = FakeFetcher::new(&five_profiles());
        let mut store = SqliteStore::open_in_memory().unwrap();
        let towns = towns();

        Orchestrator::new(&site, &adapter, &mut fetcher, &mut store)
            .known_towns(&towns)
            .today(today())
            .run()
            .await
            .unwrap();

        let source = store
            .get_or_create_source(&SourceSpec::from_site(&site))
            .unwrap();
        let ava = store.find_listing(source.id, "Ava").unwrap().unwrap();
        // First schedule row carries no tier, so the profile's Elite marker is used
        assert_eq!(ava.tier.as_deref(), Some("Elite"));

        let schedules = store.listing_schedules(ava.id).unwrap();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].day, Weekday::Mon);
        assert_eq!(schedules[0].date, NaiveDate::from_ymd_opt(2025, 12, 15).unwrap());
        assert_eq!(schedules[1].day, Weekday::Tue);
        assert_eq!(schedules[1].start_time.as_deref(), Some("1PM"));
        assert_eq!(store.listing_tags(ava.id).unwrap(), vec!["NEW"]);
    }

    #[test]
    fn test_tier_rates_fill_missing_listing_rates() {
        let site = site();
        let adapter = SftAdapter::new(&site);
        let mut fetcher = FakeFetcher::new("");
        let mut store = SqliteStore::open_in_memory().unwrap();
        let source = store
            .get_or_create_source(&SourceSpec::from_site(&site))
            .unwrap();
        let tier = TierSpec {
            name: "Elite".to_string(),
            stars: Some(1),
            incall_30min: Some("$160".to_string()),
            incall_45min: None,
            incall_1hr: Some("$260".to_string()),
            outcall_1hr: None,
        };
        store.upsert_tier(source.id, &tier).unwrap();

        let mut listing = ScrapedListing {
            name: "Ava".to_string(),
            tier: Some("Elite".to_string()),
            incall_1hr: Some("$300".to_string()),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(&site, &adapter, &mut fetcher, &mut store);
        orchestrator.fill_tier_rates(source.id, &mut listing).unwrap();

        assert_eq!(listing.incall_30min.as_deref(), Some("$160"));
        assert_eq!(listing.incall_1hr.as_deref(), Some("$300"));
        assert_eq!(listing.outcall_1hr, None);
    }

    #[tokio::test]
    async fn test_schedule_failure_is_fatal_and_closes_fetcher() {
        let site = site();
        let adapter = SftAdapter::new(&site);
        let mut fetcher = FakeFetcher::new("");
        fetcher.schedule = None;
        let closed = fetcher.closed.clone();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let result = Orchestrator::new(&site, &adapter, &mut fetcher, &mut store)
            .run()
            .await;

        assert!(matches!(result, Err(HarvestError::Fetch(_))));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unparseable_schedule_is_fatal() {
        let site = site();
        let adapter = SftAdapter::new(&site);
        let mut fetcher = FakeFetcher::new("<html><body>Maintenance</body></html>");
        let mut store = SqliteStore::open_in_memory().unwrap();

        let result = Orchestrator::new(&site, &adapter, &mut fetcher, &mut store)
            .run()
            .await;

        assert!(matches!(result, Err(HarvestError::Parse(_))));
    }

    #[tokio::test]
    async fn test_cancellation_between_profiles() {
        let site = site();
        let adapter = SftAdapter::new(&site);
        let token = CancellationToken::new();
        let mut fetcher = FakeFetcher::new(&five_profiles());
        // schedule fetch + two profile fetches
        fetcher.cancel_after = Some((3, token.clone()));
        let closed = fetcher.closed.clone();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let result = Orchestrator::new(&site, &adapter, &mut fetcher, &mut store)
            .cancel_token(token)
            .today(today())
            .run()
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.total, 5);
        assert_eq!(result.new, 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let source = store
            .get_or_create_source(&SourceSpec::from_site(&site))
            .unwrap();
        assert!(store.find_listing(source.id, "Bella").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_failure_mid_profile_rolls_back_only_that_profile() {
        let mut site = site();
        site.auto_create_locations = true;
        let adapter = SftAdapter::new(&site);
        let mut fetcher = FakeFetcher::new(&five_profiles());
        // Ava is written first and auto-creates the Downtown location
        let mut store = FailingStore::failing_on(1);
        let towns = towns();

        let result = Orchestrator::new(&site, &adapter, &mut fetcher, &mut store)
            .known_towns(&towns)
            .batch_size(2)
            .today(today())
            .run()
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.new, 4);
        assert_eq!(result.errors, 1);
        assert_eq!(result.error_details[0].profile.as_deref(), Some("ava"));
        assert!(result.error_details[0].error.starts_with("persist failed"));

        let source = store
            .get_or_create_source(&SourceSpec::from_site(&site))
            .unwrap();
        assert!(store.find_listing(source.id, "Ava").unwrap().is_none());

        // The rolled-back location was recreated for Bella, not served from cache
        let downtown = store
            .find_location(source.id, "Downtown", UNKNOWN_DETAIL)
            .unwrap()
            .unwrap();
        for name in ["Bella", "Cleo", "Dana", "Eve"] {
            let listing = store.find_listing(source.id, name).unwrap().unwrap();
            let schedules = store.listing_schedules(listing.id).unwrap();
            assert_eq!(schedules.len(), 1);
            assert_eq!(schedules[0].location_id, downtown.id);
        }

        let stats = store.statistics().unwrap();
        assert_eq!(stats.listings, 4);
        assert_eq!(stats.schedules, 4);
        assert_eq!(stats.locations, 2);
    }
}
