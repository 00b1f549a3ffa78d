//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.

use crate::config::TierSpec;
use crate::harvest::RunResult;
use crate::sites::{parse_weekday, weekday_name, ScrapedListing};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StorageError, StorageResult, Store};
use crate::storage::{
    ListingRecord, LocationRecord, RunRecord, RunStatus, ScheduleRecord, ScheduleRow,
    SourceRecord, SourceSpec, StoreStatistics, TierRecord,
};
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Town and detail of the location every new source starts with
const DEFAULT_TOWN: &str = "Unknown";
const DEFAULT_DETAIL: &str = "unknown";

const LISTING_COLUMNS: &str = "id, source_id, name, profile_url, tier, age, weight, bust, images, \
     is_active, is_expired, created_at, updated_at";

const LOCATION_COLUMNS: &str = "id, source_id, town, detail, is_default";

const TIER_COLUMNS: &str =
    "id, source_id, name, stars, incall_30min, incall_45min, incall_1hr, outcall_1hr";

/// SQLite storage backend
pub struct SqliteStore {
    conn: Connection,
    /// Open `begin_batch` calls; runs sharing this store nest their batches
    batch_depth: usize,
}

impl SqliteStore {
    /// Opens or creates the database file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL lets concurrent runs read while one of them writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            batch_depth: 0,
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            batch_depth: 0,
        })
    }

    fn source_by_name(&self, name: &str) -> StorageResult<Option<SourceRecord>> {
        let source = self
            .conn
            .query_row(
                "SELECT id, name, schedule_url, base_url, image_base_url, active, last_run_at
                 FROM sources WHERE name = ?1",
                params![name],
                |row| {
                    Ok(SourceRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        schedule_url: row.get(2)?,
                        base_url: row.get(3)?,
                        image_base_url: row.get(4)?,
                        active: row.get(5)?,
                        last_run_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(source)
    }

    fn listing_by_id(&self, listing_id: i64) -> StorageResult<ListingRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM listings WHERE id = ?1", LISTING_COLUMNS),
                params![listing_id],
                listing_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("Listing ID {}", listing_id)))
    }

    fn location_by_id(&self, location_id: i64) -> StorageResult<LocationRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM locations WHERE id = ?1", LOCATION_COLUMNS),
                params![location_id],
                location_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("Location ID {}", location_id)))
    }

    fn count(&self, sql: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl Store for SqliteStore {
    // ===== Sources =====

    fn get_or_create_source(&mut self, spec: &SourceSpec) -> StorageResult<SourceRecord> {
        if let Some(existing) = self.source_by_name(&spec.name)? {
            return Ok(existing);
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO sources (name, schedule_url, base_url, image_base_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                spec.name,
                spec.schedule_url,
                spec.base_url,
                spec.image_base_url,
                now
            ],
        )?;
        let source_id = self.conn.last_insert_rowid();
        self.create_location(source_id, DEFAULT_TOWN, DEFAULT_DETAIL, true)?;

        tracing::info!(source = %spec.name, "Created source");
        self.source_by_name(&spec.name)?
            .ok_or_else(|| StorageError::NotFound(format!("Source {}", spec.name)))
    }

    fn touch_source(&mut self, source_id: i64, at: DateTime<Utc>) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE sources SET last_run_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), source_id],
        )?;
        Ok(())
    }

    // ===== Listings =====

    fn find_listing(&self, source_id: i64, name: &str) -> StorageResult<Option<ListingRecord>> {
        let listing = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM listings WHERE source_id = ?1 AND name = ?2",
                    LISTING_COLUMNS
                ),
                params![source_id, name],
                listing_from_row,
            )
            .optional()?;
        Ok(listing)
    }

    fn upsert_listing(
        &mut self,
        source_id: i64,
        listing: &ScrapedListing,
    ) -> StorageResult<(ListingRecord, bool)> {
        let now = Utc::now().to_rfc3339();
        let images = if listing.images.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&listing.images)?)
        };

        let existing = self.find_listing(source_id, &listing.name)?;
        let is_new = existing.is_none();

        let listing_id = match existing {
            Some(record) => {
                self.conn.execute(
                    "UPDATE listings SET
                        profile_url = ?1, tier = ?2, age = ?3, nationality = ?4, ethnicity = ?5,
                        height = ?6, weight = ?7, bust = ?8, bust_type = ?9, measurements = ?10,
                        hair_color = ?11, eye_color = ?12, service_type = ?13,
                        incall_30min = ?14, incall_45min = ?15, incall_1hr = ?16, outcall_1hr = ?17,
                        rate_notes = ?18, images = ?19, is_active = 1, is_expired = 0,
                        updated_at = ?20
                     WHERE id = ?21",
                    params![
                        listing.profile_url,
                        listing.tier,
                        listing.age,
                        listing.nationality,
                        listing.ethnicity,
                        listing.height,
                        listing.weight,
                        listing.bust,
                        listing.bust_type,
                        listing.measurements,
                        listing.hair_color,
                        listing.eye_color,
                        listing.service_type,
                        listing.incall_30min,
                        listing.incall_45min,
                        listing.incall_1hr,
                        listing.outcall_1hr,
                        listing.rate_notes,
                        images,
                        now,
                        record.id
                    ],
                )?;
                record.id
            }
            None => {
                self.conn.execute(
                    "INSERT INTO listings (
                        source_id, name, profile_url, tier, age, nationality, ethnicity,
                        height, weight, bust, bust_type, measurements, hair_color, eye_color,
                        service_type, incall_30min, incall_45min, incall_1hr, outcall_1hr,
                        rate_notes, images, created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                               ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?22)",
                    params![
                        source_id,
                        listing.name,
                        listing.profile_url,
                        listing.tier,
                        listing.age,
                        listing.nationality,
                        listing.ethnicity,
                        listing.height,
                        listing.weight,
                        listing.bust,
                        listing.bust_type,
                        listing.measurements,
                        listing.hair_color,
                        listing.eye_color,
                        listing.service_type,
                        listing.incall_30min,
                        listing.incall_45min,
                        listing.incall_1hr,
                        listing.outcall_1hr,
                        listing.rate_notes,
                        images,
                        now
                    ],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        Ok((self.listing_by_id(listing_id)?, is_new))
    }

    fn replace_schedules(&mut self, listing_id: i64, rows: &[ScheduleRow]) -> StorageResult<()> {
        let savepoint = self.conn.savepoint()?;
        savepoint.execute(
            "DELETE FROM schedules WHERE listing_id = ?1",
            params![listing_id],
        )?;
        {
            let mut stmt = savepoint.prepare(
                "INSERT INTO schedules (listing_id, location_id, day_of_week, date, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    listing_id,
                    row.location_id,
                    weekday_name(row.day),
                    row.date.format(DATE_FORMAT).to_string(),
                    row.start_time,
                    row.end_time
                ])?;
            }
        }
        savepoint.commit()?;
        Ok(())
    }

    fn listing_schedules(&self, listing_id: i64) -> StorageResult<Vec<ScheduleRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, listing_id, location_id, day_of_week, date, start_time, end_time, is_expired
             FROM schedules WHERE listing_id = ?1 ORDER BY id",
        )?;

        let mut schedules = stmt
            .query_map(params![listing_id], |row| {
                Ok(ScheduleRecord {
                    id: row.get(0)?,
                    listing_id: row.get(1)?,
                    location_id: row.get(2)?,
                    day: weekday_column(row, 3)?,
                    date: date_column(row, 4)?,
                    start_time: row.get(5)?,
                    end_time: row.get(6)?,
                    is_expired: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        schedules.sort_by_key(|s| s.day.num_days_from_monday());
        Ok(schedules)
    }

    fn ensure_tags(&mut self, listing_id: i64, tags: &[String]) -> StorageResult<()> {
        for tag in tags {
            self.conn.execute(
                "INSERT OR IGNORE INTO tags (name) VALUES (?1)",
                params![tag],
            )?;
            let tag_id: i64 =
                self.conn
                    .query_row("SELECT id FROM tags WHERE name = ?1", params![tag], |row| {
                        row.get(0)
                    })?;
            self.conn.execute(
                "INSERT OR IGNORE INTO listing_tags (listing_id, tag_id) VALUES (?1, ?2)",
                params![listing_id, tag_id],
            )?;
        }
        Ok(())
    }

    fn listing_tags(&self, listing_id: i64) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.name FROM tags t
             JOIN listing_tags lt ON lt.tag_id = t.id
             WHERE lt.listing_id = ?1
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![listing_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    // ===== Locations =====

    fn find_location(
        &self,
        source_id: i64,
        town: &str,
        detail: &str,
    ) -> StorageResult<Option<LocationRecord>> {
        let location = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM locations WHERE source_id = ?1 AND town = ?2 AND detail = ?3",
                    LOCATION_COLUMNS
                ),
                params![source_id, town.trim(), detail.trim()],
                location_from_row,
            )
            .optional()?;
        Ok(location)
    }

    fn find_locations_by_town(
        &self,
        source_id: i64,
        town: &str,
        partial: bool,
    ) -> StorageResult<Vec<LocationRecord>> {
        let (condition, pattern) = if partial {
            (
                "town LIKE '%' || ?2 || '%' ESCAPE '\\'",
                escape_like(town.trim()),
            )
        } else {
            ("town = ?2", town.trim().to_string())
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM locations WHERE source_id = ?1 AND {} ORDER BY id",
            LOCATION_COLUMNS, condition
        ))?;
        let locations = stmt
            .query_map(params![source_id, pattern], location_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(locations)
    }

    fn create_location(
        &mut self,
        source_id: i64,
        town: &str,
        detail: &str,
        is_default: bool,
    ) -> StorageResult<LocationRecord> {
        if is_default {
            self.conn.execute(
                "UPDATE locations SET is_default = 0 WHERE source_id = ?1",
                params![source_id],
            )?;
        }
        self.conn.execute(
            "INSERT INTO locations (source_id, town, detail, is_default) VALUES (?1, ?2, ?3, ?4)",
            params![source_id, town.trim(), detail.trim(), is_default],
        )?;
        let location_id = self.conn.last_insert_rowid();
        tracing::debug!(source_id, town, detail, is_default, "Created location");
        self.location_by_id(location_id)
    }

    fn get_default_location(&self, source_id: i64) -> StorageResult<LocationRecord> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM locations WHERE source_id = ?1 AND is_default = 1 LIMIT 1",
                    LOCATION_COLUMNS
                ),
                params![source_id],
                location_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("Default location for source {}", source_id)))
    }

    // ===== Tiers =====

    fn upsert_tier(&mut self, source_id: i64, tier: &TierSpec) -> StorageResult<TierRecord> {
        self.conn.execute(
            "INSERT INTO tiers (source_id, name, stars, incall_30min, incall_45min, incall_1hr, outcall_1hr)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source_id, name) DO UPDATE SET
                stars = excluded.stars,
                incall_30min = excluded.incall_30min,
                incall_45min = excluded.incall_45min,
                incall_1hr = excluded.incall_1hr,
                outcall_1hr = excluded.outcall_1hr",
            params![
                source_id,
                tier.name,
                tier.stars,
                tier.incall_30min,
                tier.incall_45min,
                tier.incall_1hr,
                tier.outcall_1hr
            ],
        )?;
        self.find_tier(source_id, &tier.name)?
            .ok_or_else(|| StorageError::NotFound(format!("Tier {}", tier.name)))
    }

    fn find_tier(&self, source_id: i64, name: &str) -> StorageResult<Option<TierRecord>> {
        let tier = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM tiers WHERE source_id = ?1 AND name = ?2",
                    TIER_COLUMNS
                ),
                params![source_id, name.trim()],
                |row| {
                    Ok(TierRecord {
                        id: row.get(0)?,
                        source_id: row.get(1)?,
                        name: row.get(2)?,
                        stars: row.get(3)?,
                        incall_30min: row.get(4)?,
                        incall_45min: row.get(5)?,
                        incall_1hr: row.get(6)?,
                        outcall_1hr: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(tier)
    }

    // ===== Batch Control =====

    fn begin_batch(&mut self) -> StorageResult<()> {
        if self.batch_depth == 0 {
            self.conn.execute_batch("BEGIN")?;
        }
        self.batch_depth += 1;
        Ok(())
    }

    fn flush_batch(&mut self) -> StorageResult<()> {
        if self.batch_depth > 0 {
            self.conn.execute_batch("COMMIT; BEGIN")?;
            tracing::debug!("Flushed batch");
        }
        Ok(())
    }

    fn end_batch(&mut self) -> StorageResult<()> {
        match self.batch_depth {
            0 => {}
            1 => {
                self.conn.execute_batch("COMMIT")?;
                self.batch_depth = 0;
            }
            _ => self.batch_depth -= 1,
        }
        Ok(())
    }

    fn begin_profile(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("SAVEPOINT profile")?;
        Ok(())
    }

    fn commit_profile(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("RELEASE SAVEPOINT profile")?;
        Ok(())
    }

    fn rollback_profile(&mut self) -> StorageResult<()> {
        self.conn
            .execute_batch("ROLLBACK TO SAVEPOINT profile; RELEASE SAVEPOINT profile")?;
        Ok(())
    }

    // ===== Run History =====

    fn record_run(&mut self, result: &RunResult, config_hash: &str) -> StorageResult<i64> {
        let error_details = serde_json::to_string(&result.error_details)?;
        self.conn.execute(
            "INSERT INTO runs (source, started_at, completed_at, status, total, new_count,
                               updated_count, errors, schedule_items, error_details, config_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                result.source,
                result.started_at.to_rfc3339(),
                result.completed_at.map(|at| at.to_rfc3339()),
                result.status.to_db_string(),
                result.total,
                result.new,
                result.updated,
                result.errors,
                result.schedule_items,
                error_details,
                config_hash
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source, started_at, completed_at, status, total, new_count,
                    updated_count, errors, config_hash
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;

        let runs = stmt
            .query_map(params![limit], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    started_at: row.get(2)?,
                    completed_at: row.get(3)?,
                    status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                        .unwrap_or(RunStatus::Failed),
                    total: row.get(5)?,
                    new: row.get(6)?,
                    updated: row.get(7)?,
                    errors: row.get(8)?,
                    config_hash: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn statistics(&self) -> StorageResult<StoreStatistics> {
        Ok(StoreStatistics {
            sources: self.count("SELECT COUNT(*) FROM sources")?,
            listings: self.count("SELECT COUNT(*) FROM listings")?,
            active_listings: self.count("SELECT COUNT(*) FROM listings WHERE is_active = 1")?,
            schedules: self.count("SELECT COUNT(*) FROM schedules")?,
            locations: self.count("SELECT COUNT(*) FROM locations")?,
            tags: self.count("SELECT COUNT(*) FROM tags")?,
            runs: self.count("SELECT COUNT(*) FROM runs")?,
        })
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if self.batch_depth > 0 {
            if let Err(e) = self.conn.execute_batch("COMMIT") {
                tracing::warn!(error = %e, "Failed to commit open batch on close");
            }
        }
    }
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<ListingRecord> {
    let images: Option<String> = row.get(8)?;
    Ok(ListingRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        name: row.get(2)?,
        profile_url: row.get(3)?,
        tier: row.get(4)?,
        age: row.get(5)?,
        weight: row.get(6)?,
        bust: row.get(7)?,
        images: images
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default(),
        is_active: row.get(9)?,
        is_expired: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn location_from_row(row: &Row<'_>) -> rusqlite::Result<LocationRecord> {
    Ok(LocationRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        town: row.get(2)?,
        detail: row.get(3)?,
        is_default: row.get(4)?,
    })
}

fn weekday_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Weekday> {
    let text: String = row.get(idx)?;
    parse_weekday(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid weekday '{}'", text).into(),
        )
    })
}

fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Escapes `%`, `_` and `\` so a `LIKE` pattern matches them literally
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
