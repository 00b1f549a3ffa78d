//! Storage module for persisting harvested listings
//!
//! This module owns every persistent entity:
//! - sources and their seeded tiers and locations
//! - listings with their schedules and tags
//! - run history with the config hash each run used
//!
//! Writes go through the [`Store`] trait. The orchestrator wraps a whole run
//! in a batch transaction and each profile in a savepoint inside it.

mod schema;
mod shared;
mod sqlite;
mod traits;

pub use shared::SharedStore;
pub use sqlite::SqliteStore;
pub use traits::{Store, StorageError, StorageResult};

use crate::config::SiteConfig;
use chrono::{NaiveDate, Weekday};
use serde::Serialize;

/// Identity and URLs for a source, taken from its site config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub name: String,
    pub schedule_url: String,
    pub base_url: String,
    pub image_base_url: Option<String>,
}

impl SourceSpec {
    pub fn from_site(site: &SiteConfig) -> Self {
        Self {
            name: site.short_name.clone(),
            schedule_url: site.schedule_url.clone(),
            base_url: site.base_url.clone(),
            image_base_url: site.image_base_url.clone(),
        }
    }
}

/// Represents a source in the database
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: i64,
    pub name: String,
    pub schedule_url: String,
    pub base_url: String,
    pub image_base_url: Option<String>,
    pub active: bool,
    pub last_run_at: Option<String>,
}

/// Represents a location in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRecord {
    pub id: i64,
    pub source_id: i64,
    pub town: String,
    pub detail: String,
    pub is_default: bool,
}

/// Represents a tier in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRecord {
    pub id: i64,
    pub source_id: i64,
    pub name: String,
    pub stars: Option<u8>,
    pub incall_30min: Option<String>,
    pub incall_45min: Option<String>,
    pub incall_1hr: Option<String>,
    pub outcall_1hr: Option<String>,
}

/// Represents a listing in the database
#[derive(Debug, Clone)]
pub struct ListingRecord {
    pub id: i64,
    pub source_id: i64,
    pub name: String,
    pub profile_url: String,
    pub tier: Option<String>,
    pub age: Option<u32>,
    pub weight: Option<String>,
    pub bust: Option<String>,
    pub images: Vec<String>,
    pub is_active: bool,
    pub is_expired: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A schedule row ready to insert, with its location already resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRow {
    pub location_id: i64,
    pub day: Weekday,
    /// Next occurrence of `day` at the time of the write
    pub date: NaiveDate,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// Represents a persisted schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub id: i64,
    pub listing_id: i64,
    pub location_id: i64,
    pub day: Weekday,
    pub date: NaiveDate,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_expired: bool,
}

/// Represents a harvest run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub source: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: RunStatus,
    pub total: usize,
    pub new: usize,
    pub updated: usize,
    pub errors: usize,
    pub config_hash: String,
}

/// Row counts across the whole store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    pub sources: u64,
    pub listings: u64,
    pub active_listings: u64,
    pub schedules: u64,
    pub locations: u64,
    pub tags: u64,
    pub runs: u64,
}

/// Final status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[RunStatus::Completed, RunStatus::Cancelled, RunStatus::Failed] {
            let db_str = status.to_db_string();
            let parsed = RunStatus::from_db_string(db_str);
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("running"), None);
    }

    #[test]
    fn test_run_status_serializes_lowercase() {
        let json = serde_json::to_string(&RunStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
