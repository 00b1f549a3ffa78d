//! Per-site adapters
//!
//! Every source has a bespoke [`SiteAdapter`] that knows how to read its
//! schedule page and its profile pages. The adapter only parses; fetching,
//! persistence and error accounting belong to the orchestrator.
//!
//! Field-level misses are never errors. A parse only fails when the page lacks
//! the container the adapter needs to find anything at all.

mod dd;
mod mirage;
mod sft;

pub use dd::DdAdapter;
pub use mirage::MirageAdapter;
pub use sft::SftAdapter;

use crate::config::SiteConfig;
use crate::extract::ListingRates;
use crate::normalize::{normalize_name, normalize_tier, TierTable};
use crate::transport::FetchOptions;
use crate::ParseError;
use chrono::Weekday;
use scraper::ElementRef;
use serde::Serialize;
use std::collections::BTreeMap;

/// One row of a schedule page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleItem {
    pub name: String,

    /// Site-relative reference to the profile page (usually a slug)
    pub profile_ref: String,

    /// `None` on roster pages that list profiles without days
    pub day: Option<Weekday>,

    /// Raw location text as published
    pub location: String,

    pub start_time: Option<String>,
    pub end_time: Option<String>,

    /// Tier as labelled on the schedule page
    pub tier: Option<String>,
}

/// One day of availability attached to a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapedSchedule {
    #[serde(serialize_with = "serialize_weekday")]
    pub day: Weekday,
    pub location: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl ScheduleItem {
    /// The row as a schedule entry; roster rows have none
    pub fn schedule(&self) -> Option<ScrapedSchedule> {
        Some(ScrapedSchedule {
            day: self.day?,
            location: self.location.clone(),
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
        })
    }
}

/// Fields parsed from a profile page; every one is optional
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileFields {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub nationality: Option<String>,
    pub ethnicity: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub bust: Option<String>,
    pub bust_type: Option<String>,
    pub measurements: Option<String>,
    pub hair_color: Option<String>,
    pub eye_color: Option<String>,
    pub service_type: Option<String>,
    pub tier: Option<String>,
    pub rates: ListingRates,
    pub rate_notes: Option<String>,
    pub images: Vec<String>,
    pub tags: Vec<String>,

    /// Availability published on the profile page itself
    pub schedules: Vec<ScrapedSchedule>,
}

/// A normalized listing ready to be persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScrapedListing {
    pub name: String,
    pub profile_url: String,
    pub tier: Option<String>,
    pub age: Option<u32>,
    pub nationality: Option<String>,
    pub ethnicity: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub bust: Option<String>,
    pub bust_type: Option<String>,
    pub measurements: Option<String>,
    pub hair_color: Option<String>,
    pub eye_color: Option<String>,
    pub service_type: Option<String>,
    pub incall_30min: Option<String>,
    pub incall_45min: Option<String>,
    pub incall_1hr: Option<String>,
    pub outcall_1hr: Option<String>,
    pub rate_notes: Option<String>,
    pub images: Vec<String>,
    pub tags: Vec<String>,
    pub schedules: Vec<ScrapedSchedule>,
}

/// Contract every source adapter fulfils
pub trait SiteAdapter: Send + Sync {
    /// Registry key, e.g. "sft"
    fn key(&self) -> &'static str;

    /// Full URL of a profile page
    fn profile_url(&self, profile_ref: &str) -> String;

    /// Tier vocabulary for this source
    fn tier_table(&self) -> &TierTable;

    fn schedule_options(&self) -> FetchOptions {
        FetchOptions::default()
    }

    fn profile_options(&self) -> FetchOptions {
        FetchOptions::default()
    }

    /// Parses the schedule page into rows
    fn parse_schedule(&self, html: &str) -> Result<Vec<ScheduleItem>, ParseError>;

    /// Parses one profile page
    fn parse_profile(&self, html: &str) -> ProfileFields;

    /// Merges every schedule row of one profile with its parsed fields
    ///
    /// # Arguments
    ///
    /// * `first` - First schedule row seen for the profile; supplies the name
    ///   and the tier hint
    /// * `profile` - Fields parsed from the profile page
    /// * `items` - All schedule rows for the profile, in page order
    ///
    /// The schedule-page tier wins over the profile tier. Profile-page
    /// schedules are appended only for days the schedule page did not cover.
    fn normalize_listing(
        &self,
        first: &ScheduleItem,
        profile: ProfileFields,
        items: &[ScheduleItem],
    ) -> ScrapedListing {
        let tier = first
            .tier
            .as_deref()
            .or(profile.tier.as_deref())
            .map(|raw| normalize_tier(raw, self.tier_table()));

        let mut schedules: Vec<ScrapedSchedule> =
            items.iter().filter_map(ScheduleItem::schedule).collect();
        for extra in profile.schedules {
            if !schedules.iter().any(|s| s.day == extra.day) {
                schedules.push(extra);
            }
        }

        ScrapedListing {
            name: normalize_name(&first.name),
            profile_url: self.profile_url(&first.profile_ref),
            tier,
            age: profile.age,
            nationality: profile.nationality,
            ethnicity: profile.ethnicity,
            height: profile.height,
            weight: profile.weight,
            bust: profile.bust,
            bust_type: profile.bust_type,
            measurements: profile.measurements,
            hair_color: profile.hair_color,
            eye_color: profile.eye_color,
            service_type: profile.service_type,
            incall_30min: profile.rates.incall_30min,
            incall_45min: profile.rates.incall_45min,
            incall_1hr: profile.rates.incall_1hr,
            outcall_1hr: profile.rates.outcall_1hr,
            rate_notes: profile.rate_notes,
            images: profile.images,
            tags: profile.tags,
            schedules,
        }
    }
}

type AdapterCtor = fn(&SiteConfig) -> Box<dyn SiteAdapter>;

/// Maps site keys to adapter constructors
pub struct AdapterRegistry {
    ctors: BTreeMap<&'static str, AdapterCtor>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            ctors: BTreeMap::new(),
        }
    }

    /// Registry with every adapter shipped in this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("sft", build_sft);
        registry.register("dd", build_dd);
        registry.register("mirage", build_mirage);
        registry
    }

    pub fn register(&mut self, key: &'static str, ctor: AdapterCtor) {
        self.ctors.insert(key, ctor);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ctors.contains_key(key)
    }

    /// Registered keys in sorted order
    pub fn keys(&self) -> Vec<&'static str> {
        self.ctors.keys().copied().collect()
    }

    /// Builds the adapter for a configured site
    pub fn adapter_for(&self, site: &SiteConfig) -> Option<Box<dyn SiteAdapter>> {
        self.ctors.get(site.key.as_str()).map(|ctor| ctor(site))
    }
}

fn build_sft(site: &SiteConfig) -> Box<dyn SiteAdapter> {
    Box::new(SftAdapter::new(site))
}

fn build_dd(site: &SiteConfig) -> Box<dyn SiteAdapter> {
    Box::new(DdAdapter::new(site))
}

fn build_mirage(site: &SiteConfig) -> Box<dyn SiteAdapter> {
    Box::new(MirageAdapter::new(site))
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

const WEEKDAYS: [(&str, Weekday); 7] = [
    ("Monday", Weekday::Mon),
    ("Tuesday", Weekday::Tue),
    ("Wednesday", Weekday::Wed),
    ("Thursday", Weekday::Thu),
    ("Friday", Weekday::Fri),
    ("Saturday", Weekday::Sat),
    ("Sunday", Weekday::Sun),
];

/// Abbreviations accepted besides the full names
const WEEKDAY_ABBREVIATIONS: [(&str, Weekday); 11] = [
    ("mon", Weekday::Mon),
    ("tue", Weekday::Tue),
    ("tues", Weekday::Tue),
    ("wed", Weekday::Wed),
    ("weds", Weekday::Wed),
    ("thu", Weekday::Thu),
    ("thur", Weekday::Thu),
    ("thurs", Weekday::Thu),
    ("fri", Weekday::Fri),
    ("sat", Weekday::Sat),
    ("sun", Weekday::Sun),
];

/// Reads a weekday from a heading such as "MONDAY", "Mon, Dec 08" or
/// "Today - Friday"
///
/// Only whole words count: "Sunset" and "Monthly" name no day.
pub fn parse_weekday(text: &str) -> Option<Weekday> {
    text.split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .find_map(weekday_word)
}

fn weekday_word(word: &str) -> Option<Weekday> {
    let lower = word.to_lowercase();
    let singular = lower.strip_suffix('s').unwrap_or(&lower);
    WEEKDAYS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(singular))
        .or_else(|| WEEKDAY_ABBREVIATIONS.iter().find(|(abbr, _)| *abbr == lower))
        .map(|(_, day)| *day)
}

/// Full English name of a weekday
pub fn weekday_name(day: Weekday) -> &'static str {
    WEEKDAYS[day.num_days_from_monday() as usize].0
}

fn serialize_weekday<S: serde::Serializer>(day: &Weekday, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(weekday_name(*day))
}

/// Text of an element with each text node trimmed and joined by `sep`
pub(crate) fn joined_text(element: ElementRef<'_>, sep: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}
