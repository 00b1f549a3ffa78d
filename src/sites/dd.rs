//! DD adapter
//!
//! The schedule page is a grid of `a.card` elements. Each card embeds a JSON
//! blob in `data-doll-info` with the tier and `[location, date]` pairs; hours
//! live in the card's `div.bline` rows. Profile stats are read from
//! `.doll-table-info` only, so site chrome never leaks into fields.

use super::{joined_text, parse_weekday, ProfileFields, ScheduleItem, ScrapedSchedule, SiteAdapter};
use crate::config::SiteConfig;
use crate::extract::{extract_tags, infer_bust_type, DEFAULT_TAG_KEYWORDS};
use crate::normalize::{
    normalize_bust_size, normalize_color, normalize_height, normalize_measurements,
    normalize_service_type, normalize_weight, title_case, TierTable,
};
use crate::transport::FetchOptions;
use crate::ParseError;
use chrono::{Datelike, Local, NaiveDate, Weekday};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::sync::LazyLock;

/// Blocks that describe the profile's own doll
const PROFILE_REGION: &str = "div.tier-badge, div.doll-table-info, div.right";

/// Location suffixes that imply their town when none is written
const KNOWN_VENUES: [(&str, &str); 6] = [
    ("Richmond-Peter", "Downtown"),
    ("Front-Spadina", "Downtown"),
    ("Bay-College", "Downtown"),
    ("HWY427-Bloor", "Etobicoke"),
    ("HWY10-Eglinton", "Mississauga"),
    ("Square One", "Mississauga"),
];

const UPLOADS_MARKER: &str = "wp-content/uploads/";

static MONTH_DAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z]{3})\s+(\d{1,2})").expect("valid regex"));
static HOURS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,2}(?::\d{2})?\s*(?:am|pm))\s*-\s*(\d{1,2}(?::\d{2})?\s*(?:am|pm))")
        .expect("valid regex")
});
static STAT_AGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Age[:\s]+(\d+)").expect("valid regex"));
static STAT_HEIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(?i)Height[:\\s]+(\\d+\\s*cm|\\d+['\u{2019}\u{2032}]?\\s*\\d*[\"\u{201d}\u{2033}]?)")
        .expect("valid regex")
});
static STAT_WEIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Weight[:\s]+(\d+\s*(?:lbs?|kg)?)").expect("valid regex")
});
static STAT_BUST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Bust[:\s]+(\d+\s*[A-Z]{1,3})\b").expect("valid regex")
});
static STAT_FIGURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        "(?i)(?:Figure|Measurements?)[:\\s]+(\\d+[A-Z]*(?:\\s*[\u{2013}\u{2014}/-]\\s*\\d+\\s*[\u{2013}\u{2014}/-]\\s*\\d+)?)",
    )
    .expect("valid regex")
});
static CUP_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\d+[A-Z]+$").expect("valid regex"));
static LEADING_CUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+[A-Z]+)").expect("valid regex"));
static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)").expect("valid regex"));
static STAT_NATIONALITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Nationality[:\s]+([A-Za-z\s/&-]+?)(?:\s+[A-Z][a-z]+:|$)")
        .expect("valid regex")
});
static STAT_ETHNICITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Ethnicity[:\s]+(.+?)(?:\s+(?:Nationality|Hair|Eye|Height|Weight|Age|Figure|Bust|Service)[:\s]|$)",
    )
    .expect("valid regex")
});
static STAT_HAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Hair[:\s]+([A-Za-z\s/]+?)(?:\s+[A-Z][a-z]+:|$)").expect("valid regex")
});
static STAT_EYES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Eyes?[:\s]+([A-Za-z\s/]+?)(?:\s+[A-Z][a-z]+:|$)").expect("valid regex")
});
static SERVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Service\s*(?:Details?|Type)?[:\s]+([A-Za-z\s/,&]+?)(?:\s+[A-Z][a-z]+:|$)")
        .expect("valid regex")
});

/// The JSON embedded in each schedule card
#[derive(Debug, Default, Deserialize)]
struct DollInfo {
    #[serde(default)]
    tier: Vec<String>,
    #[serde(default)]
    date_location: Vec<Vec<String>>,
}

/// One `p[data-date]` row of a card or profile schedule
struct DayRow {
    date: String,
    location: String,
    hours: String,
}

/// Adapter for the card-based DD schedule
pub struct DdAdapter {
    base_url: String,
    tiers: TierTable,
    today: Option<NaiveDate>,
}

impl DdAdapter {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            base_url: site.base_url.clone(),
            tiers: TierTable::dd(),
            today: None,
        }
    }

    /// Pins the date used to discard past schedule dates
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    fn card_items(&self, card: ElementRef<'_>, slug: &str) -> Option<Vec<ScheduleItem>> {
        let raw_info = card.value().attr("data-doll-info").unwrap_or("{}");
        let info: DollInfo = match serde_json::from_str(&unescape_entities(raw_info)) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(profile = slug, error = %e, "Skipping card with malformed doll info");
                return None;
            }
        };

        let name = first_text(card, "div.title").unwrap_or_else(|| title_case(&slug.replace('-', " ")));
        let tier = info.tier.first().map(|t| t.trim().to_string());
        let rows = day_rows(card, "div.bline p[data-date]");
        let today = self.today();

        let pairs: Vec<(String, String, String)> = if info.date_location.is_empty() {
            rows.into_iter()
                .map(|row| (row.location, row.date, row.hours))
                .collect()
        } else {
            info.date_location
                .iter()
                .filter(|pair| pair.len() >= 2)
                .map(|pair| {
                    let (location, date) = (&pair[0], &pair[1]);
                    let hours = rows
                        .iter()
                        .find(|row| row.date.contains(date.as_str()) || date.contains(row.date.as_str()))
                        .map(|row| row.hours.clone())
                        .unwrap_or_default();
                    (location.clone(), date.clone(), hours)
                })
                .collect()
        };

        let mut items = Vec::new();
        for (location, date, hours) in pairs {
            let Some((town, detail)) = parse_dd_location(&location) else {
                tracing::debug!(profile = slug, "Skipping outcall schedule");
                continue;
            };
            let Some(day) = parse_dd_date(&date, today) else {
                continue;
            };
            let (start_time, end_time) = parse_dd_time(&hours);
            items.push(ScheduleItem {
                name: name.clone(),
                profile_ref: slug.to_string(),
                day: Some(day),
                location: format!("{}, {}", town, detail),
                start_time,
                end_time,
                tier: tier.clone(),
            });
        }
        Some(items)
    }
}

impl SiteAdapter for DdAdapter {
    fn key(&self) -> &'static str {
        "dd"
    }

    fn profile_url(&self, profile_ref: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/{}/", base, profile_ref.trim_matches('/'))
    }

    fn tier_table(&self) -> &TierTable {
        &self.tiers
    }

    fn schedule_options(&self) -> FetchOptions {
        FetchOptions::wait_for("a.card")
    }

    fn profile_options(&self) -> FetchOptions {
        FetchOptions::wait_for(".doll-table-info")
    }

    fn parse_schedule(&self, html: &str) -> Result<Vec<ScheduleItem>, ParseError> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("a.card[data-doll-info]").map_err(|_| {
            ParseError::MissingContainer {
                what: "schedule cards",
            }
        })?;

        let cards: Vec<ElementRef<'_>> = document.select(&selector).collect();
        if cards.is_empty() {
            return Err(ParseError::MissingContainer {
                what: "schedule cards",
            });
        }

        let mut items = Vec::new();
        for card in cards {
            let Some(slug) = card.value().attr("href").and_then(profile_slug) else {
                continue;
            };
            if let Some(card_items) = self.card_items(card, &slug) {
                items.extend(card_items);
            }
        }

        tracing::debug!(items = items.len(), "Parsed DD schedule");
        Ok(items)
    }

    fn parse_profile(&self, html: &str) -> ProfileFields {
        let document = Html::parse_document(html);
        let mut fields = ProfileFields {
            name: profile_name(&document),
            ..Default::default()
        };

        let stats = select_first(&document, "div.doll-table-info").map(|el| joined_text(el, " "));
        if let Some(text) = &stats {
            read_stats(text, &mut fields);
        }

        fields.tier = badge_tier(&document);

        fields.service_type = select_first(&document, "div.right")
            .map(|el| joined_text(el, " "))
            .and_then(|text| service_from(&text))
            .or_else(|| stats.as_deref().and_then(service_from));

        fields.images = upload_images(&document);

        let mut keywords: Vec<&str> = DEFAULT_TAG_KEYWORDS.to_vec();
        keywords.extend(["GFE", "PSE"]);
        fields.tags = extract_tags(&profile_region_text(&document), &keywords);

        let today = self.today();
        if let Some(schedule) = select_first(&document, "div.schedule") {
            for row in day_rows(schedule, "p[data-date]") {
                let Some((town, detail)) = parse_dd_location(&row.location) else {
                    continue;
                };
                let Some(day) = parse_dd_date(&row.date, today) else {
                    continue;
                };
                let (start_time, end_time) = parse_dd_time(&row.hours);
                fields.schedules.push(ScrapedSchedule {
                    day,
                    location: format!("{}, {}", town, detail),
                    start_time,
                    end_time,
                });
            }
        }

        fields
    }
}

/// Fills stat fields from the flattened `.doll-table-info` text
fn read_stats(text: &str, fields: &mut ProfileFields) {
    fields.age = STAT_AGE_RE
        .captures(text)
        .and_then(|caps| caps[1].parse().ok());
    fields.height = capture(&STAT_HEIGHT_RE, text).map(|h| normalize_height(&h));
    fields.weight = capture(&STAT_WEIGHT_RE, text).map(|w| normalize_weight(&w));
    fields.bust = capture(&STAT_BUST_RE, text).map(|b| normalize_bust_size(&b));

    if let Some(figure) = capture(&STAT_FIGURE_RE, text) {
        if CUP_ONLY_RE.is_match(&figure) {
            if fields.bust.is_none() {
                fields.bust = Some(normalize_bust_size(&figure));
            }
        } else if !figure.chars().all(|c| c.is_ascii_digit()) {
            let measurements = normalize_measurements(&figure);
            if fields.bust.is_none() {
                fields.bust = LEADING_CUP_RE
                    .captures(&measurements)
                    .map(|caps| normalize_bust_size(&caps[1]))
                    .or_else(|| {
                        LEADING_NUMBER_RE
                            .captures(&measurements)
                            .map(|caps| caps[1].to_string())
                    });
            }
            fields.measurements = Some(measurements);
        }
    }

    fields.nationality = capture(&STAT_NATIONALITY_RE, text)
        .filter(|n| n.len() > 1)
        .map(|n| title_case(&n));
    fields.ethnicity = capture(&STAT_ETHNICITY_RE, text)
        .map(|e| e.trim_end_matches(['.', ',', ';', ':']).trim().to_string())
        .filter(|e| e.len() > 1)
        .map(|e| title_case(&e));
    fields.hair_color = capture(&STAT_HAIR_RE, text)
        .filter(|h| h.len() > 1)
        .map(|h| normalize_color(&h));
    fields.eye_color = capture(&STAT_EYES_RE, text)
        .filter(|e| e.len() > 1)
        .map(|e| normalize_color(&e));
    fields.bust_type = infer_bust_type(text).map(str::to_string);
}

fn service_from(text: &str) -> Option<String> {
    capture(&SERVICE_RE, text)
        .filter(|s| s.len() > 1)
        .map(|s| normalize_service_type(&s))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Text of the stats table and the details column
///
/// Navigation, footers and "other dolls" carousels repeat keywords that
/// describe someone else, so tags come from these blocks only.
fn profile_region_text(document: &Html) -> String {
    let Ok(selector) = Selector::parse(PROFILE_REGION) else {
        return String::new();
    };
    document
        .select(&selector)
        .map(|el| joined_text(el, " "))
        .collect::<Vec<_>>()
        .join(" ")
}

fn select_first<'a>(root: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    root.select(&selector).next()
}

fn first_text(element: ElementRef<'_>, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    element
        .select(&selector)
        .next()
        .map(|el| joined_text(el, " "))
        .filter(|text| !text.is_empty())
}

fn day_rows(root: ElementRef<'_>, css: &str) -> Vec<DayRow> {
    let (Ok(rows), Ok(hours)) = (Selector::parse(css), Selector::parse("span.hours")) else {
        return Vec::new();
    };
    root.select(&rows)
        .map(|row| DayRow {
            date: row.value().attr("data-date").unwrap_or_default().to_string(),
            location: row
                .value()
                .attr("data-location")
                .and_then(first_json_string)
                .unwrap_or_default(),
            hours: row
                .select(&hours)
                .next()
                .map(|el| joined_text(el, " "))
                .unwrap_or_default(),
        })
        .collect()
}

/// First string of a JSON array attribute such as `["Downtown Richmond-Peter"]`
fn first_json_string(raw: &str) -> Option<String> {
    let values: Vec<String> = serde_json::from_str(&unescape_entities(raw)).ok()?;
    values.into_iter().next()
}

/// Profile slug from a card href; the schedule page itself is not a profile
fn profile_slug(href: &str) -> Option<String> {
    let slug = href.trim_end_matches('/').rsplit('/').next()?.trim();
    if slug.is_empty() || slug == "daily-schedule" {
        None
    } else {
        Some(slug.to_string())
    }
}

/// Decodes entities left over when the attribute was escaped twice
fn unescape_entities(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Splits a DD location into (town, detail); `None` for outcall entries
///
/// `"Downtown Richmond-Peter"` gives `("Downtown", "Richmond-Peter")`, a
/// known venue with no town gives its implied town, and a plain town gives
/// `(town, "unknown")`.
pub fn parse_dd_location(raw: &str) -> Option<(String, String)> {
    let text = raw.trim();
    if text.is_empty() {
        return Some(("unknown".to_string(), "unknown".to_string()));
    }
    if text.to_lowercase().contains("outcall") {
        return None;
    }

    for (venue, implied_town) in KNOWN_VENUES {
        if let Some(index) = text.find(venue) {
            let prefix = text[..index].trim().trim_end_matches(',').trim();
            let town = if prefix.is_empty() { implied_town } else { prefix };
            return Some((town.to_string(), venue.to_string()));
        }
    }

    if let Some((head, tail)) = text.rsplit_once(' ') {
        if tail.contains('-') || tail == tail.to_uppercase() {
            return Some((head.trim().to_string(), tail.trim().to_string()));
        }
    }

    Some((text.to_string(), "unknown".to_string()))
}

/// Reads the weekday of `"Mon, Dec 08"`, discarding dates before `today`
///
/// The year is inferred: a month more than six months behind `today` belongs
/// to next year, one more than six months ahead to last year.
pub fn parse_dd_date(raw: &str, today: NaiveDate) -> Option<Weekday> {
    let lower = raw.trim().to_lowercase();
    let day = parse_weekday(&lower)?;

    if let Some(caps) = MONTH_DAY_RE.captures(&lower) {
        let month = month_number(&caps[1]);
        let day_of_month: Option<u32> = caps[2].parse().ok();
        if let (Some(month), Some(day_of_month)) = (month, day_of_month) {
            let current = today.month() as i32;
            let mut year = today.year();
            if (month as i32) < current - 6 {
                year += 1;
            } else if (month as i32) > current + 6 {
                year -= 1;
            }
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day_of_month) {
                if date < today {
                    return None;
                }
            }
        }
    }

    Some(day)
}

/// Reads `"5:30 pm - 12 am"` as `("5:30 PM", "12 AM")`
pub fn parse_dd_time(raw: &str) -> (Option<String>, Option<String>) {
    match HOURS_RE.captures(raw) {
        Some(caps) => (
            Some(caps[1].trim().to_uppercase()),
            Some(caps[2].trim().to_uppercase()),
        ),
        None => (None, None),
    }
}

fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    MONTHS
        .iter()
        .position(|m| *m == abbrev)
        .map(|index| index as u32 + 1)
}

/// Name from the page title, `h1`, or name banner; only two-word names count
fn profile_name(document: &Html) -> Option<String> {
    let mut candidates = Vec::new();

    if let Some(title) = select_first(document, "title").map(|el| joined_text(el, " ")) {
        if let Some((head, _)) = title.split_once(" - ").or_else(|| title.split_once(" | ")) {
            candidates.push(head.trim().to_string());
        }
    }
    if let Some(h1) = select_first(document, "h1").map(|el| joined_text(el, " ")) {
        if !h1.is_empty() && h1.len() < 50 {
            candidates.push(h1);
        }
    }
    if let Some(banner) = select_first(document, "div.doll-name, span.name") {
        candidates.push(joined_text(banner, " "));
    }

    candidates
        .into_iter()
        .find(|name| name.contains(' ') && name.len() < 50)
}

/// Tier label from a badge-like element
fn badge_tier(document: &Html) -> Option<String> {
    let selector =
        Selector::parse("[class*=tier], [class*=badge], [class*=rank], [class*=level]").ok()?;
    document.select(&selector).find_map(|el| {
        let text = joined_text(el, " ").to_lowercase();
        if text.contains("sapphire") {
            Some("Sapphire Doll".to_string())
        } else if text.contains("platinum") {
            Some("Platinum Doll".to_string())
        } else if text.contains("diamond") {
            Some("Diamond Doll".to_string())
        } else if text.contains("doll") {
            Some("Doll".to_string())
        } else {
            None
        }
    })
}

/// Upload-relative image paths from the gallery, query strings dropped
fn upload_images(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse(".rightside img, img.skip-lazy") else {
        return Vec::new();
    };

    let mut images: Vec<String> = Vec::new();
    for img in document.select(&selector) {
        let Some(src) = img.value().attr("src") else {
            continue;
        };
        let Some(index) = src.find(UPLOADS_MARKER) else {
            continue;
        };
        let relative = src[index + UPLOADS_MARKER.len()..]
            .split('?')
            .next()
            .unwrap_or_default();
        if !relative.is_empty() && !images.iter().any(|existing| existing == relative) {
            images.push(relative.to_string());
        }
    }
    images
}
