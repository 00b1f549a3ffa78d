//! Mirage adapter
//!
//! The schedule page is only a roster of profile links under `/escort/`.
//! Availability lives on each profile as a table with one row per location
//! and one column per weekday, Monday first; a filled `fa-circle` icon marks
//! a working day. Stats come as `<dt>`/`<dd>` pairs and the tier rides in the
//! page title, e.g. `Kimmy ♛ PLATINUM VIP - Mirage Entertainment`.

use super::{joined_text, ProfileFields, ScheduleItem, ScrapedSchedule, SiteAdapter};
use crate::config::SiteConfig;
use crate::extract::ListingRates;
use crate::normalize::{
    normalize_bust_size, normalize_color, normalize_height, normalize_measurements,
    normalize_weight, title_case, TierTable,
};
use crate::ParseError;
use chrono::Weekday;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;

const PROFILE_PATH: &str = "/escort/";
const UPLOADS_MARKER: &str = "wp-content/uploads/";
const MAX_IMAGES: usize = 10;

/// Schedule table columns, in page order
const DAY_COLUMNS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Row headers and the `(town, detail)` they stand for
const LOCATION_ROWS: [(&str, &str, &str); 5] = [
    ("DT TORONTO", "Downtown", "DT Toronto"),
    ("DOWNTOWN", "Downtown", "DT Toronto"),
    ("NORTH YORK", "North York", "North York"),
    ("MARKHAM", "Markham", "Markham"),
    ("ETOBICOKE", "Etobicoke", "Airport"),
];

/// Row headers that never carry availability
const SKIP_ROWS: [&str; 3] = ["", "M", "AIRPORT"];

static TIER_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*♛\s*(?:PLATINUM\s+)?VIP\s*").expect("valid regex"));
static NEW_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*-?\s*NEW\s*$").expect("valid regex"));
static FORTY_FIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\$(\d+)\s*45\s*min").expect("valid regex"));
static HALF_HOUR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)HH\s*\$(\d+)|\$(\d+)\s*HH").expect("valid regex"));
static HOUR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\$(\d+)\s*H(?:R|our)?(?:\W|$)").expect("valid regex"));
static DOLLARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("valid regex"));
static FIRST_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
static BUST_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\((natural|enhanced)\)").expect("valid regex"));
static LEADING_CUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+[A-Z]+)").expect("valid regex"));
static THUMBNAIL_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d+x\d+\.").expect("valid regex"));

/// Adapter for the Mirage roster and its table-scheduled profiles
pub struct MirageAdapter {
    base_url: String,
    tiers: TierTable,
}

impl MirageAdapter {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            base_url: site.base_url.clone(),
            tiers: TierTable::mirage(),
        }
    }
}

impl SiteAdapter for MirageAdapter {
    fn key(&self) -> &'static str {
        "mirage"
    }

    fn profile_url(&self, profile_ref: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/{}/", base, profile_ref.trim_matches('/'))
    }

    fn tier_table(&self) -> &TierTable {
        &self.tiers
    }

    fn parse_schedule(&self, html: &str) -> Result<Vec<ScheduleItem>, ParseError> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("a[href]").map_err(|_| ParseError::MissingContainer {
            what: "profile links",
        })?;

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for link in document.select(&selector) {
            let Some(slug) = link.value().attr("href").and_then(profile_slug) else {
                continue;
            };
            if !seen.insert(slug.clone()) {
                continue;
            }

            let text = joined_text(link, " ");
            let raw = if text.chars().count() < 2 {
                slug.replace('-', " ")
            } else {
                text
            };
            let name = clean_name(&raw);
            if name.chars().count() < 2 {
                continue;
            }

            items.push(ScheduleItem {
                name,
                profile_ref: slug,
                day: None,
                location: String::new(),
                start_time: None,
                end_time: None,
                tier: None,
            });
        }

        if items.is_empty() {
            return Err(ParseError::MissingContainer {
                what: "profile links",
            });
        }

        tracing::debug!(profiles = items.len(), "Parsed Mirage roster");
        Ok(items)
    }

    fn parse_profile(&self, html: &str) -> ProfileFields {
        let document = Html::parse_document(html);
        let title = select_first(&document, "title")
            .map(|el| joined_text(el, " "))
            .unwrap_or_default();

        let mut fields = ProfileFields {
            name: Some(clean_name(title_name(&title))).filter(|n| !n.is_empty()),
            tier: Some(title_tier(&title).to_string()),
            images: profile_images(&document),
            schedules: availability(&document),
            ..Default::default()
        };

        for (label, value) in stat_pairs(&document) {
            read_stat(&label, &value, &mut fields);
        }

        fields
    }
}

/// Slug of an `/escort/<slug>/` link
fn profile_slug(href: &str) -> Option<String> {
    let index = href.find(PROFILE_PATH)?;
    let slug = href[index + PROFILE_PATH.len()..]
        .split(['/', '?', '#'])
        .next()?
        .trim();
    (!slug.is_empty()).then(|| slug.to_string())
}

/// Tier named in the page title; untagged profiles are Regular
fn title_tier(title: &str) -> &'static str {
    let name_part = title_name(title).to_uppercase();
    if name_part.contains("PLATINUM VIP") {
        "Platinum VIP"
    } else if name_part.contains("VIP") {
        "VIP"
    } else {
        "Regular"
    }
}

/// Part of the title before the ` - Mirage Entertainment` suffix
fn title_name(title: &str) -> &str {
    title.split(" - ").next().unwrap_or(title).trim()
}

/// Strips the crown tier marker and a trailing NEW from a name
fn clean_name(raw: &str) -> String {
    let name = TIER_MARKER_RE.replace_all(raw, " ");
    let name = NEW_SUFFIX_RE.replace(name.trim(), "");
    title_case(name.trim())
}

/// `(label, value)` for every `<dt>` with a following `<dd>`; labels are
/// lowercased without a trailing colon
fn stat_pairs(document: &Html) -> Vec<(String, String)> {
    let Ok(selector) = Selector::parse("dt") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|dt| {
            let dd = dt
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "dd")?;
            let label = joined_text(dt, " ")
                .to_lowercase()
                .trim_end_matches(':')
                .trim()
                .to_string();
            Some((label, joined_text(dd, " ")))
        })
        .collect()
}

fn read_stat(label: &str, value: &str, fields: &mut ProfileFields) {
    if value.is_empty() {
        return;
    }

    if label.contains("age") {
        fields.age = FIRST_NUMBER_RE
            .find(value)
            .and_then(|m| m.as_str().parse().ok());
    } else if label.contains("height") {
        fields.height = Some(normalize_height(value));
    } else if label.contains("weight") {
        fields.weight = Some(normalize_weight(value));
    } else if label.contains("measurement") {
        read_measurements(value, fields);
    } else if label.contains("hair") {
        fields.hair_color = Some(normalize_color(value));
    } else if label.contains("eye") {
        fields.eye_color = Some(normalize_color(value));
    } else if label.contains("nationality") {
        fields.nationality = Some(title_case(value));
    } else if label.contains("in call") || label.contains("incall") {
        let (rates, minimum) = parse_incall(value);
        fields.rates.incall_30min = rates.incall_30min;
        fields.rates.incall_45min = rates.incall_45min;
        fields.rates.incall_1hr = rates.incall_1hr;
        fields.rate_notes = minimum.map(|m| format!("{} minimum", m));
    } else if label.contains("out call") || label.contains("outcall") {
        fields.rates.outcall_1hr = DOLLARS_RE
            .captures(value)
            .map(|caps| format!("${}", &caps[1]));
    }
}

/// `34C-24-36 (Natural)`: bust type in parentheses, cup from the first figure
fn read_measurements(value: &str, fields: &mut ProfileFields) {
    if let Some(caps) = BUST_TYPE_RE.captures(value) {
        fields.bust_type = Some(title_case(&caps[1]));
    }
    let figure = BUST_TYPE_RE.replace_all(value, "");
    let figure = figure.trim();
    fields.measurements = Some(normalize_measurements(figure));
    fields.bust = LEADING_CUP_RE
        .captures(figure)
        .map(|caps| normalize_bust_size(&caps[1]));
}

/// Reads an incall price line such as `HH $250 & $350HR` or
/// `$300 45Min/$350HR`
///
/// # Returns
///
/// The rates found and the shortest booking they imply (`"30min"` or
/// `"45min"`)
pub fn parse_incall(text: &str) -> (ListingRates, Option<&'static str>) {
    let text = text.trim();
    let mut rates = ListingRates::default();
    if text.is_empty() || text.eq_ignore_ascii_case("N/A") {
        return (rates, None);
    }

    let mut minimum = None;
    if let Some(caps) = FORTY_FIVE_RE.captures(text) {
        rates.incall_45min = Some(format!("${}", &caps[1]));
        minimum = Some("45min");
    }
    if let Some(caps) = HALF_HOUR_RE.captures(text) {
        if let Some(price) = caps.get(1).or_else(|| caps.get(2)) {
            rates.incall_30min = Some(format!("${}", price.as_str()));
            minimum.get_or_insert("30min");
        }
    }
    rates.incall_1hr = HOUR_RE
        .captures(text)
        .map(|caps| format!("${}", &caps[1]));

    (rates, minimum)
}

/// Days marked available in the location-by-weekday table
fn availability(document: &Html) -> Vec<ScrapedSchedule> {
    let (Ok(rows), Ok(header), Ok(cells), Ok(icon)) = (
        Selector::parse("table tr"),
        Selector::parse("th"),
        Selector::parse("td"),
        Selector::parse("i"),
    ) else {
        return Vec::new();
    };

    let mut schedules = Vec::new();
    for row in document.select(&rows) {
        let Some(th) = row.select(&header).next() else {
            continue;
        };
        let label = joined_text(th, " ").to_uppercase();
        if SKIP_ROWS.contains(&label.as_str()) {
            continue;
        }
        let location = row_location(&label);

        for (cell, day) in row.select(&cells).zip(DAY_COLUMNS) {
            let filled = cell
                .select(&icon)
                .any(|i| i.value().classes().any(|class| class == "fa-circle"));
            if filled {
                schedules.push(ScrapedSchedule {
                    day,
                    location: location.clone(),
                    start_time: None,
                    end_time: None,
                });
            }
        }
    }
    schedules
}

fn row_location(label: &str) -> String {
    match LOCATION_ROWS.iter().find(|(header, _, _)| *header == label) {
        Some((_, town, detail)) => format!("{}, {}", town, detail),
        None => title_case(label),
    }
}

/// Upload paths from JSON-LD, then the slider, then any upload image
fn profile_images(document: &Html) -> Vec<String> {
    let mut images = Vec::new();
    let mut push = |src: &str| {
        let Some(index) = src.find(UPLOADS_MARKER) else {
            return;
        };
        let path = src[index + UPLOADS_MARKER.len()..]
            .split('?')
            .next()
            .unwrap_or_default();
        let path = THUMBNAIL_SUFFIX_RE.replace(path, ".").into_owned();
        if !path.is_empty() && !images.contains(&path) {
            images.push(path);
        }
    };

    for src in json_ld_images(document) {
        push(&src);
    }
    for css in ["div#slider img", "div.flexslider img", "img"] {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for img in document.select(&selector) {
            let value = img.value();
            if let Some(src) = value.attr("src").or_else(|| value.attr("data-src")) {
                push(src);
            }
        }
    }

    images.truncate(MAX_IMAGES);
    images
}

fn json_ld_images(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for script in document.select(&selector) {
        let raw: String = script.text().collect();
        let Ok(data) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        let nodes: Vec<&serde_json::Value> = match &data {
            serde_json::Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for node in nodes {
            match node.get("image") {
                Some(serde_json::Value::String(url)) => found.push(url.clone()),
                Some(image) => {
                    if let Some(url) = image.get("url").and_then(|u| u.as_str()) {
                        found.push(url.to_string());
                    }
                }
                None => {}
            }
        }
    }
    found
}

fn select_first<'a>(root: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    root.select(&selector).next()
}
