//! Canonical forms for scraped field values
//!
//! Every function here is pure and total: input that matches no known pattern
//! comes back trimmed but otherwise unchanged, so an unfamiliar format
//! degrades to raw text instead of failing the run.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

const LBS_TO_KG: f64 = 0.453592;

static KG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*kg").expect("valid regex"));
static LEADING_INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("valid regex"));
static CM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{2,3})\s*cm").expect("valid regex"));
static FT_IN_WORDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\d+\s*(ft|feet|foot)\b").expect("valid regex"));
static FEET_INCHES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(\\d+)[\u{2019}\u{2018}'\u{2032}`\u{00b4}\u{2033}\",]+\\s*(\\d+)").expect("valid regex")
});
static MEASUREMENT_SEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*-\s*").expect("valid regex"));
static SPACED_CUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)\s+([a-z]+)").expect("valid regex"));
static TRIPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{2,3})([a-z]*)-(\d{2,3})-(\d{2,3})$").expect("valid regex")
});
static COMPACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{2})([a-z]+)[-\s]?(\d{2})(\d{2})$").expect("valid regex")
});
static BUST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*([A-Z]+)$").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static SLASH_SPACING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*/\s*").expect("valid regex"));

/// Upper-cases the first letter of every alphabetic run and lower-cases the rest
///
/// `"LETICIA EVA"` becomes `"Leticia Eva"`, `"o'neil"` becomes `"O'Neil"`.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
                in_word = true;
            }
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

/// Normalizes a display name to title case
pub fn normalize_name(raw: &str) -> String {
    title_case(raw.trim())
}

/// Per-source mapping from raw tier text to its canonical label
#[derive(Debug, Clone, Default)]
pub struct TierTable {
    entries: HashMap<String, &'static str>,
}

impl TierTable {
    /// Builds a table from `(raw, canonical)` pairs; raw keys match case-insensitively
    pub fn new(pairs: &[(&str, &'static str)]) -> Self {
        let entries = pairs
            .iter()
            .map(|(raw, canonical)| (raw.to_uppercase(), *canonical))
            .collect();
        Self { entries }
    }

    /// Tiers used by the SFT schedule and profile pages
    pub fn sft() -> Self {
        Self::new(&[
            ("ELITE", "Elite"),
            ("VIP", "VIP"),
            ("ULTRA VIP", "Ultra VIP"),
            ("PLATINUM VIP", "Platinum VIP"),
        ])
    }

    /// Tiers used by the DD schedule cards
    pub fn dd() -> Self {
        Self::new(&[
            ("DOLL", "Doll"),
            ("DIAMOND DOLL", "Diamond Doll"),
            ("PLATINUM DOLL", "Platinum Doll"),
            ("PLATINUM DOLLS", "Platinum Doll"),
            ("SAPPHIRE DOLL", "Sapphire Doll"),
            ("SAPPHIRE DOLLS", "Sapphire Doll"),
        ])
    }

    /// Tiers named in Mirage profile titles
    pub fn mirage() -> Self {
        Self::new(&[
            ("REGULAR", "Regular"),
            ("VIP", "VIP"),
            ("PLATINUM VIP", "Platinum VIP"),
        ])
    }

    fn lookup(&self, key: &str) -> Option<&'static str> {
        self.entries.get(key).copied()
    }
}

/// Maps a raw tier to the source's canonical label, falling back to title case
pub fn normalize_tier(raw: &str, table: &TierTable) -> String {
    let collapsed = WHITESPACE_RE.replace_all(raw.trim(), " ").to_uppercase();
    match table.lookup(&collapsed) {
        Some(canonical) => canonical.to_string(),
        None => title_case(&collapsed),
    }
}

/// Converts a weight to whole kilograms
///
/// A value without a unit is taken to be pounds: `"130 lbs"` and `"130"`
/// both become `"59 kg"`, while `"55kg"` becomes `"55 kg"`.
pub fn normalize_weight(raw: &str) -> String {
    let text = raw.trim();

    if text.to_lowercase().contains("kg") {
        return match KG_RE.captures(text) {
            Some(caps) => format!("{} kg", &caps[1]),
            None => text.to_string(),
        };
    }

    match LEADING_INT_RE
        .captures(text)
        .and_then(|caps| caps[1].parse::<u32>().ok())
    {
        Some(lbs) => {
            let kg = (f64::from(lbs) * LBS_TO_KG).round() as u32;
            format!("{} kg", kg)
        }
        None => text.to_string(),
    }
}

/// Normalizes a height to `F'I` or `N cm`
///
/// Any run of quotes, primes, backticks, acute accents or commas between the
/// feet and inches digits is accepted. Word forms such as `5 ft 9 in` pass
/// through unchanged.
pub fn normalize_height(raw: &str) -> String {
    let text = raw.trim();

    if let Some(caps) = CM_RE.captures(text) {
        return format!("{} cm", &caps[1]);
    }

    if FT_IN_WORDS_RE.is_match(text) {
        return text.to_string();
    }

    match FEET_INCHES_RE.captures(text) {
        Some(caps) => format!("{}'{}", &caps[1], &caps[2]),
        None => text.to_string(),
    }
}

/// Normalizes bust-waist-hip measurements to `NN[CUP]-NN-NN`
///
/// Slashes and en/em dashes count as separators and surrounding whitespace
/// is dropped. The compact `34C2636` form is expanded to `34C-26-36`.
pub fn normalize_measurements(raw: &str) -> String {
    let trimmed = raw.trim();
    let unified: String = trimmed
        .chars()
        .map(|c| match c {
            '/' | '\u{2013}' | '\u{2014}' => '-',
            other => other,
        })
        .collect();
    let collapsed = MEASUREMENT_SEP_RE.replace_all(&unified, "-");
    let joined = SPACED_CUP_RE.replace(&collapsed, "$1$2");

    if let Some(caps) = TRIPLE_RE.captures(&joined) {
        return format!(
            "{}{}-{}-{}",
            &caps[1],
            caps[2].to_uppercase(),
            &caps[3],
            &caps[4]
        );
    }

    if let Some(caps) = COMPACT_RE.captures(&joined) {
        return format!(
            "{}{}-{}-{}",
            &caps[1],
            caps[2].to_uppercase(),
            &caps[3],
            &caps[4]
        );
    }

    trimmed.to_string()
}

/// Ensures a single space between band size and cup: `34dd` becomes `34 DD`
pub fn normalize_bust_size(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    match BUST_RE.captures(&upper) {
        Some(caps) => format!("{} {}", &caps[1], &caps[2]),
        None => upper,
    }
}

/// Upper-cases a service label and folds "GF ENTERTAINER" into "GFE"
pub fn normalize_service_type(raw: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(raw.trim(), " ").to_uppercase();
    if collapsed == "GF ENTERTAINER" {
        "GFE".to_string()
    } else {
        collapsed
    }
}

/// Tidies a hair or eye color: `"blue/ green"` becomes `"Blue/Green"`
pub fn normalize_color(raw: &str) -> String {
    title_case(&SLASH_SPACING_RE.replace_all(raw.trim(), "/"))
}

/// Returns the next date strictly after `today` that falls on `day`
pub fn next_date_for(day: Weekday, today: NaiveDate) -> NaiveDate {
    let current = i64::from(today.weekday().num_days_from_monday());
    let target = i64::from(day.num_days_from_monday());
    let mut ahead = target - current;
    if ahead <= 0 {
        ahead += 7;
    }
    today + Duration::days(ahead)
}
