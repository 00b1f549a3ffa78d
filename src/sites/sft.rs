//! SFT adapter
//!
//! The schedule page is a flat run of headings and links inside
//! `div.content`: an `h5` names the location, an `h6` names the day, and every
//! following relative link is one booking, e.g. `*ULTRA VIP* AVA 12PM-8PM`.
//! Profile pages are free text, so every field goes through the shared
//! extractors.

use super::{joined_text, parse_weekday, ProfileFields, ScheduleItem, SiteAdapter};
use crate::config::SiteConfig;
use crate::extract::{
    extract_age, extract_bust, extract_ethnicity, extract_eye_color, extract_hair_color,
    extract_height, extract_nationality, extract_rates, extract_service_types, extract_tags,
    extract_tier_marker, extract_time_range, extract_weight, infer_bust_type, strip_tier_markers,
    strip_time_text, DEFAULT_TAG_KEYWORDS,
};
use crate::normalize::{
    normalize_bust_size, normalize_color, normalize_height, normalize_measurements,
    normalize_weight, TierTable,
};
use crate::ParseError;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

/// Link text that marks site chrome rather than a booking
const SKIP_LINK_TEXT: [&str; 5] = ["p100.ca", "design", "website", "contact", "about"];

static TRAILING_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[;,\s]+$").expect("valid regex"));
static TRAILING_DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d\-]+$").expect("valid regex"));
static RATES_TIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)INCALL RATES\s+(PLATINUM VIP|ULTRA VIP|VIP|ELITE)\s+\d+\s*mins?")
        .expect("valid regex")
});
static HEADER_TIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\*\s*(PLATINUM VIP|ULTRA VIP|VIP|ELITE)\s*\*").expect("valid regex")
});

/// Adapter for the heading-structured SFT schedule
pub struct SftAdapter {
    base_url: String,
    tiers: TierTable,
}

impl SftAdapter {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            base_url: site.base_url.clone(),
            tiers: TierTable::sft(),
        }
    }
}

impl SiteAdapter for SftAdapter {
    fn key(&self) -> &'static str {
        "sft"
    }

    fn profile_url(&self, profile_ref: &str) -> String {
        if self.base_url.ends_with('/') {
            format!("{}{}", self.base_url, profile_ref)
        } else {
            format!("{}/{}", self.base_url, profile_ref)
        }
    }

    fn tier_table(&self) -> &TierTable {
        &self.tiers
    }

    fn parse_schedule(&self, html: &str) -> Result<Vec<ScheduleItem>, ParseError> {
        let document = Html::parse_document(html);
        let content = content_root(&document).ok_or(ParseError::MissingContainer {
            what: "schedule content",
        })?;

        let walk = Selector::parse("h5, h6, a").map_err(|_| ParseError::MissingContainer {
            what: "schedule content",
        })?;

        let mut saw_heading = false;
        let mut location: Option<String> = None;
        let mut day = None;
        let mut items = Vec::new();

        for element in content.select(&walk) {
            let text = joined_text(element, " ");
            match element.value().name() {
                "h5" => {
                    saw_heading = true;
                    location = Some(text.replace("INCALL", "").trim().to_string());
                }
                "h6" => {
                    saw_heading = true;
                    day = parse_weekday(&text);
                }
                _ => {
                    let (Some(location), Some(day)) = (location.as_ref(), day) else {
                        continue;
                    };
                    if let Some(item) = parse_listing_link(element, &text, location, day) {
                        items.push(item);
                    }
                }
            }
        }

        if !saw_heading {
            return Err(ParseError::MissingContainer {
                what: "schedule headings",
            });
        }

        tracing::debug!(items = items.len(), "Parsed SFT schedule");
        Ok(items)
    }

    fn parse_profile(&self, html: &str) -> ProfileFields {
        let document = Html::parse_document(html);
        let text = content_root(&document)
            .map(|root| joined_text(root, "\n"))
            .unwrap_or_default();

        let mut fields = ProfileFields {
            age: extract_age(&text),
            nationality: extract_nationality(&text),
            ethnicity: extract_ethnicity(&text),
            height: extract_height(&text).map(|h| normalize_height(&h)),
            weight: extract_weight(&text).map(|w| normalize_weight(&w)),
            hair_color: extract_hair_color(&text).map(|c| normalize_color(&c)),
            eye_color: extract_eye_color(&text).map(|c| normalize_color(&c)),
            service_type: extract_service_types(&text),
            tier: profile_tier(&text),
            rates: extract_rates(&text),
            images: gallery_images(&document),
            tags: extract_tags(&text, &DEFAULT_TAG_KEYWORDS),
            ..Default::default()
        };

        let bust = extract_bust(&text);
        fields.bust = bust.size.as_deref().map(normalize_bust_size);
        fields.measurements = bust.measurements.as_deref().map(normalize_measurements);
        fields.bust_type = bust.kind;
        if fields.bust.is_some() && fields.bust_type.is_none() {
            fields.bust_type = infer_bust_type(&text).map(str::to_string);
        }

        fields
    }
}

/// `div.content`, falling back to `body`
fn content_root(document: &Html) -> Option<ElementRef<'_>> {
    ["div.content", "body"].iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        document.select(&selector).next()
    })
}

/// Turns one schedule link into a row, or `None` for chrome links and
/// unusable names
fn parse_listing_link(
    element: ElementRef<'_>,
    text: &str,
    location: &str,
    day: chrono::Weekday,
) -> Option<ScheduleItem> {
    let href = element.value().attr("href")?.trim();
    if href.is_empty() || href.starts_with("http") {
        return None;
    }

    let lower = text.to_lowercase();
    if SKIP_LINK_TEXT.iter().any(|skip| lower.contains(skip)) {
        return None;
    }

    let tier = extract_tier_marker(text).map(str::to_string);
    let (name, start_time, end_time) = split_listing_text(text);
    if name.chars().count() < 2 {
        return None;
    }

    Some(ScheduleItem {
        name,
        profile_ref: href.trim_matches('/').to_string(),
        day: Some(day),
        location: location.to_string(),
        start_time,
        end_time,
        tier,
    })
}

/// Splits `*VIP* AVA 12PM-8PM` into the bare name and its time range
fn split_listing_text(text: &str) -> (String, Option<String>, Option<String>) {
    let without_tier = strip_tier_markers(text);
    let (start_time, end_time) = extract_time_range(&without_tier);

    let without_time = if start_time.is_some() || end_time.is_some() {
        strip_time_text(&without_tier)
    } else {
        without_tier
    };

    let name = TRAILING_PUNCT_RE.replace(without_time.trim(), "");
    let name = TRAILING_DIGITS_RE.replace(name.trim(), "");
    let name = TRAILING_PUNCT_RE.replace(name.trim(), "");
    (name.trim().to_string(), start_time, end_time)
}

fn profile_tier(text: &str) -> Option<String> {
    RATES_TIER_RE
        .captures(text)
        .or_else(|| HEADER_TIER_RE.captures(text))
        .map(|caps| caps[1].to_uppercase())
}

/// Gallery image file names, without directories or query strings
fn gallery_images(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("img.p_gallery_img") else {
        return Vec::new();
    };

    let mut images = Vec::new();
    for img in document.select(&selector) {
        let Some(src) = img.value().attr("src") else {
            continue;
        };
        let path = src.split('?').next().unwrap_or_default();
        let file = path.rsplit('/').next().unwrap_or_default().trim();
        if !file.is_empty() && !images.iter().any(|existing| existing == file) {
            images.push(file.to_string());
        }
    }
    images
}
