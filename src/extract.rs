//! Field extractors for free-text profile and schedule markup
//!
//! Each function pulls exactly one field out of already-flattened page text.
//! A miss is `None`, never an error. Adapters decide which region of the page
//! to flatten before calling in here.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Tier markers in priority order; the first one found wins
const TIER_MARKERS: [&str; 4] = ["PLATINUM VIP", "ULTRA VIP", "VIP", "ELITE"];

/// Keywords turned into tags when they appear as whole words
pub const DEFAULT_TAG_KEYWORDS: [&str; 8] = [
    "NEW", "BLONDE", "BRUNETTE", "BUSTY", "PETITE", "ASIAN", "EUROPEAN", "LATINA",
];

const TIME: &str = r"\d{1,2}(?:[:;]\d{2})?\s*(?:AM|PM)";

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)({TIME})\s*-\s*({TIME})")).expect("valid regex")
});
static MISSING_M_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(\d{{1,2}}\s*P)\s*-\s*({TIME})")).expect("valid regex")
});
static LATE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)({TIME})\s*-\s*(LATE)")).expect("valid regex")
});
static SINGLE_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)({TIME})\s*$")).expect("valid regex"));
static ANY_TIME_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i){TIME}\s*-\s*(?:{TIME}|LATE)|\d{{1,2}}\s*P\s*-\s*{TIME}|\d{{1,2}}[:;]\d{{2}}\s*(?:AM|PM)|\d{{1,2}}\s*(?:AM|PM)\s*$"
    ))
    .expect("valid regex")
});
static TRAILING_P_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d)\s*P$").expect("valid regex"));

static AGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Age[:\s]+(\d{2})\b").expect("valid regex"));
static NATIONALITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Nationality(?:\s*\([^)]+\))?(?:/(?:Ethnicity|Race))?:\s*([A-Za-z /&,]+?)\s*(?:Ethnicity|Race|Bust|Height|Weight|Eyes|Hair|Measurement|Age|Enhancement|\n|$)",
    )
    .expect("valid regex")
});
static ETHNICITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:Ethnicity|Race)(?:\s*\([^)]+\))?:\s*([A-Za-z /&,]+?)\s*(?:Nationality|Bust|Height|Weight|Eyes|Hair|Measurement|Age|Enhancement|\n|$)",
    )
    .expect("valid regex")
});
static HEIGHT_FEET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(?i)Height:\\s*(\\d+[\u{2019}\u{2018}'\u{2032}`\u{00b4}\u{2033}\",]+\\d+)")
        .expect("valid regex")
});
static HEIGHT_CM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Height:\s*(\d{2,3}\s*cm)").expect("valid regex"));
static HEIGHT_WORDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Height:\s*(\d+\s*ft\.?\s*\d*\s*(?:in\.?)?)").expect("valid regex")
});
static WEIGHT_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Weight:\s*(\d+\s*(?:lbs?|kg|pounds?))").expect("valid regex")
});
static WEIGHT_BARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Weight:\s*(\d{2,3})(?:[^a-zA-Z0-9]|$)").expect("valid regex")
});
static HAIR_COLOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Hair\s+(?:color|colour)(?:\s+is|[:\s]+)\s*([A-Za-z /]+?)\s*(?:Eye|GF|PSE|MASSAGE|INCALL|OUTCALL|Details|Height|Bust|Weight|\n|$)",
    )
    .expect("valid regex")
});
static HAIR_SHORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Hair:\s*([A-Za-z /]+?)\s*(?:Eye|GF|PSE|MASSAGE|INCALL|OUTCALL|Details|Height|Bust|Weight|\n|$)",
    )
    .expect("valid regex")
});
static EYE_COLOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Eyes?\s*(?:color|colour)?(?:\s+is|[:\s]+)\s*([A-Za-z /]+?)\s*(?:Hair|GF|PSE|MASSAGE|Details|Shoe|Measurement|\n|$)",
    )
    .expect("valid regex")
});
static BUST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Bust:\s*(\d+[A-Z]+(?:\s*[-/]\s*\d+\s*[-/]\s*\d+)?)\s*\(?\s*(Natural|Enhanced?)?\s*\)?",
    )
    .expect("valid regex")
});
static BUST_TRIPLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+[A-Z]+)-(\d+)-(\d+)$").expect("valid regex"));
static BUST_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\d+[A-Z]+$").expect("valid regex"));
static MEASUREMENTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Measurements?(?:\s*\([^)]+\))?[:\s]+(\d+\s*[A-Z]*\s*[\x{2013}\x{2014}/-]\s*\d+\s*[\x{2013}\x{2014}/-]\s*\d+)",
    )
    .expect("valid regex")
});
static LEADING_CUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+\s*[A-Z]+)").expect("valid regex"));
static DASH_SPACING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*-\s*").expect("valid regex"));
static SLASH_SPACING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*/\s*").expect("valid regex"));
static RATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(30|45|60)\s*min(?:ute)?s?\b[^$\d]{0,12}\$\s*(\d{2,4})")
        .expect("valid regex")
});
static HOUR_RATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b1\s*h(?:ou)?rs?\b[^$\d]{0,12}\$\s*(\d{2,4})").expect("valid regex")
});
static OUTCALL_RATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)OUTCALL[^$]{0,40}?\$\s*(\d{2,4})").expect("valid regex")
});

static SERVICE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bGFE\b", "GFE"),
        (r"(?i)\bGF\s+ENTERTAINER\b", "GFE"),
        (r"(?i)\bPSE\b", "PSE"),
        (r"(?i)\bFETISH\s+FRIENDLY\b", "FETISH FRIENDLY"),
        (r"(?i)\bDOMINATRIX\b", "DOMINATRIX"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("valid regex"), label))
    .collect()
});

/// Bust size, bust type and full measurements found together in one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BustInfo {
    pub size: Option<String>,
    pub kind: Option<String>,
    pub measurements: Option<String>,
}

/// Per-listing prices for sources that publish them on the profile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingRates {
    pub incall_30min: Option<String>,
    pub incall_45min: Option<String>,
    pub incall_1hr: Option<String>,
    pub outcall_1hr: Option<String>,
}

impl ListingRates {
    pub fn is_empty(&self) -> bool {
        self.incall_30min.is_none()
            && self.incall_45min.is_none()
            && self.incall_1hr.is_none()
            && self.outcall_1hr.is_none()
    }
}

/// Returns the highest-priority tier marker contained in the text
pub fn extract_tier_marker(text: &str) -> Option<&'static str> {
    let upper = text.to_uppercase();
    TIER_MARKERS
        .iter()
        .copied()
        .find(|marker| upper.contains(marker))
}

/// Removes `*TIER*` markers from schedule link text
pub fn strip_tier_markers(text: &str) -> String {
    let mut clean = text.to_string();
    for marker in TIER_MARKERS {
        clean = clean.replace(&format!("*{}*", marker), "");
    }
    clean.trim().to_string()
}

/// Extracts a start/end time pair from schedule text
///
/// Handles `12PM-12AM`, `11:30AM-3:30PM`, the missing-M typo `7P-11PM`,
/// open-ended `11AM-LATE`, and a lone trailing time (returned as both ends).
pub fn extract_time_range(text: &str) -> (Option<String>, Option<String>) {
    for re in [&*RANGE_RE, &*MISSING_M_RANGE_RE, &*LATE_RANGE_RE] {
        if let Some(caps) = re.captures(text) {
            return (
                Some(tidy_time(&caps[1])),
                Some(tidy_time(&caps[2])),
            );
        }
    }

    if let Some(caps) = SINGLE_TIME_RE.captures(text) {
        let time = tidy_time(&caps[1]);
        return (Some(time.clone()), Some(time));
    }

    (None, None)
}

/// Removes every time expression from schedule text
pub fn strip_time_text(text: &str) -> String {
    ANY_TIME_TEXT_RE.replace_all(text, "").trim().to_string()
}

fn tidy_time(raw: &str) -> String {
    let fixed = TRAILING_P_RE.replace(raw.trim(), "${1}PM");
    fixed.replace(';', ":").to_uppercase()
}

pub fn extract_age(text: &str) -> Option<u32> {
    AGE_RE
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

pub fn extract_nationality(text: &str) -> Option<String> {
    capture_trimmed(&NATIONALITY_RE, text)
}

pub fn extract_ethnicity(text: &str) -> Option<String> {
    capture_trimmed(&ETHNICITY_RE, text)
}

/// Extracts a raw height in feet/inches, centimeters, or word form
pub fn extract_height(text: &str) -> Option<String> {
    [&*HEIGHT_FEET_RE, &*HEIGHT_CM_RE, &*HEIGHT_WORDS_RE]
        .into_iter()
        .find_map(|re| capture_trimmed(re, text))
}

/// Extracts a raw weight; a bare two or three digit number is taken as pounds
pub fn extract_weight(text: &str) -> Option<String> {
    if let Some(weight) = capture_trimmed(&WEIGHT_UNIT_RE, text) {
        return Some(weight);
    }
    WEIGHT_BARE_RE
        .captures(text)
        .map(|caps| format!("{} lbs", &caps[1]))
}

pub fn extract_hair_color(text: &str) -> Option<String> {
    capture_trimmed(&HAIR_COLOR_RE, text)
        .or_else(|| capture_trimmed(&HAIR_SHORT_RE, text))
        .map(|color| SLASH_SPACING_RE.replace_all(&color, "/").into_owned())
}

pub fn extract_eye_color(text: &str) -> Option<String> {
    capture_trimmed(&EYE_COLOR_RE, text)
        .map(|color| SLASH_SPACING_RE.replace_all(&color, "/").into_owned())
}

/// Extracts bust size, bust type and measurements
///
/// `Bust: 32D-23-35 (Enhanced)` yields all three. When the bust field lacks
/// measurements, a separate `Measurements:` field is consulted and also
/// supplies the bust size if none was found.
pub fn extract_bust(text: &str) -> BustInfo {
    let mut info = BustInfo::default();

    if let Some(caps) = BUST_RE.captures(text) {
        let value = caps[1].trim().trim_end_matches(['-', '/']);
        let unified = DASH_SPACING_RE.replace_all(&value.replace('/', "-"), "-").into_owned();

        if let Some(triple) = BUST_TRIPLE_RE.captures(&unified) {
            info.size = Some(triple[1].to_uppercase());
            info.measurements = Some(unified.clone());
        } else if BUST_ONLY_RE.is_match(value) {
            info.size = Some(value.to_uppercase());
        }

        if let Some(kind) = caps.get(2) {
            info.kind = Some(if kind.as_str().to_lowercase().starts_with("enhance") {
                "Enhanced".to_string()
            } else {
                "Natural".to_string()
            });
        }
    }

    if info.measurements.is_none() {
        if let Some(measurements) = capture_trimmed(&MEASUREMENTS_RE, text) {
            if info.size.is_none() {
                info.size = LEADING_CUP_RE
                    .captures(&measurements)
                    .map(|caps| caps[1].replace(' ', "").to_uppercase());
            }
            info.measurements = Some(measurements);
        }
    }

    info
}

/// Phrases that deny enhancement outright
const ENHANCEMENT_NEGATIONS: [&str; 3] = ["enhanced: no", "enhancements: none", "not enhanced"];

/// Infers a bust type from loose wording in a stats region
///
/// Precedence, first hit wins:
///
/// 1. a negation ("Enhanced: No", "Enhancements: none", "not enhanced") means Natural
/// 2. the word "enhanced" means Enhanced, even beside "natural"
/// 3. the word "natural" means Natural
pub fn infer_bust_type(region_text: &str) -> Option<&'static str> {
    let lower = region_text.to_lowercase();
    if ENHANCEMENT_NEGATIONS.iter().any(|n| lower.contains(n)) {
        return Some("Natural");
    }
    let words = word_set(&lower);
    if words.contains("enhanced") {
        Some("Enhanced")
    } else if words.contains("natural") {
        Some("Natural")
    } else {
        None
    }
}

/// Collects every recognized service label, joined with ", "
pub fn extract_service_types(text: &str) -> Option<String> {
    let mut found: Vec<&str> = Vec::new();
    for (re, label) in SERVICE_PATTERNS.iter() {
        if re.is_match(text) && !found.contains(label) {
            found.push(label);
        }
    }
    if found.is_empty() {
        None
    } else {
        Some(found.join(", "))
    }
}

/// Returns the keywords that occur as whole words in the text, in keyword order
pub fn extract_tags(text: &str, keywords: &[&str]) -> Vec<String> {
    let lowered = text.to_lowercase();
    let words = word_set(&lowered);
    keywords
        .iter()
        .filter(|kw| words.contains(kw.to_lowercase().as_str()))
        .map(|kw| kw.to_string())
        .collect()
}

/// Extracts per-listing prices such as `30min $160` or `1hr $260`
pub fn extract_rates(text: &str) -> ListingRates {
    let mut rates = ListingRates::default();

    for caps in RATE_RE.captures_iter(text) {
        let price = Some(format!("${}", &caps[2]));
        match &caps[1] {
            "30" if rates.incall_30min.is_none() => rates.incall_30min = price,
            "45" if rates.incall_45min.is_none() => rates.incall_45min = price,
            "60" if rates.incall_1hr.is_none() => rates.incall_1hr = price,
            _ => {}
        }
    }

    if rates.incall_1hr.is_none() {
        rates.incall_1hr = HOUR_RATE_RE
            .captures(text)
            .map(|caps| format!("${}", &caps[1]));
    }

    rates.outcall_1hr = OUTCALL_RATE_RE
        .captures(text)
        .map(|caps| format!("${}", &caps[1]));

    rates
}

fn capture_trimmed(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|caps| caps[1].trim().trim_end_matches(',').trim().to_string())
        .filter(|value| !value.is_empty())
}

fn word_set(lower: &str) -> HashSet<&str> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}
