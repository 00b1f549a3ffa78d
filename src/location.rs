//! Free-text location resolution
//!
//! Schedule pages name locations loosely ("downtown richmond-peter",
//! "Etobicoke, Hwy 427 & Bloor (near Sherway)"). [`LocationResolver`] turns
//! such text into a Location id for one source, trying in order:
//!
//! 1. exact `(town, detail)` match
//! 2. exact match on the normalized detail
//! 3. `(town, "unknown")`
//! 4. any location in the town
//! 5. any location whose town contains the parsed town
//! 6. a newly created location, when the source auto-creates under known towns
//! 7. the source's default location
//!
//! When step 6 applies to a concrete detail it runs before steps 3-5, so a new
//! venue gets its own row instead of collapsing into a sibling in the same town.

use crate::normalize::title_case;
use crate::storage::{StorageResult, Store};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Detail used when a location names only a town
pub const UNKNOWN_DETAIL: &str = "unknown";

static PARENTHETICAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)").expect("valid regex"));
static NEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^near\s+").expect("valid regex"));
static HIGHWAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bhwy\.?\s*(\d+)").expect("valid regex"));
static AMPERSAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*&\s*").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Misspellings seen on schedule pages and their corrections
static MISSPELLINGS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [("spadena", "Spadina"), ("eglington", "Eglinton")]
        .into_iter()
        .map(|(wrong, right)| {
            (
                Regex::new(&format!(r"(?i)\b{}\b", wrong)).expect("valid regex"),
                right,
            )
        })
        .collect()
});

/// Resolves location text to Location ids for one source during one run
pub struct LocationResolver {
    source_id: i64,
    /// Known towns, longest first
    known_towns: Vec<String>,
    auto_create: bool,
    by_pair: HashMap<(String, String), i64>,
    by_town: HashMap<String, i64>,
}

impl LocationResolver {
    /// Creates a resolver for one source
    ///
    /// # Arguments
    ///
    /// * `source_id` - Source whose locations are searched
    /// * `known_towns` - Town vocabulary used to split town from detail
    /// * `auto_create` - Create rows for unmatched venues under known towns
    pub fn new(source_id: i64, known_towns: &[String], auto_create: bool) -> Self {
        let mut known_towns: Vec<String> = known_towns
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        known_towns.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        Self {
            source_id,
            known_towns,
            auto_create,
            by_pair: HashMap::new(),
            by_town: HashMap::new(),
        }
    }

    /// Splits raw text into `(town, detail)` using the known-towns set
    ///
    /// A known town must prefix the text and end at a word boundary. Without
    /// one, the whole text is the town and the detail is `"unknown"`.
    pub fn parse_location(&self, raw: &str) -> (String, String) {
        let text = raw.trim();
        if text.is_empty() {
            return (UNKNOWN_DETAIL.to_string(), UNKNOWN_DETAIL.to_string());
        }

        for town in &self.known_towns {
            let Some(rest) = strip_prefix_ignore_case(text, town) else {
                continue;
            };
            if rest.chars().next().is_some_and(char::is_alphanumeric) {
                continue;
            }
            let detail = rest.trim_start_matches(|c: char| c == ',' || c == '-' || c.is_whitespace());
            let detail = if detail.trim().is_empty() {
                UNKNOWN_DETAIL
            } else {
                detail.trim()
            };
            return (town.clone(), detail.to_string());
        }

        (text.to_string(), UNKNOWN_DETAIL.to_string())
    }

    /// Resolves raw location text to a Location id
    ///
    /// Never fails to find a location; storage errors are the only errors.
    pub fn resolve(&mut self, store: &mut dyn Store, raw: &str) -> StorageResult<i64> {
        let (town, detail) = self.parse_location(raw);
        let normalized = normalize_detail(&detail);
        let pair_key = (town.to_lowercase(), normalized.to_lowercase());

        if let Some(id) = self.by_pair.get(&pair_key) {
            return Ok(*id);
        }

        let id = self.lookup(store, &town, &detail, &normalized)?;
        self.by_pair.insert(pair_key, id);
        Ok(id)
    }

    /// Forgets every cached resolution
    ///
    /// Needed after a rollback, which may have removed auto-created rows.
    pub fn clear_cache(&mut self) {
        self.by_pair.clear();
        self.by_town.clear();
    }

    fn lookup(
        &mut self,
        store: &mut dyn Store,
        town: &str,
        detail: &str,
        normalized: &str,
    ) -> StorageResult<i64> {
        if let Some(location) = store.find_location(self.source_id, town, detail)? {
            return Ok(location.id);
        }

        if normalized != detail {
            if let Some(location) = store.find_location(self.source_id, town, normalized)? {
                return Ok(location.id);
            }
        }

        let can_create = self.auto_create && self.is_known_town(town);
        let concrete = !normalized.eq_ignore_ascii_case(UNKNOWN_DETAIL);

        if can_create && concrete {
            let created = store.create_location(self.source_id, town, normalized, false)?;
            tracing::info!(town, detail = normalized, "Auto-created location");
            return Ok(created.id);
        }

        if let Some(id) = self.lookup_town(store, town)? {
            return Ok(id);
        }

        if can_create {
            let created = store.create_location(self.source_id, town, UNKNOWN_DETAIL, false)?;
            tracing::info!(town, "Auto-created town location");
            self.by_town.insert(town.to_lowercase(), created.id);
            return Ok(created.id);
        }

        let default = store.get_default_location(self.source_id)?;
        tracing::debug!(town, detail, "Location not matched, using default");
        Ok(default.id)
    }

    /// Steps that depend on the town alone; cached by town
    fn lookup_town(&mut self, store: &mut dyn Store, town: &str) -> StorageResult<Option<i64>> {
        let town_key = town.to_lowercase();
        if let Some(id) = self.by_town.get(&town_key) {
            return Ok(Some(*id));
        }

        let found = match store.find_location(self.source_id, town, UNKNOWN_DETAIL)? {
            Some(location) => Some(location.id),
            None => match store
                .find_locations_by_town(self.source_id, town, false)?
                .first()
            {
                Some(location) => Some(location.id),
                None => store
                    .find_locations_by_town(self.source_id, town, true)?
                    .first()
                    .map(|location| location.id),
            },
        };

        if let Some(id) = found {
            self.by_town.insert(town_key, id);
        }
        Ok(found)
    }

    fn is_known_town(&self, town: &str) -> bool {
        self.known_towns.iter().any(|t| t.eq_ignore_ascii_case(town))
    }
}

/// Canonical spelling of a location detail
///
/// `"near Hwy 427 &Bloor (west side)"` becomes `"HWY427 & Bloor"`. All-caps
/// tokens keep their casing; other words are title-cased.
pub fn normalize_detail(detail: &str) -> String {
    let stripped = PARENTHETICAL_RE.replace_all(detail.trim(), "");
    let stripped = NEAR_RE.replace(stripped.trim(), "");
    let mut text = HIGHWAY_RE.replace_all(&stripped, "HWY$1").into_owned();
    for (re, right) in MISSPELLINGS.iter() {
        text = re.replace_all(&text, *right).into_owned();
    }
    let text = AMPERSAND_RE.replace_all(&text, " & ");
    let text = WHITESPACE_RE.replace_all(text.trim(), " ");

    if text.is_empty() || text.eq_ignore_ascii_case(UNKNOWN_DETAIL) {
        return UNKNOWN_DETAIL.to_string();
    }

    text.split(' ')
        .map(|word| {
            word.split('-')
                .map(|part| {
                    if is_acronym(part) {
                        part.to_string()
                    } else {
                        title_case(part)
                    }
                })
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_acronym(token: &str) -> bool {
    token.chars().any(char::is_alphabetic) && !token.chars().any(char::is_lowercase)
}

/// `text` after a case-insensitive `prefix`, compared char by char
///
/// Lowercasing can change a char's byte length ('İ' becomes "i̇"), so the
/// remainder is sliced from `text` itself rather than from a lowered copy.
fn strip_prefix_ignore_case<'t>(text: &'t str, prefix: &str) -> Option<&'t str> {
    let mut chars = text.chars();
    for expected in prefix.chars() {
        let actual = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    Some(chars.as_str())
}
