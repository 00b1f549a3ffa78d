use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Listing-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub locations: LocationsConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    /// Looks up a site by its registry key
    pub fn site(&self, key: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.key == key)
    }

    /// Returns all sites with `enabled = true`, in file order
    pub fn enabled_sites(&self) -> impl Iterator<Item = &SiteConfig> {
        self.sites.iter().filter(|s| s.enabled)
    }
}

/// Run behavior shared by every site
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Successful profile upserts between batch flushes
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries per fetch after the first attempt
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Overall HTTP request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Cap on per-profile error details kept in a run result
    #[serde(rename = "max-error-details", default = "default_max_error_details")]
    pub max_error_details: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_error_details: default_max_error_details(),
        }
    }
}

/// Stealth browser session settings
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Explicit Chrome/Chromium binary; searched on PATH when absent
    #[serde(rename = "chrome-path", default)]
    pub chrome_path: Option<String>,

    /// Fixed wait after navigation (milliseconds)
    #[serde(rename = "settle-ms", default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(rename = "navigation-timeout-secs", default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// Requests served before the whole session is rebuilt
    #[serde(rename = "max-requests-per-session", default = "default_max_requests_per_session")]
    pub max_requests_per_session: u32,

    #[serde(rename = "viewport-width", default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(rename = "viewport-height", default = "default_viewport_height")]
    pub viewport_height: u32,

    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Extra Chrome command-line flags
    #[serde(rename = "chrome-args", default)]
    pub chrome_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            settle_ms: default_settle_ms(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            max_requests_per_session: default_max_requests_per_session(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            locale: default_locale(),
            timezone: default_timezone(),
            user_agent: default_user_agent(),
            chrome_args: Vec::new(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Town vocabulary used by the location resolver
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationsConfig {
    #[serde(rename = "known-towns", default)]
    pub known_towns: Vec<String>,
}

/// Which transport a site is fetched with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    Static,
    Stealth,
}

/// One harvested source
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Registry key selecting the adapter (e.g. "sft")
    pub key: String,

    pub name: String,

    /// Stored as the Source identity
    #[serde(rename = "short-name")]
    pub short_name: String,

    #[serde(rename = "schedule-url")]
    pub schedule_url: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "image-base-url", default)]
    pub image_base_url: Option<String>,

    pub fetcher: FetcherKind,

    #[serde(rename = "rate-limit-seconds", default = "default_rate_limit_seconds")]
    pub rate_limit_seconds: f64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Create Location rows for unseen venues under known towns
    #[serde(rename = "auto-create-locations", default)]
    pub auto_create_locations: bool,

    /// Prices live on each listing rather than on the tier
    #[serde(rename = "variable-pricing", default)]
    pub variable_pricing: bool,

    /// Cookies sent with every request to this site
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    #[serde(rename = "tier", default)]
    pub tiers: Vec<TierSpec>,

    #[serde(rename = "location", default)]
    pub locations: Vec<LocationSeed>,
}

/// A pricing tier seeded for a site
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TierSpec {
    pub name: String,

    #[serde(default)]
    pub stars: Option<u8>,

    #[serde(rename = "incall-30min", default)]
    pub incall_30min: Option<String>,

    #[serde(rename = "incall-45min", default)]
    pub incall_45min: Option<String>,

    #[serde(rename = "incall-1hr", default)]
    pub incall_1hr: Option<String>,

    #[serde(rename = "outcall-1hr", default)]
    pub outcall_1hr: Option<String>,
}

/// A location row seeded for a site
#[derive(Debug, Clone, Deserialize)]
pub struct LocationSeed {
    pub town: String,

    #[serde(default = "default_unknown")]
    pub detail: String,

    #[serde(default)]
    pub default: bool,
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_error_details() -> usize {
    10
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_navigation_timeout_secs() -> u64 {
    20
}

fn default_max_requests_per_session() -> u32 {
    50
}

fn default_viewport_width() -> u32 {
    1920
}

fn default_viewport_height() -> u32 {
    1080
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_timezone() -> String {
    "America/Toronto".to_string()
}

fn default_user_agent() -> String {
    crate::transport::DESKTOP_USER_AGENT.to_string()
}

fn default_rate_limit_seconds() -> f64 {
    1.0
}

fn default_unknown() -> String {
    "unknown".to_string()
}
