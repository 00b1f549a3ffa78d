//! Fetch transports
//!
//! Two interchangeable page fetchers sit behind the [`Fetcher`] trait:
//! - [`HttpFetcher`]: pooled reqwest client for server-rendered pages
//! - [`StealthFetcher`]: a long-lived headless browser session for sites that
//!   fingerprint automation
//!
//! Both rate-limit every request, retry transient failures with capped
//! exponential backoff, and hide connection/session mechanics from callers.

mod http;
mod rate_limit;
mod stealth;

pub use http::HttpFetcher;
pub use rate_limit::RateLimiter;
pub use stealth::StealthFetcher;

use crate::config::{BrowserConfig, FetcherKind, HarvestConfig, SiteConfig};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Desktop Chrome user agent sent by both transports
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Upper bound for a single backoff sleep
const MAX_DELAY_MS: u64 = 30_000;

/// Errors produced while fetching a page
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Timed out after {secs}s fetching {url}")]
    Timeout { url: String, secs: u64 },

    #[error("Browser session error: {0}")]
    Session(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Page at {url} looks blocked")]
    Blocked { url: String },

    #[error("Unsupported transport: {0}")]
    Unsupported(String),
}

impl FetchError {
    /// Whether retrying the same request could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(e) => !e.is_builder() && !e.is_decode() && !e.is_redirect(),
            FetchError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            FetchError::Timeout { .. }
            | FetchError::Session(_)
            | FetchError::Navigation { .. }
            | FetchError::Blocked { .. } => true,
            FetchError::Unsupported(_) => false,
        }
    }
}

/// Per-request options passed through to the transport
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// CSS selector the browser waits for before reading content
    pub wait_selector: Option<String>,

    /// Cookies sent with the request
    pub cookies: BTreeMap<String, String>,
}

impl FetchOptions {
    pub fn wait_for(selector: &str) -> Self {
        Self {
            wait_selector: Some(selector.to_string()),
            cookies: BTreeMap::new(),
        }
    }

    pub fn with_cookies(mut self, cookies: &BTreeMap<String, String>) -> Self {
        self.cookies.extend(cookies.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Renders the cookies as a `Cookie` header value
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// A page transport
///
/// `open` acquires whatever the transport needs (nothing for HTTP, a browser
/// session for stealth). `close` releases it, is idempotent, and never fails.
#[async_trait]
pub trait Fetcher: Send {
    async fn open(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Fetches the page body as text
    async fn fetch(&mut self, url: &str, options: &FetchOptions) -> Result<String, FetchError>;

    async fn close(&mut self) {}
}

/// Retry bound and backoff base shared by both transports
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.retry_backoff_ms,
        }
    }

    /// Sleep before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at [`MAX_DELAY_MS`], with ±25% jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        let capped = self.base_delay_ms.saturating_mul(1u64 << exp).min(MAX_DELAY_MS);
        let jittered = capped as f64 * (rand::random::<f64>() * 0.5 + 0.75);
        Duration::from_millis(jittered as u64)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or exhausts retries
///
/// With `max_retries = 3` the operation runs at most 4 times. Permanent
/// errors (see [`FetchError::is_transient`]) are returned without sleeping.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    url: &str,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_transient() || attempt >= policy.max_retries {
            return Err(err);
        }

        attempt += 1;
        let delay = policy.delay_for(attempt);
        tracing::warn!(
            url,
            attempt,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient fetch error, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Builds the transport a site is configured to use
pub fn build_fetcher(
    site: &SiteConfig,
    harvest: &HarvestConfig,
    browser: &BrowserConfig,
) -> Result<Box<dyn Fetcher>, FetchError> {
    match site.fetcher {
        FetcherKind::Static => Ok(Box::new(HttpFetcher::for_site(harvest, site)?)),
        FetcherKind::Stealth => Ok(Box::new(StealthFetcher::for_site(harvest, browser, site))),
    }
}

/// Converts a fractional seconds interval from configuration
pub(crate) fn interval_from_secs(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 0,
        }
    }

    fn server_error() -> FetchError {
        FetchError::Status {
            url: "http://test".to_string(),
            status: 503,
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(server_error().is_transient());
        for status in [408, 429, 500, 502] {
            let err = FetchError::Status {
                url: String::new(),
                status,
            };
            assert!(err.is_transient(), "{} should be transient", status);
        }
        for status in [400, 401, 403, 404] {
            let err = FetchError::Status {
                url: String::new(),
                status,
            };
            assert!(!err.is_transient(), "{} should be permanent", status);
        }
        assert!(FetchError::Session("gone".into()).is_transient());
        assert!(!FetchError::Unsupported("x".into()).is_transient());
    }

    #[test]
    fn test_delay_for_is_capped_and_jittered() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1000,
        };
        let first = policy.delay_for(1).as_millis() as u64;
        assert!((750..=1250).contains(&first), "got {}", first);

        let third = policy.delay_for(3).as_millis() as u64;
        assert!((3000..=5000).contains(&third), "got {}", third);

        let huge = policy.delay_for(30).as_millis() as u64;
        assert!(huge <= MAX_DELAY_MS * 5 / 4);
    }

    #[test]
    fn test_cookie_header() {
        let mut cookies = BTreeMap::new();
        cookies.insert("age_verified".to_string(), "1".to_string());
        cookies.insert("lang".to_string(), "en".to_string());
        let options = FetchOptions::default().with_cookies(&cookies);
        assert_eq!(
            options.cookie_header().as_deref(),
            Some("age_verified=1; lang=en")
        );
        assert_eq!(FetchOptions::default().cookie_header(), None);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = Arc::clone(&calls);
        let result = retry_with_backoff(fast_policy(3), "http://test", || {
            let cc = Arc::clone(&cc);
            async move {
                if cc.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok("page")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "page");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = Arc::clone(&calls);
        let result: Result<(), _> = retry_with_backoff(fast_policy(2), "http://test", || {
            let cc = Arc::clone(&cc);
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = Arc::clone(&calls);
        let result: Result<(), _> = retry_with_backoff(fast_policy(3), "http://test", || {
            let cc = Arc::clone(&cc);
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Status {
                    url: "http://test".into(),
                    status: 404,
                })
            }
        })
        .await;
        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
