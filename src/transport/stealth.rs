//! Stealth headless-browser fetcher
//!
//! Keeps one browser session alive for a whole run and reuses a single page.
//! The session moves through explicit states:
//!
//! | From | Transition | To |
//! |------|------------|----|
//! | Uninitialized / Invalid | `init` | Ready |
//! | Ready | failed `validate` | Invalid |
//! | Ready | request budget spent (`recycle`) | Ready (fresh) |
//! | any | `close` | Uninitialized |
//!
//! A fetch that fails while the session still answers a trivial evaluation
//! is request-level and is retried with backoff. A fetch whose session no
//! longer answers is session-level: the session is rebuilt before the retry.
//! Both kinds draw from the same retry budget.

use super::{interval_from_secs, FetchError, FetchOptions, Fetcher, RateLimiter, RetryPolicy};
use crate::config::{BrowserConfig, HarvestConfig, SiteConfig};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Random extra delay added to the configured interval
const RATE_JITTER: Duration = Duration::from_millis(500);

#[cfg(feature = "browser")]
pub use enabled::StealthFetcher;

#[cfg(not(feature = "browser"))]
pub use disabled::StealthFetcher;

/// Phrases that mark a block page when they are its title or most of its body
const BLOCK_PHRASES: [&str; 2] = ["access denied", "403 forbidden"];

/// Real pages are longer than this; block pages rarely are
const SHORT_PAGE_LEN: usize = 2000;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));

/// True for a block page rather than real content
///
/// Only the `<title>` is checked on full-size pages, so a profile that merely
/// mentions "access denied" in its text is not rejected.
fn looks_blocked(content: &str) -> bool {
    let has_phrase = |text: &str| {
        let lower = text.to_lowercase();
        BLOCK_PHRASES.iter().any(|phrase| lower.contains(phrase))
    };

    if let Some(title) = TITLE_RE.captures(content).and_then(|c| c.get(1)) {
        let title = title.as_str().trim();
        if title.starts_with("403") || has_phrase(title) {
            return true;
        }
    }

    content.len() < SHORT_PAGE_LEN && has_phrase(content)
}

/// Browser session lifecycle, generic over the live session handle
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
#[derive(Debug)]
enum SessionState<S> {
    Uninitialized,
    Ready { session: S, requests: u32 },
    Invalid,
}

/// What has to happen before the next navigation
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    Launch,
    Recycle,
    Fetch,
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
impl<S> SessionState<S> {
    fn ready(session: S) -> Self {
        Self::Ready {
            session,
            requests: 0,
        }
    }

    fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    fn session(&self) -> Option<&S> {
        match self {
            Self::Ready { session, .. } => Some(session),
            _ => None,
        }
    }

    fn next_step(&self, max_requests: u32) -> NextStep {
        match self {
            Self::Ready { requests, .. } if *requests >= max_requests => NextStep::Recycle,
            Self::Ready { .. } => NextStep::Fetch,
            Self::Uninitialized | Self::Invalid => NextStep::Launch,
        }
    }

    /// Counts one request against the session budget
    fn begin_request(&mut self) -> Option<&mut S> {
        match self {
            Self::Ready { session, requests } => {
                *requests += 1;
                Some(session)
            }
            _ => None,
        }
    }

    /// Replaces the state, handing back a live session for shutdown
    fn take(&mut self, next: Self) -> Option<S> {
        match std::mem::replace(self, next) {
            Self::Ready { session, .. } => Some(session),
            _ => None,
        }
    }
}

/// Settings resolved once from configuration
#[derive(Debug, Clone)]
struct StealthSettings {
    browser: BrowserConfig,
    retry: RetryPolicy,
}

impl StealthSettings {
    fn settle(&self) -> Duration {
        Duration::from_millis(self.browser.settle_ms)
    }

    fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.browser.navigation_timeout_secs)
    }
}

fn limiter_for(site: &SiteConfig) -> RateLimiter {
    RateLimiter::with_jitter(interval_from_secs(site.rate_limit_seconds), RATE_JITTER)
}

#[cfg(feature = "browser")]
mod enabled {
    use super::*;
    use chromiumoxide::cdp::browser_protocol::emulation::{
        SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
    };
    use chromiumoxide::cdp::browser_protocol::network::{
        CookieParam, Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
    };
    use chromiumoxide::cdp::browser_protocol::page::{
        AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
    };
    use chromiumoxide::{Browser, BrowserConfig as LaunchConfig, Page};
    use futures::StreamExt;
    use tokio::task::JoinHandle;

    const SELECTOR_TIMEOUT: Duration = Duration::from_secs(10);
    const VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Injected before any page script runs
    const STEALTH_INIT_SCRIPT: &str = r#"
        Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });
        window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };
        const originalQuery = window.navigator.permissions.query;
        window.navigator.permissions.query = (parameters) => (
            parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters)
        );
        Object.defineProperty(navigator, 'plugins', {
            get: () => [
                { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
                { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' },
                { name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }
            ],
            configurable: true
        });
        Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'], configurable: true });
        delete window.cdc_adoQpoasnfa76pfcZLmcfl_Array;
        delete window.cdc_adoQpoasnfa76pfcZLmcfl_Promise;
        delete window.cdc_adoQpoasnfa76pfcZLmcfl_Symbol;
        const getParameter = WebGLRenderingContext.prototype.getParameter;
        WebGLRenderingContext.prototype.getParameter = function(parameter) {
            if (parameter === 37445) { return 'Intel Inc.'; }
            if (parameter === 37446) { return 'Intel Iris OpenGL Engine'; }
            return getParameter.call(this, parameter);
        };
    "#;

    const SCROLL_THIRD_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight / 3)";
    const SCROLL_BOTTOM_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight)";

    pub(super) struct Session {
        browser: Browser,
        page: Page,
        handler: JoinHandle<()>,
    }

    /// Browser-backed transport for sites that fingerprint automation
    pub struct StealthFetcher {
        settings: StealthSettings,
        limiter: RateLimiter,
        pub(super) state: SessionState<Session>,
    }

    impl StealthFetcher {
        pub fn for_site(harvest: &HarvestConfig, browser: &BrowserConfig, site: &SiteConfig) -> Self {
            Self {
                settings: StealthSettings {
                    browser: browser.clone(),
                    retry: RetryPolicy::from_config(harvest),
                },
                limiter: limiter_for(site),
                state: SessionState::Uninitialized,
            }
        }

        /// Launches the browser and prepares the single reusable page
        async fn init(&mut self) -> Result<(), FetchError> {
            let config = &self.settings.browser;
            tracing::info!(headless = config.headless, "Launching browser session");

            let mut builder = LaunchConfig::builder();
            if let Some(path) = &config.chrome_path {
                builder = builder.chrome_executable(path);
            }
            if !config.headless {
                builder = builder.with_head();
            }
            builder = builder
                .arg("--disable-blink-features=AutomationControlled")
                .arg("--disable-infobars")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--no-sandbox")
                .arg("--disable-gpu")
                .arg(format!(
                    "--window-size={},{}",
                    config.viewport_width, config.viewport_height
                ));
            for arg in &config.chrome_args {
                builder = builder.arg(arg);
            }

            let launch = builder
                .build()
                .map_err(|e| FetchError::Session(format!("invalid browser config: {}", e)))?;

            let (browser, mut handler) = Browser::launch(launch)
                .await
                .map_err(|e| FetchError::Session(format!("failed to launch browser: {}", e)))?;

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            let page = match browser.new_page("about:blank").await {
                Ok(page) => page,
                Err(e) => {
                    handler.abort();
                    return Err(FetchError::Session(format!("failed to open page: {}", e)));
                }
            };

            let mut session = Session {
                browser,
                page,
                handler,
            };

            if let Err(err) = self.prepare_page(&session.page).await {
                shutdown(&mut session).await;
                return Err(err);
            }

            self.state = SessionState::ready(session);
            Ok(())
        }

        /// Applies viewport, locale, timezone, user agent, headers and the
        /// stealth init script
        async fn prepare_page(&self, page: &Page) -> Result<(), FetchError> {
            let config = &self.settings.browser;
            let cdp = |e: chromiumoxide::error::CdpError| FetchError::Session(e.to_string());

            page.execute(SetDeviceMetricsOverrideParams::new(
                i64::from(config.viewport_width),
                i64::from(config.viewport_height),
                1.0,
                false,
            ))
            .await
            .map_err(cdp)?;

            page.execute(SetTimezoneOverrideParams::new(config.timezone.clone()))
                .await
                .map_err(cdp)?;

            if let Err(e) = page
                .execute(SetLocaleOverrideParams {
                    locale: Some(config.locale.clone()),
                })
                .await
            {
                tracing::debug!(error = %e, "Locale override not applied");
            }

            let user_agent = SetUserAgentOverrideParams::builder()
                .user_agent(config.user_agent.clone())
                .accept_language(format!("{},en;q=0.9", config.locale))
                .build()
                .map_err(FetchError::Session)?;
            page.execute(user_agent).await.map_err(cdp)?;

            let headers = Headers::new(serde_json::json!({
                "Accept-Language": format!("{},en;q=0.9", config.locale),
            }));
            page.execute(SetExtraHttpHeadersParams::new(headers))
                .await
                .map_err(cdp)?;

            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
                STEALTH_INIT_SCRIPT.to_string(),
            ))
            .await
            .map_err(cdp)?;

            Ok(())
        }

        /// Checks that the session still answers a trivial evaluation
        async fn validate(&self) -> bool {
            let Some(session) = self.state.session() else {
                return false;
            };
            matches!(
                tokio::time::timeout(VALIDATE_TIMEOUT, session.page.evaluate("1 + 1".to_string())).await,
                Ok(Ok(_))
            )
        }

        /// Launches a session if none is live, or rebuilds one whose
        /// request budget is spent
        async fn ensure_ready(&mut self) -> Result<(), FetchError> {
            let max_requests = self.settings.browser.max_requests_per_session;
            match self.state.next_step(max_requests) {
                NextStep::Fetch => Ok(()),
                NextStep::Launch => self.init().await,
                NextStep::Recycle => {
                    tracing::info!(max_requests, "Recycling browser session");
                    self.teardown(SessionState::Uninitialized).await;
                    self.init().await
                }
            }
        }

        async fn teardown(&mut self, next: SessionState<Session>) {
            if let Some(mut session) = self.state.take(next) {
                shutdown(&mut session).await;
            }
        }

        async fn fetch_once(&mut self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
            self.limiter.wait().await;

            let Some(session) = self.state.begin_request() else {
                return Err(FetchError::Session("browser session not ready".to_string()));
            };
            let page = &session.page;

            for (name, value) in &options.cookies {
                let cookie = CookieParam::builder()
                    .name(name.clone())
                    .value(value.clone())
                    .url(url.to_string())
                    .build()
                    .map_err(FetchError::Session)?;
                if let Err(e) = page.set_cookie(cookie).await {
                    tracing::debug!(cookie = %name, error = %e, "Cookie not applied");
                }
            }

            let navigation = NavigateParams::builder()
                .url(url)
                .build()
                .map_err(|reason| FetchError::Navigation {
                    url: url.to_string(),
                    reason,
                })?;
            let timeout = self.settings.navigation_timeout();
            tokio::time::timeout(timeout, page.execute(navigation))
                .await
                .map_err(|_| FetchError::Timeout {
                    url: url.to_string(),
                    secs: timeout.as_secs(),
                })?
                .map_err(|e| FetchError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

            if let Some(selector) = &options.wait_selector {
                match tokio::time::timeout(SELECTOR_TIMEOUT, page.find_element(selector.as_str()))
                    .await
                {
                    Ok(Ok(_)) => tracing::debug!(selector = %selector, "Selector found"),
                    Ok(Err(e)) => tracing::warn!(selector = %selector, error = %e, "Selector not found"),
                    Err(_) => tracing::warn!(selector = %selector, "Timeout waiting for selector"),
                }
            }

            tokio::time::sleep(self.settings.settle()).await;
            scroll(page).await;

            let content = page.content().await.map_err(|e| FetchError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

            if looks_blocked(&content) {
                tracing::warn!(url, "Page content carries block indicators");
                return Err(FetchError::Blocked {
                    url: url.to_string(),
                });
            }

            Ok(content)
        }
    }

    async fn scroll(page: &Page) {
        for (script, pause) in [(SCROLL_THIRD_SCRIPT, 500), (SCROLL_BOTTOM_SCRIPT, 300)] {
            if let Err(e) = page.evaluate(script.to_string()).await {
                tracing::debug!(error = %e, "Scroll skipped");
            }
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }
    }

    async fn shutdown(session: &mut Session) {
        if let Err(e) = session.browser.close().await {
            tracing::debug!(error = %e, "Browser close reported an error");
        }
        session.handler.abort();
    }

    #[async_trait]
    impl Fetcher for StealthFetcher {
        async fn open(&mut self) -> Result<(), FetchError> {
            if self.state.is_ready() {
                return Ok(());
            }
            self.init().await
        }

        async fn fetch(&mut self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
            let retry = self.settings.retry;
            let mut attempt = 0u32;

            loop {
                let result = match self.ensure_ready().await {
                    Ok(()) => self.fetch_once(url, options).await,
                    Err(err) => Err(err),
                };

                let err = match result {
                    Ok(content) => return Ok(content),
                    Err(err) => err,
                };

                let session_lost = !self.validate().await;
                if session_lost {
                    tracing::warn!(url, error = %err, "Browser session lost, rebuilding");
                    self.teardown(SessionState::Invalid).await;
                }

                if !err.is_transient() || attempt >= retry.max_retries {
                    return Err(err);
                }
                attempt += 1;

                let delay = retry.delay_for(attempt);
                tracing::warn!(
                    url,
                    attempt,
                    max_retries = retry.max_retries,
                    session_lost,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Browser fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        async fn close(&mut self) {
            self.teardown(SessionState::Uninitialized).await;
        }
    }
}

#[cfg(not(feature = "browser"))]
mod disabled {
    use super::*;

    /// Placeholder used when the crate is built without the `browser` feature
    pub struct StealthFetcher {
        #[allow(dead_code)]
        settings: StealthSettings,
        #[allow(dead_code)]
        limiter: RateLimiter,
    }

    impl StealthFetcher {
        pub fn for_site(harvest: &HarvestConfig, browser: &BrowserConfig, site: &SiteConfig) -> Self {
            Self {
                settings: StealthSettings {
                    browser: browser.clone(),
                    retry: RetryPolicy::from_config(harvest),
                },
                limiter: limiter_for(site),
            }
        }
    }

    fn unsupported() -> FetchError {
        FetchError::Unsupported(
            "stealth fetcher requires the `browser` feature".to_string(),
        )
    }

    #[async_trait]
    impl Fetcher for StealthFetcher {
        async fn open(&mut self) -> Result<(), FetchError> {
            Err(unsupported())
        }

        async fn fetch(&mut self, _url: &str, _options: &FetchOptions) -> Result<String, FetchError> {
            Err(unsupported())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_indicators() {
        assert!(looks_blocked("<html><title>403 Forbidden</title></html>"));
        assert!(looks_blocked("<html><head><title>Access Denied</title></head></html>"));
        assert!(looks_blocked("<h1>Access Denied</h1>"));
        assert!(!looks_blocked("<html><body>Schedule</body></html>"));
    }

    #[test]
    fn test_block_phrase_in_long_page_body_is_content() {
        let filler = "<p>Available all week downtown.</p>".repeat(80);
        let page = format!(
            "<html><head><title>Ava | Profile</title></head><body>{}\
             <p>Access denied to anyone rude.</p></body></html>",
            filler
        );
        assert!(page.len() > SHORT_PAGE_LEN);
        assert!(!looks_blocked(&page));
    }

    #[test]
    fn test_session_lifecycle_transitions() {
        let mut state: SessionState<&str> = SessionState::Uninitialized;
        assert_eq!(state.next_step(2), NextStep::Launch);
        assert!(state.begin_request().is_none());

        state = SessionState::ready("first");
        assert!(state.is_ready());
        assert_eq!(state.next_step(2), NextStep::Fetch);
        assert_eq!(state.begin_request().copied(), Some("first"));
        assert_eq!(state.next_step(2), NextStep::Fetch);
        state.begin_request();
        assert_eq!(state.next_step(2), NextStep::Recycle);

        // A session that stops answering is handed back for shutdown
        assert_eq!(state.take(SessionState::Invalid), Some("first"));
        assert!(matches!(state, SessionState::Invalid));
        assert!(state.session().is_none());
        assert_eq!(state.next_step(2), NextStep::Launch);

        assert_eq!(state.take(SessionState::Uninitialized), None);
        state = SessionState::ready("second");
        assert_eq!(state.next_step(2), NextStep::Fetch);
        assert_eq!(state.take(SessionState::Uninitialized), Some("second"));
    }

    fn site() -> SiteConfig {
        let toml = r#"
[output]
database-path = "./unused.db"

[[site]]
key = "dd"
name = "Dolls"
short-name = "DD"
schedule-url = "https://dolls.example.com/daily-schedule/"
base-url = "https://dolls.example.com/"
fetcher = "stealth"
rate-limit-seconds = 0.0
"#;
        crate::config::parse_config(toml).unwrap().sites.remove(0)
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn test_without_browser_feature_is_unsupported() {
        let mut fetcher =
            StealthFetcher::for_site(&HarvestConfig::default(), &BrowserConfig::default(), &site());
        assert!(matches!(fetcher.open().await, Err(FetchError::Unsupported(_))));
        let result = fetcher
            .fetch("https://dolls.example.com/", &FetchOptions::default())
            .await;
        assert!(matches!(result, Err(FetchError::Unsupported(_))));
    }

    #[cfg(feature = "browser")]
    #[tokio::test]
    async fn test_launch_failure_leaves_session_invalid() {
        let harvest = HarvestConfig {
            max_retries: 0,
            ..HarvestConfig::default()
        };
        let browser = BrowserConfig {
            chrome_path: Some("/nonexistent/listing-harvest/chrome".to_string()),
            ..BrowserConfig::default()
        };
        let mut fetcher = StealthFetcher::for_site(&harvest, &browser, &site());

        let result = fetcher
            .fetch("https://dolls.example.com/", &FetchOptions::default())
            .await;

        assert!(matches!(result, Err(FetchError::Session(_))));
        assert!(matches!(fetcher.state, SessionState::Invalid));
        fetcher.close().await;
        assert!(matches!(fetcher.state, SessionState::Uninitialized));
    }

    #[test]
    fn test_settings_durations() {
        let settings = StealthSettings {
            browser: BrowserConfig::default(),
            retry: RetryPolicy {
                max_retries: 3,
                base_delay_ms: 1000,
            },
        };
        assert_eq!(settings.settle(), Duration::from_millis(2000));
        assert_eq!(settings.navigation_timeout(), Duration::from_secs(20));
    }
}
