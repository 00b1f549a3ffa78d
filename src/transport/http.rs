//! Plain HTTP fetcher
//!
//! Wraps one pooled reqwest [`Client`] per instance with:
//! - browser-like default headers
//! - a minimum-interval rate limit gate on every attempt
//! - retry with exponential backoff for transient failures
//! - the "error status but real page" rule for sites that serve their
//!   markup with a 4xx/5xx code

use super::{
    interval_from_secs, retry_with_backoff, FetchError, FetchOptions, Fetcher, RateLimiter,
    RetryPolicy, DESKTOP_USER_AGENT,
};
use crate::config::{HarvestConfig, SiteConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE};
use reqwest::Client;
use std::time::Duration;

/// Bodies at least this long that look like HTML are accepted on error status
const MIN_MARKUP_BODY_LEN: usize = 1000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP transport for server-rendered pages
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
    timeout: Duration,
}

impl HttpFetcher {
    /// Creates a fetcher with its own connection pool
    ///
    /// # Arguments
    ///
    /// * `min_interval` - Minimum spacing between consecutive requests
    /// * `retry` - Retry bound and backoff base
    /// * `timeout` - Overall per-request timeout
    pub fn new(
        min_interval: Duration,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .user_agent(DESKTOP_USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(min_interval),
            retry,
            timeout,
        })
    }

    /// Creates a fetcher using a site's rate limit and the shared run settings
    pub fn for_site(harvest: &HarvestConfig, site: &SiteConfig) -> Result<Self, FetchError> {
        Self::new(
            interval_from_secs(site.rate_limit_seconds),
            RetryPolicy::from_config(harvest),
            Duration::from_secs(harvest.request_timeout_secs),
        )
    }

    async fn fetch_once(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        self.limiter.wait().await;

        let mut request = self.client.get(url);
        if let Some(cookie) = options.cookie_header() {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await.map_err(|e| self.classify(url, e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(url, e))?;

        if status.is_success() {
            tracing::debug!(url, bytes = body.len(), "Fetched page");
            return Ok(body);
        }

        if body.len() > MIN_MARKUP_BODY_LEN && body.contains("<html") {
            tracing::warn!(
                url,
                status = status.as_u16(),
                "Non-success status with page markup, using body anyway"
            );
            return Ok(body);
        }

        Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::Http(err)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&mut self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let this = &*self;
        retry_with_backoff(this.retry, url, move || this.fetch_once(url, options)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_site_uses_site_interval() {
        let toml = r#"
[output]
database-path = "./t.db"

[[site]]
key = "sft"
name = "Test"
short-name = "T"
schedule-url = "https://example.com/schedule"
base-url = "https://example.com/"
fetcher = "static"
rate-limit-seconds = 2.5
"#;
        let config = crate::config::parse_config(toml).unwrap();
        let fetcher = HttpFetcher::for_site(&config.harvest, &config.sites[0]).unwrap();
        assert_eq!(fetcher.limiter.min_interval(), Duration::from_millis(2500));
        assert_eq!(fetcher.retry.max_retries, 3);
        assert_eq!(fetcher.timeout, Duration::from_secs(30));
    }
}
