//! HTTP transport behaviour against a mock server

use listing_harvest::transport::{FetchError, FetchOptions, Fetcher, HttpFetcher, RetryPolicy};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(min_interval: Duration, max_retries: u32) -> HttpFetcher {
    HttpFetcher::new(
        min_interval,
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
        },
        Duration::from_secs(5),
    )
    .expect("client builds")
}

async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_error_status_with_page_markup_is_accepted() {
    let mock_server = MockServer::start().await;
    let page = format!(
        "<html><body><div class=\"content\">{}</div></body></html>",
        "schedule ".repeat(200)
    );

    Mock::given(method("GET"))
        .and(path("/schedule"))
        .respond_with(ResponseTemplate::new(503).set_body_string(page.clone()))
        .mount(&mock_server)
        .await;

    let mut fetcher = fetcher(Duration::ZERO, 3);
    let url = format!("{}/schedule", mock_server.uri());
    let body = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();

    assert_eq!(body, page);
    assert_eq!(request_count(&mock_server).await, 1);
}

#[tokio::test]
async fn test_short_error_body_is_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("<html>not found</html>"))
        .mount(&mock_server)
        .await;

    let mut fetcher = fetcher(Duration::ZERO, 3);
    let url = format!("{}/missing", mock_server.uri());
    let result = fetcher.fetch(&url, &FetchOptions::default()).await;

    assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
    // 404 is permanent, so no retries
    assert_eq!(request_count(&mock_server).await, 1);
}

#[tokio::test]
async fn test_transient_errors_are_retried_until_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let mut fetcher = fetcher(Duration::ZERO, 3);
    let url = format!("{}/flaky", mock_server.uri());
    let body = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();

    assert_eq!(body, "ok");
    assert_eq!(request_count(&mock_server).await, 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let mut fetcher = fetcher(Duration::ZERO, 2);
    let url = format!("{}/down", mock_server.uri());
    let result = fetcher.fetch(&url, &FetchOptions::default()).await;

    assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
    assert_eq!(request_count(&mock_server).await, 3);
}

#[tokio::test]
async fn test_requests_are_spaced_by_rate_limit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("page"))
        .mount(&mock_server)
        .await;

    let mut fetcher = fetcher(Duration::from_millis(200), 0);
    let start = Instant::now();
    for name in ["a", "b", "c"] {
        let url = format!("{}/{}", mock_server.uri(), name);
        fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();
    }

    assert!(
        start.elapsed() >= Duration::from_millis(400),
        "three requests took only {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn test_cookies_are_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gated"))
        .and(header("cookie", "age_verified=1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .mount(&mock_server)
        .await;

    let mut cookies = BTreeMap::new();
    cookies.insert("age_verified".to_string(), "1".to_string());

    let mut fetcher = fetcher(Duration::ZERO, 0);
    let url = format!("{}/gated", mock_server.uri());
    let body = fetcher
        .fetch(&url, &FetchOptions::default().with_cookies(&cookies))
        .await
        .unwrap();

    assert_eq!(body, "welcome");
}
