//! Minimum-interval request gate

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum spacing between consecutive requests
///
/// State is private to one fetcher instance; two fetchers never share it.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    max_jitter: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_jitter(min_interval, Duration::ZERO)
    }

    /// Adds a random extra delay of up to `max_jitter` on top of the interval
    pub fn with_jitter(min_interval: Duration, max_jitter: Duration) -> Self {
        Self {
            min_interval,
            max_jitter,
            last: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Sleeps until the interval since the previous request has elapsed,
    /// then records the current request
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;

        if let Some(previous) = *last {
            let mut required = self.min_interval;
            if !self.max_jitter.is_zero() {
                required += self.max_jitter.mul_f64(rand::random::<f64>());
            }
            let elapsed = previous.elapsed();
            if elapsed < required {
                let pause = required - elapsed;
                tracing::trace!(pause_ms = pause.as_millis() as u64, "Rate limit pause");
                tokio::time::sleep(pause).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_is_not_delayed() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_consecutive_requests_respect_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(150));
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_zero_interval_never_sleeps() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
