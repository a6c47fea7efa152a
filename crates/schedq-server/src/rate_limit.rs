//! Fixed-window request limiting per client key, kept in process memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

struct Window {
    count: u32,
    started: Instant,
}

/// Per-key counter over a one-minute window. A `None` limit disables the
/// limiter entirely.
#[derive(Clone)]
pub struct RateLimiter {
    limit_per_minute: Option<u32>,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: Option<u32>) -> Self {
        Self {
            limit_per_minute,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts one request for `key`; `Err(429)` once the window is full.
    pub async fn check(&self, key: &str) -> Result<(), StatusCode> {
        let Some(limit) = self.limit_per_minute else {
            return Ok(());
        };

        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        // Expired windows of other keys accumulate otherwise.
        windows.retain(|_, w| now.duration_since(w.started) < WINDOW);

        let window = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        window.count = window.count.saturating_add(1);

        if window.count > limit {
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
        Ok(())
    }
}

/// Client key for limiting: X-Real-IP, else the first X-Forwarded-For hop,
/// else a shared bucket.
pub fn client_key(headers: &HeaderMap) -> String {
    if let Some(ip) = headers.get("X-Real-IP").and_then(|v| v.to_str().ok()) {
        return ip.trim().to_string();
    }

    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|first| first.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(None);
        for _ in 0..1000 {
            assert!(limiter.check("a").await.is_ok());
        }
    }

    #[tokio::test]
    async fn limits_per_key_within_a_window() {
        let limiter = RateLimiter::new(Some(2));

        assert!(limiter.check("a").await.is_ok());
        assert!(limiter.check("a").await.is_ok());
        assert_eq!(
            limiter.check("a").await,
            Err(StatusCode::TOO_MANY_REQUESTS)
        );

        // Other keys have their own window.
        assert!(limiter.check("b").await.is_ok());
    }

    #[test]
    fn client_key_prefers_real_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "10.0.0.1, 10.0.0.2".parse().unwrap());
        assert_eq!(client_key(&headers), "10.0.0.1");

        headers.insert("X-Real-IP", "192.168.1.9".parse().unwrap());
        assert_eq!(client_key(&headers), "192.168.1.9");

        assert_eq!(client_key(&HeaderMap::new()), "unknown");
    }
}
