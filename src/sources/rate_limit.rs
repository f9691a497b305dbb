use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Per-host token bucket. One bucket per host; tokens refill continuously
/// at the registered rate and callers sleep until a token is available.
/// Cheap to clone — all clones share the same buckets.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    default_rate: f64,
}

struct Bucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    refilled: Instant,
}

impl Bucket {
    fn new(rate: f64) -> Self {
        let capacity = rate.max(1.0);
        Self {
            rate,
            capacity,
            tokens: capacity,
            refilled: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.refilled).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.refilled = now;
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            default_rate: 10.0,
        }
    }

    /// Sets the request rate for a host. The first registration wins so a
    /// conservative client cannot be overridden by a later, looser one.
    pub async fn register(&self, host: &str, requests_per_second: f64) {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(host.to_string())
            .or_insert_with(|| Bucket::new(requests_per_second.max(0.1)));
    }

    pub async fn wait_for_url(&self, url: &str) {
        if let Some(host) = host_of(url) {
            self.wait_for_host(&host).await;
        }
    }

    pub async fn wait_for_host(&self, host: &str) {
        loop {
            let sleep_for = {
                let mut buckets = self.buckets.lock().await;
                let default_rate = self.default_rate;
                let bucket = buckets
                    .entry(host.to_string())
                    .or_insert_with(|| Bucket::new(default_rate));
                let now = Instant::now();
                bucket.refill(now);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate)
            };
            tokio::time::sleep(sleep_for).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}
