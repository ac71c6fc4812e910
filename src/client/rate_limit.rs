//! Client-side request-API rate limiting.
//!
//! Proactive: a sliding one-second window per endpoint delays requests that
//! would exceed `max_rps`. Reactive: 429 replies are retried honoring
//! `Retry-After` when present, otherwise exponential backoff, up to
//! `max_retries` retries.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{bail, Result};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RestRateLimiterConfig {
    pub proactive: bool,
    /// Per-endpoint ceiling; `None` disables the proactive window.
    pub max_rps: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_retries: u32,
}

impl Default for RestRateLimiterConfig {
    fn default() -> Self {
        Self {
            proactive: true,
            max_rps: Some(10),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Default)]
struct EndpointState {
    timestamps: VecDeque<Instant>,
    retry_count: u32,
}

#[derive(Debug)]
pub struct RestRateLimiter {
    config: RestRateLimiterConfig,
    endpoints: Mutex<HashMap<String, EndpointState>>,
}

impl RestRateLimiter {
    pub fn new(config: RestRateLimiterConfig) -> Self {
        Self {
            config,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Proactive gate: sleep until a slot opens in the endpoint's window,
    /// then record the request.
    pub async fn acquire(&self, endpoint: &str) {
        let Some(max_rps) = self.config.max_rps.filter(|_| self.config.proactive) else {
            return;
        };
        loop {
            let wait = {
                let mut endpoints = self.endpoints.lock().unwrap();
                let state = endpoints.entry(endpoint.to_string()).or_default();
                let now = Instant::now();
                let window_start = now.checked_sub(Duration::from_secs(1)).unwrap_or(now);
                while state.timestamps.front().map_or(false, |t| *t < window_start) {
                    state.timestamps.pop_front();
                }
                if state.timestamps.len() < max_rps as usize {
                    state.timestamps.push_back(now);
                    None
                } else {
                    // Wait for the oldest request to leave the window.
                    state
                        .timestamps
                        .front()
                        .map(|oldest| (*oldest + Duration::from_secs(1)).duration_since(now))
                }
            };
            match wait {
                None => return,
                Some(wait) => {
                    debug!(endpoint, ?wait, "proactive rate limit, delaying request");
                    sleep(wait).await;
                }
            }
        }
    }

    /// Delay to apply after a 429: `Retry-After` wins, otherwise exponential
    /// backoff per endpoint.
    pub fn backoff_delay(&self, endpoint: &str, retry_after: Option<u64>) -> Duration {
        if let Some(seconds) = retry_after {
            return Duration::from_secs(seconds);
        }
        let mut endpoints = self.endpoints.lock().unwrap();
        let state = endpoints.entry(endpoint.to_string()).or_default();
        state.retry_count += 1;
        let factor = self
            .config
            .backoff_multiplier
            .powi(state.retry_count.saturating_sub(1) as i32);
        let delay = self.config.initial_backoff.mul_f64(factor);
        delay.min(self.config.max_backoff)
    }

    pub fn record_success(&self, endpoint: &str) {
        if let Some(state) = self.endpoints.lock().unwrap().get_mut(endpoint) {
            state.retry_count = 0;
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Send with proactive gating and reactive 429 retries.
    pub async fn execute(
        &self,
        endpoint: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        for attempt in 0..=self.config.max_retries {
            self.acquire(endpoint).await;
            let response = build().send().await?;

            if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.record_success(endpoint);
                return Ok(response);
            }

            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if attempt == self.config.max_retries {
                bail!("rate limited on {endpoint} after {attempt} retries");
            }
            let delay = self.backoff_delay(endpoint, retry_after);
            warn!(endpoint, ?delay, "429 received, backing off");
            sleep(delay).await;
        }
        unreachable!("retry loop returns or bails");
    }
}

impl Default for RestRateLimiter {
    fn default() -> Self {
        Self::new(RestRateLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_limit_is_immediate() {
        let limiter = RestRateLimiter::new(RestRateLimiterConfig {
            max_rps: Some(5),
            ..Default::default()
        });
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire("/api/v1/ticker").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_delays_past_limit() {
        let limiter = RestRateLimiter::new(RestRateLimiterConfig {
            max_rps: Some(2),
            ..Default::default()
        });
        let start = Instant::now();
        limiter.acquire("/e").await;
        limiter.acquire("/e").await;
        limiter.acquire("/e").await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_have_independent_windows() {
        let limiter = RestRateLimiter::new(RestRateLimiterConfig {
            max_rps: Some(1),
            ..Default::default()
        });
        let start = Instant::now();
        limiter.acquire("/a").await;
        limiter.acquire("/b").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_disabled() {
        let limiter = RestRateLimiter::new(RestRateLimiterConfig {
            proactive: false,
            max_rps: Some(1),
            ..Default::default()
        });
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire("/e").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_retry_after_wins_over_backoff() {
        let limiter = RestRateLimiter::default();
        assert_eq!(
            limiter.backoff_delay("/e", Some(42)),
            Duration::from_secs(42)
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let limiter = RestRateLimiter::new(RestRateLimiterConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            ..Default::default()
        });
        assert_eq!(limiter.backoff_delay("/e", None), Duration::from_secs(1));
        assert_eq!(limiter.backoff_delay("/e", None), Duration::from_secs(2));
        assert_eq!(limiter.backoff_delay("/e", None), Duration::from_secs(4));
        assert_eq!(limiter.backoff_delay("/e", None), Duration::from_secs(5));

        limiter.record_success("/e");
        assert_eq!(limiter.backoff_delay("/e", None), Duration::from_secs(1));
    }
}
