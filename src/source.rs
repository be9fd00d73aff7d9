//! Metric source
//!
//! A [`MetricSource`] returns the current percentage or fails. Retries live in
//! [`RetryPolicy`] so every source gets the same bounded, exponential backoff.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument, trace, warn};

const USER_AGENT: &str = concat!("dominance-watch/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// One attempt at reading the metric. Values are percentages in `[0, 100]`.
    async fn fetch(&self) -> Result<f64>;
}

/// Bounded attempts; the delay before retry `n` is `backoff * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    let delay = self.delay_after(attempt);
                    debug!("attempt {attempt}/{attempts} failed: {e:#}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("giving up after {attempts} attempts")));
                }
            }
        }
    }
}

/// Fetch through `source`, retrying per `policy`.
pub async fn fetch_with_retries(source: &dyn MetricSource, policy: &RetryPolicy) -> Result<f64> {
    policy.run(|| source.fetch()).await
}

#[derive(Debug, Deserialize)]
struct GlobalResponse {
    data: Option<GlobalData>,
}

#[derive(Debug, Deserialize)]
struct GlobalData {
    #[serde(default)]
    market_cap_percentage: serde_json::Map<String, serde_json::Value>,
}

/// CoinGecko `/api/v3/global`: bitcoin share of total market cap.
#[derive(Debug, Clone)]
pub struct CoinGeckoSource {
    client: reqwest::Client,
    url: String,
}

impl CoinGeckoSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MetricSource for CoinGeckoSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<f64> {
        trace!("requesting global market data");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("failed to send HTTP request")?;

        if !response.status().is_success() {
            bail!("HTTP error: {}", response.status());
        }

        let body: GlobalResponse = response
            .json()
            .await
            .context("failed to parse market data JSON")?;

        let shares = body
            .data
            .map(|data| data.market_cap_percentage)
            .unwrap_or_default();
        let value = ["btc", "bitcoin"]
            .iter()
            .find_map(|key| shares.get(*key).and_then(serde_json::Value::as_f64))
            .ok_or_else(|| anyhow!("BTC dominance not found in response"))?;

        if !(0.0..=100.0).contains(&value) {
            warn!("source returned out-of-range value {value}");
            bail!("value {value} is outside 0..=100");
        }

        trace!("received {value:.4}%");
        Ok(value)
    }
}
