//! Shared HTTP plumbing for live providers: one reqwest client per
//! provider with an independent token-bucket rate limiter.
//!
//! The limiter fails fast instead of queueing — a daily quota that is
//! exhausted now will still be exhausted three seconds from now, and the
//! fan-out deadline is better spent on providers that can answer.

use crate::provider::ProviderError;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-provider HTTP client with a token bucket.
pub struct ProviderClient {
    client: reqwest::Client,
    limiter: Arc<DirectLimiter>,
}

/// Seconds per day, for spreading the daily quota evenly.
const DAY_SECS: u64 = 86_400;

impl ProviderClient {
    /// Builds a client allowing `requests_per_day` with the given burst.
    pub fn new(requests_per_day: u32, burst: u32, timeout: Duration) -> Result<Self, ProviderError> {
        let per_day = NonZeroU32::new(requests_per_day.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN);

        // Refill evenly across the day, allow the configured burst on top.
        let quota = Quota::with_period(Duration::from_secs(DAY_SECS) / per_day.get())
            .expect("nonzero period")
            .allow_burst(burst);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(format!("client build: {e}")))?;

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// GET returning parsed JSON. Checks the token bucket first and fails
    /// fast when it is empty.
    pub async fn get_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<serde_json::Value, ProviderError> {
        if self.limiter.check().is_err() {
            metrics::counter!("ns_ti_rate_limited_total").increment(1);
            return Err(ProviderError::RateLimited);
        }

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Http(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(ProviderError::Http(format!(
                "status {} from {url}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_then_rate_limited() {
        // 1 request/day with burst 2: two immediate calls pass the bucket,
        // the third is rejected locally (the URL is never reached because
        // the limiter trips first).
        let client = ProviderClient::new(1, 2, Duration::from_millis(50)).unwrap();

        for _ in 0..2 {
            let err = client
                .get_json("http://127.0.0.1:1/unreachable", &[])
                .await
                .unwrap_err();
            assert!(!matches!(err, ProviderError::RateLimited), "{err:?}");
        }

        let err = client
            .get_json("http://127.0.0.1:1/unreachable", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited));
    }
}
