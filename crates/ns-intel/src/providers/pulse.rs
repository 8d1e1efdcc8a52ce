//! Threat-exchange pulse service (OTX-style API).
//!
//! An IP appearing in more community pulses is more suspect; five or more
//! pulses saturates: `min(count / 5, 1)`.

use crate::http::ProviderClient;
use crate::provider::{Finding, ProviderError, TiProvider};
use async_trait::async_trait;
use ns_core::config::ProviderConfig;
use std::net::IpAddr;
use std::time::Duration;

pub const NAME: &str = "pulse-count";
const DEFAULT_BASE_URL: &str = "https://otx.alienvault.com/api/v1";

pub struct PulseCountProvider {
    client: ProviderClient,
    base_url: String,
    credential: String,
}

impl PulseCountProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: ProviderClient::new(
                config.requests_per_day,
                config.burst,
                Duration::from_secs(5),
            )?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            credential: config.credential.clone(),
        })
    }
}

pub fn normalize(count: f64) -> f64 {
    (count / 5.0).clamp(0.0, 1.0)
}

#[async_trait]
impl TiProvider for PulseCountProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, ProviderError> {
        if self.credential.is_empty() {
            return Err(ProviderError::MissingCredential);
        }

        let url = format!("{}/indicators/IPv4/{ip}/general", self.base_url);
        let body = self
            .client
            .get_json(&url, &[("X-OTX-API-KEY", &self.credential)])
            .await?;

        let count = body
            .pointer("/pulse_info/count")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        Ok(Finding {
            source: NAME.to_string(),
            raw: serde_json::json!({ "pulses": count }),
            normalized_score: normalize(count),
            is_mocked: false,
        })
    }
}
