//! Negative-vote reputation service (VirusTotal-style API).
//!
//! The service scores an IP with community votes in [-100, 100], where
//! negative means malicious. Normalization flips and rescales into [0,1]:
//! `clamp((-rep + 100) / 200, 0, 1)`.

use crate::http::ProviderClient;
use crate::provider::{Finding, ProviderError, TiProvider};
use async_trait::async_trait;
use ns_core::config::ProviderConfig;
use std::net::IpAddr;
use std::time::Duration;

pub const NAME: &str = "reputation";
const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/api/v3";

pub struct ReputationProvider {
    client: ProviderClient,
    base_url: String,
    credential: String,
}

impl ReputationProvider {
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

pub fn normalize(reputation: f64) -> f64 {
    ((-reputation + 100.0) / 200.0).clamp(0.0, 1.0)
}

#[async_trait]
impl TiProvider for ReputationProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, ProviderError> {
        if self.credential.is_empty() {
            return Err(ProviderError::MissingCredential);
        }

        let url = format!("{}/ip_addresses/{ip}", self.base_url);
        let body = self
            .client
            .get_json(&url, &[("x-apikey", &self.credential)])
            .await?;

        let reputation = body
            .pointer("/data/attributes/reputation")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        Ok(Finding {
            source: NAME.to_string(),
            raw: serde_json::json!({ "reputation": reputation }),
            normalized_score: normalize(reputation),
            is_mocked: false,
        })
    }
}
