//! Abuse-confidence service (AbuseIPDB-style API).
//!
//! Reports a confidence-of-abuse percentage in [0, 100]; normalization is
//! a straight division by 100.

use crate::http::ProviderClient;
use crate::provider::{Finding, ProviderError, TiProvider};
use async_trait::async_trait;
use ns_core::config::ProviderConfig;
use std::net::IpAddr;
use std::time::Duration;

pub const NAME: &str = "abuse-confidence";
const DEFAULT_BASE_URL: &str = "https://api.abuseipdb.com/api/v2";

pub struct AbuseConfidenceProvider {
    client: ProviderClient,
    base_url: String,
    credential: String,
}

impl AbuseConfidenceProvider {
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

pub fn normalize(confidence: f64) -> f64 {
    (confidence / 100.0).clamp(0.0, 1.0)
}

#[async_trait]
impl TiProvider for AbuseConfidenceProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, ProviderError> {
        if self.credential.is_empty() {
            return Err(ProviderError::MissingCredential);
        }

        let url = format!("{}/check?ipAddress={ip}&maxAgeInDays=90", self.base_url);
        let body = self
            .client
            .get_json(
                &url,
                &[("Key", &self.credential), ("Accept", "application/json")],
            )
            .await?;

        let confidence = body
            .pointer("/data/abuseConfidenceScore")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        Ok(Finding {
            source: NAME.to_string(),
            raw: serde_json::json!({ "abuseConfidenceScore": confidence }),
            normalized_score: normalize(confidence),
            is_mocked: false,
        })
    }
}
