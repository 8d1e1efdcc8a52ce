//! Scanner-detection service (GreyNoise-style community endpoint, no
//! credential).
//!
//! Classification maps to a fixed score: benign 0.0, unknown 0.3,
//! malicious 0.9. Unrecognized labels are treated as unknown.

use crate::http::ProviderClient;
use crate::provider::{Finding, ProviderError, TiProvider};
use async_trait::async_trait;
use ns_core::config::ProviderConfig;
use std::net::IpAddr;
use std::time::Duration;

pub const NAME: &str = "scanner-class";
const DEFAULT_BASE_URL: &str = "https://api.greynoise.io/v3/community";

pub struct ScannerClassProvider {
    client: ProviderClient,
    base_url: String,
}

impl ScannerClassProvider {
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
        })
    }
}

pub fn normalize(classification: &str) -> f64 {
    match classification {
        "benign" => 0.0,
        "malicious" => 0.9,
        _ => 0.3,
    }
}

#[async_trait]
impl TiProvider for ScannerClassProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, ProviderError> {
        let url = format!("{}/{ip}", self.base_url);
        let body = self.client.get_json(&url, &[]).await?;

        let classification = body
            .get("classification")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Finding {
            source: NAME.to_string(),
            raw: serde_json::json!({ "classification": classification }),
            normalized_score: normalize(&classification),
            is_mocked: false,
        })
    }
}
