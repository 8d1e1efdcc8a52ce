//! Fraud-score service (IPQualityScore-style free endpoint, no credential).

use crate::http::ProviderClient;
use crate::provider::{Finding, ProviderError, TiProvider};
use async_trait::async_trait;
use ns_core::config::ProviderConfig;
use std::net::IpAddr;
use std::time::Duration;

pub const NAME: &str = "fraud-score";
const DEFAULT_BASE_URL: &str = "https://www.ipqualityscore.com/api/json/ip/free";

pub struct FraudScoreProvider {
    client: ProviderClient,
    base_url: String,
}

impl FraudScoreProvider {
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

pub fn normalize(score: f64) -> f64 {
    (score / 100.0).clamp(0.0, 1.0)
}

#[async_trait]
impl TiProvider for FraudScoreProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, ProviderError> {
        let url = format!("{}/{ip}", self.base_url);
        let body = self.client.get_json(&url, &[]).await?;

        let score = body
            .get("fraud_score")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        Ok(Finding {
            source: NAME.to_string(),
            raw: serde_json::json!({ "fraud_score": score }),
            normalized_score: normalize(score),
            is_mocked: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_contract() {
        assert_eq!(normalize(0.0), 0.0);
        assert_eq!(normalize(85.0), 0.85);
        assert_eq!(normalize(100.0), 1.0);
    }
}
