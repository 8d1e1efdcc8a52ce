//! Community-votes service (ThreatCrowd-style aggregator, no credential).
//!
//! Normalization uses add-one smoothing so a handful of malicious votes
//! with no benign counterweight does not saturate:
//! `malicious / (malicious + benign + 1)`.

use crate::http::ProviderClient;
use crate::provider::{Finding, ProviderError, TiProvider};
use async_trait::async_trait;
use ns_core::config::ProviderConfig;
use std::net::IpAddr;
use std::time::Duration;

pub const NAME: &str = "community-votes";
const DEFAULT_BASE_URL: &str = "https://www.threatcrowd.org/searchApi/v2";

pub struct CommunityVotesProvider {
    client: ProviderClient,
    base_url: String,
}

impl CommunityVotesProvider {
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

pub fn normalize(malicious: f64, benign: f64) -> f64 {
    let malicious = malicious.max(0.0);
    let benign = benign.max(0.0);
    (malicious / (malicious + benign + 1.0)).clamp(0.0, 1.0)
}

#[async_trait]
impl TiProvider for CommunityVotesProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, ProviderError> {
        let url = format!("{}/ip/report/?ip={ip}", self.base_url);
        let body = self.client.get_json(&url, &[]).await?;

        let malicious = body
            .get("votes_malicious")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let benign = body
            .get("votes_benign")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        Ok(Finding {
            source: NAME.to_string(),
            raw: serde_json::json!({
                "votes_malicious": malicious,
                "votes_benign": benign,
            }),
            normalized_score: normalize(malicious, benign),
            is_mocked: false,
        })
    }
}
