//! The threat-intel provider contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;

/// One provider's judgement of an IOC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    /// Provider name, matching [`TiProvider::name`].
    pub source: String,
    /// The provider's raw response fields, for the audit trail.
    pub raw: serde_json::Value,
    /// Provider-specific normalization into [0,1].
    pub normalized_score: f64,
    /// True when the finding was fabricated (offline mode), never for
    /// cache hits of real findings.
    pub is_mocked: bool,
}

/// Provider failure. Recorded under `ioc_findings[source].error`; never
/// aborts an investigation.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(String),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("local rate limit exhausted")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("no API credential configured")]
    MissingCredential,
}

impl ProviderError {
    /// Error kind as a static string, stored in the findings map.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Decode(_) => "decode",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::MissingCredential => "missing_credential",
        }
    }
}

/// A reputation/abuse data source for IP indicators.
///
/// Implementations are plug-ins registered at startup; the agent queries
/// all of them concurrently and fuses whatever arrives before the fan-out
/// deadline.
#[async_trait]
pub trait TiProvider: Send + Sync + 'static {
    /// Stable provider name, used as the findings key and cache key prefix.
    fn name(&self) -> &str;

    /// Looks up one IP.
    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, ProviderError>;
}
