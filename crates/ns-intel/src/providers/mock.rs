//! Mock provider for offline mode and tests.
//!
//! Offline findings are derived from a hash of `(source, ip)` so the same
//! IOC always investigates the same way — reproducible demos, reproducible
//! tests — while different IOCs still spread across the score range.

use crate::provider::{Finding, ProviderError, TiProvider};
use crate::providers::{abuse, fraud, pulse, reputation, scanner, votes};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

enum Behavior {
    /// Hash-derived finding shaped like the named live provider's response.
    Deterministic,
    /// Fixed normalized score, for scenario tests.
    Fixed(f64),
    /// Always errors, for failure-path tests.
    Failing,
}

/// Stand-in [`TiProvider`] producing deterministic findings.
pub struct MockProvider {
    source: String,
    behavior: Behavior,
}

impl MockProvider {
    /// Offline-mode replacement for the named provider.
    pub fn offline(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            behavior: Behavior::Deterministic,
        }
    }

    /// Always reports the given normalized score.
    pub fn fixed(source: impl Into<String>, normalized_score: f64) -> Self {
        Self {
            source: source.into(),
            behavior: Behavior::Fixed(normalized_score),
        }
    }

    /// Always fails with an HTTP error.
    pub fn failing(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            behavior: Behavior::Failing,
        }
    }

    /// Stable per-(source, ip) value in [0, bound).
    fn roll(&self, ip: IpAddr, bound: u64) -> u64 {
        let digest = Sha256::digest(format!("{}:{ip}", self.source).as_bytes());
        let mut first = [0u8; 8];
        first.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(first) % bound
    }

    fn deterministic_finding(&self, ip: IpAddr) -> Finding {
        let (raw, normalized_score) = match self.source.as_str() {
            reputation::NAME => {
                let rep = self.roll(ip, 201) as f64 - 100.0;
                (
                    serde_json::json!({ "reputation": rep }),
                    reputation::normalize(rep),
                )
            }
            abuse::NAME => {
                let confidence = self.roll(ip, 101) as f64;
                (
                    serde_json::json!({ "abuseConfidenceScore": confidence }),
                    abuse::normalize(confidence),
                )
            }
            pulse::NAME => {
                let count = self.roll(ip, 8) as f64;
                (serde_json::json!({ "pulses": count }), pulse::normalize(count))
            }
            fraud::NAME => {
                let score = self.roll(ip, 101) as f64;
                (
                    serde_json::json!({ "fraud_score": score }),
                    fraud::normalize(score),
                )
            }
            votes::NAME => {
                let malicious = self.roll(ip, 10) as f64;
                let benign = (self.roll(ip, 97) % 7) as f64;
                (
                    serde_json::json!({
                        "votes_malicious": malicious,
                        "votes_benign": benign,
                    }),
                    votes::normalize(malicious, benign),
                )
            }
            scanner::NAME => {
                let classification = match self.roll(ip, 3) {
                    0 => "benign",
                    1 => "unknown",
                    _ => "malicious",
                };
                (
                    serde_json::json!({ "classification": classification }),
                    scanner::normalize(classification),
                )
            }
            _ => {
                let score = self.roll(ip, 101) as f64 / 100.0;
                (serde_json::json!({ "score": score }), score)
            }
        };

        Finding {
            source: self.source.clone(),
            raw,
            normalized_score,
            is_mocked: true,
        }
    }
}

#[async_trait]
impl TiProvider for MockProvider {
    fn name(&self) -> &str {
        &self.source
    }

    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, ProviderError> {
        match &self.behavior {
            Behavior::Deterministic => Ok(self.deterministic_finding(ip)),
            Behavior::Fixed(score) => Ok(Finding {
                source: self.source.clone(),
                raw: serde_json::json!({ "fixed": score }),
                normalized_score: *score,
                is_mocked: true,
            }),
            Behavior::Failing => Err(ProviderError::Http("mock provider down".to_string())),
        }
    }
}
