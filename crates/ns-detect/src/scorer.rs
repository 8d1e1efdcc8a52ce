//! Scoring: the pluggable scorer contract and the built-in heuristic.

use crate::features::{FeatureVector, IDX_BYTES, IDX_IAT_MEAN, IDX_PACKETS};
use ns_core::config::ScoreWeights;
use std::sync::Arc;
use thiserror::Error;

/// Error from a scorer plug-in. Always non-fatal: the batch is discarded
/// with a warning and detection continues.
#[derive(Error, Debug)]
#[error("scorer error: {0}")]
pub struct ScorerError(pub String);

/// A pure batch scoring function.
///
/// Given N feature vectors, returns N scores in [0,1]. Implementations must
/// be deterministic for a given input batch.
pub trait Scorer: Send + Sync + 'static {
    fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, ScorerError>;

    /// Whether scores are calibrated probabilities. Drives the alert
    /// confidence: `max(s, 1-s)` for probabilistic scorers, `s` otherwise.
    fn is_probabilistic(&self) -> bool {
        false
    }
}

/// Fallback scorer used when no trained model is configured.
///
/// Weighted sum of normalized bytes, packets, and inverse mean IAT, clamped
/// to [0,1]. Monotonically non-decreasing in bytes and in packets with the
/// other inputs held fixed.
pub struct HeuristicScorer {
    weights: ScoreWeights,
}

/// Normalization knee for the bytes term.
const BYTES_SCALE: f64 = 20_000.0;
/// Normalization knee for the packets term.
const PACKETS_SCALE: f64 = 200.0;

impl HeuristicScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    fn score_one(&self, vector: &FeatureVector) -> f64 {
        let bytes = vector.values[IDX_BYTES];
        let packets = vector.values[IDX_PACKETS];
        let iat_mean = vector.values[IDX_IAT_MEAN];

        let bytes_norm = (bytes / BYTES_SCALE).min(1.0);
        let packets_norm = (packets / PACKETS_SCALE).min(1.0);
        let iat_inv = if iat_mean <= 0.0 {
            0.0
        } else {
            (1.0 / iat_mean.max(0.001)).min(1.0)
        };

        let score = self.weights.bytes * bytes_norm
            + self.weights.packets * packets_norm
            + self.weights.iat_inv * iat_inv;
        score.clamp(0.0, 1.0)
    }
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

impl Scorer for HeuristicScorer {
    fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, ScorerError> {
        Ok(batch.iter().map(|v| self.score_one(v)).collect())
    }
}

/// A pre-fitted per-feature affine transform, as exported by a training
/// pipeline alongside its model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FeatureScaler {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl FeatureScaler {
    /// Applies `(x - mean) / scale` per feature. Zero scales pass the
    /// feature through centered.
    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let mean = self.means.get(i).copied().unwrap_or(0.0);
                let scale = self.scales.get(i).copied().unwrap_or(1.0);
                if scale == 0.0 {
                    x - mean
                } else {
                    (x - mean) / scale
                }
            })
            .collect()
    }
}

/// Attaches a pre-fitted scaler in front of a scorer plug-in.
pub struct ScaledScorer {
    scaler: FeatureScaler,
    inner: Arc<dyn Scorer>,
}

impl ScaledScorer {
    pub fn new(scaler: FeatureScaler, inner: Arc<dyn Scorer>) -> Self {
        Self { scaler, inner }
    }
}

impl Scorer for ScaledScorer {
    fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, ScorerError> {
        let scaled: Vec<FeatureVector> = batch
            .iter()
            .map(|v| {
                let mut scaled = v.clone();
                let transformed = self.scaler.transform(&v.values);
                scaled.values.copy_from_slice(&transformed);
                scaled
            })
            .collect();
        self.inner.score_batch(&scaled)
    }

    fn is_probabilistic(&self) -> bool {
        self.inner.is_probabilistic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_NAMES;
    use crate::flow::FlowKey;
    use chrono::Utc;
    use ns_core::model::Proto;
    use std::net::IpAddr;
    use std::time::Instant;

    fn vector(bytes: f64, packets: f64, iat_mean: f64) -> FeatureVector {
        let mut values = [0.0; FEATURE_NAMES.len()];
        values[IDX_BYTES] = bytes;
        values[IDX_PACKETS] = packets;
        values[IDX_IAT_MEAN] = iat_mean;
        values[6] = 1.0;
        FeatureVector {
            key: FlowKey {
                src_ip: IpAddr::from([203, 0, 113, 7]),
                dst_ip: IpAddr::from([10, 0, 0, 5]),
                proto: Proto::Tcp,
                src_port: 40_000,
                dst_port: 443,
            },
            flow_ts: Utc::now(),
            extracted_at: Instant::now(),
            values,
        }
    }

    #[test]
    fn scores_are_clamped() {
        let scorer = HeuristicScorer::default();
        let scores = scorer
            .score_batch(&[vector(1e9, 1e6, 0.0001), vector(0.0, 0.0, 0.0)])
            .unwrap();
        assert_eq!(scores[0], 1.0);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn heavy_fast_flow_scores_high() {
        // 1 MB, 500 packets, 10 ms mean IAT: every term saturates.
        let scorer = HeuristicScorer::default();
        let scores = scorer
            .score_batch(&[vector(1_048_576.0, 500.0, 0.01)])
            .unwrap();
        assert!(scores[0] >= 0.8);
    }

    #[test]
    fn monotone_in_bytes_and_packets() {
        let scorer = HeuristicScorer::default();
        let mut prev = -1.0;
        for bytes in (0..=40).map(|i| i as f64 * 1_000.0) {
            let score = scorer.score_batch(&[vector(bytes, 50.0, 0.5)]).unwrap()[0];
            assert!(score >= prev);
            prev = score;
        }

        let mut prev = -1.0;
        for packets in (0..=40).map(|i| i as f64 * 10.0) {
            let score = scorer
                .score_batch(&[vector(10_000.0, packets, 0.5)])
                .unwrap()[0];
            assert!(score >= prev);
            prev = score;
        }
    }

    #[test]
    fn zero_iat_contributes_nothing() {
        let scorer = HeuristicScorer::default();
        let with_zero = scorer.score_batch(&[vector(10_000.0, 50.0, 0.0)]).unwrap()[0];
        let with_slow = scorer.score_batch(&[vector(10_000.0, 50.0, 10.0)]).unwrap()[0];
        assert!(with_zero <= with_slow + 1e-9);
    }

    #[test]
    fn scaler_centers_and_scales() {
        let scaler = FeatureScaler {
            means: vec![10.0, 0.0],
            scales: vec![2.0, 0.0],
        };
        let out = scaler.transform(&[14.0, 3.0, 7.0]);
        assert_eq!(out, vec![2.0, 3.0, 7.0]);
    }

    struct ProbeScorer;

    impl Scorer for ProbeScorer {
        fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, ScorerError> {
            Ok(batch.iter().map(|v| v.values[IDX_BYTES]).collect())
        }

        fn is_probabilistic(&self) -> bool {
            true
        }
    }

    #[test]
    fn scaled_scorer_transforms_before_delegating() {
        let scaler = FeatureScaler {
            means: vec![100.0; FEATURE_NAMES.len()],
            scales: vec![1.0; FEATURE_NAMES.len()],
        };
        let scorer = ScaledScorer::new(scaler, Arc::new(ProbeScorer));
        let scores = scorer.score_batch(&[vector(150.0, 0.0, 0.0)]).unwrap();
        assert_eq!(scores[0], 50.0);
        assert!(scorer.is_probabilistic());
    }
}
