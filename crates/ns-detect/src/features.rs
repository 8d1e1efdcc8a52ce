//! Fixed-order feature extraction.
//!
//! The feature set is fixed at startup; scorers are trained against this
//! exact ordering, so changing [`FEATURE_NAMES`] requires retraining.

use crate::flow::{FlowKey, FlowStats};
use chrono::{DateTime, Utc};
use ns_core::model::Proto;
use std::collections::BTreeMap;
use std::time::Instant;

/// Feature names in vector order.
pub const FEATURE_NAMES: [&str; 10] = [
    "bytes",
    "packets",
    "iat_mean",
    "iat_std",
    "iat_min",
    "iat_max",
    "proto_tcp",
    "proto_udp",
    "proto_icmp",
    "proto_other",
];

/// Index of `bytes` in the vector.
pub const IDX_BYTES: usize = 0;
/// Index of `packets` in the vector.
pub const IDX_PACKETS: usize = 1;
/// Index of `iat_mean` in the vector.
pub const IDX_IAT_MEAN: usize = 2;

/// One flow snapshot, vectorized for scoring.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub key: FlowKey,
    /// `last_seen` of the snapshot, carried into the alert.
    pub flow_ts: DateTime<Utc>,
    /// When the snapshot left the flow table; drives the latency histogram.
    pub extracted_at: Instant,
    pub values: [f64; FEATURE_NAMES.len()],
}

impl FeatureVector {
    /// Extracts the fixed-order vector from a flow snapshot.
    pub fn extract(key: FlowKey, stats: &FlowStats) -> Self {
        let proto_onehot = |proto: Proto| -> [f64; 4] {
            let mut onehot = [0.0; 4];
            let idx = match proto {
                Proto::Tcp => 0,
                Proto::Udp => 1,
                Proto::Icmp => 2,
                Proto::Other => 3,
            };
            onehot[idx] = 1.0;
            onehot
        };

        let [tcp, udp, icmp, other] = proto_onehot(key.proto);
        Self {
            key,
            flow_ts: stats.last_seen,
            extracted_at: Instant::now(),
            values: [
                stats.bytes as f64,
                stats.packets as f64,
                stats.iat_mean(),
                stats.iat_std(),
                stats.iat_min(),
                stats.iat_max(),
                tcp,
                udp,
                icmp,
                other,
            ],
        }
    }

    /// Named view of the vector, as stored on the alert.
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        FEATURE_NAMES
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }
}
