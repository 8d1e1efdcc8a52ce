//! # ns-detect
//!
//! The detection stage of the netsentinel pipeline: packet ingestion, flow
//! aggregation with online statistics, feature extraction, micro-batched
//! scoring, and alert emission.
//!
//! The engine is indifferent to where packets come from — anything
//! implementing [`PacketSource`] works: offline replay, a synthetic
//! generator, or a live-capture adapter provided by the embedding process.

pub mod batcher;
pub mod engine;
pub mod features;
pub mod flow;
pub mod packet;
pub mod scorer;

pub use batcher::MicroBatcher;
pub use engine::{DetectionEngine, DetectionHandle};
pub use features::{FeatureVector, FEATURE_NAMES};
pub use flow::{FlowKey, FlowStats, FlowTable};
pub use packet::{PacketRecord, PacketSource, ReplaySource, SyntheticSource};
pub use scorer::{FeatureScaler, HeuristicScorer, ScaledScorer, Scorer, ScorerError};
