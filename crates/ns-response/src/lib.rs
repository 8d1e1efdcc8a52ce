//! # ns-response
//!
//! The response stage of the netsentinel pipeline: the severity × risk
//! decision matrix, the safety gate that may downgrade or sandbox a
//! selection, the registry of reversible containment actions, and the
//! engine that dispatches them with an audit trail.

pub mod actions;
pub mod advisor;
pub mod dataplane;
pub mod engine;
pub mod gate;
pub mod matrix;

pub use actions::{Action, ActionError, ActionOutcome, ActionRegistry, ExecutionMode};
pub use advisor::{NoopAdvisor, PolicyAdvisor};
pub use dataplane::{DataPlane, DataPlaneError, RecordingDataPlane, SystemDataPlane};
pub use engine::{ResponseEngine, ResponseError, ResponseHandle};
pub use gate::{GateDecision, SafetyGate};
pub use matrix::DecisionMatrix;
