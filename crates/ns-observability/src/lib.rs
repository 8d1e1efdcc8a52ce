//! # ns-observability
//!
//! Logging, metrics, and audit infrastructure for netsentinel.
//!
//! This crate provides structured logging with tracing, metric registration,
//! and the action audit trail.

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{AuditEventType, AuditLog, AuditLogEntry, AuditResult};
pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::register_pipeline_metrics;
