//! # ns-core
//!
//! Shared foundation of the netsentinel pipeline: the domain records, the
//! event bus that carries them, the repository that makes them durable, the
//! threat-intel cache, configuration, and the stats surface dashboards read.
//!
//! The detection, investigation, and response engines live in their own
//! crates and only meet through the types defined here.

pub mod bus;
pub mod cache;
pub mod config;
pub mod model;
pub mod repo;
pub mod stats;

pub use bus::{BusError, EventBus, MemoryBus};
pub use cache::{CacheError, LruTtlCache, TiCache};
pub use config::{AppConfig, ConfigError};
pub use model::{
    ActionRecord, AlertEvent, InvestigationReport, Proto, RiskBucket, SafetyLevel, Severity,
    Verdict,
};
pub use repo::{MemoryRepository, Page, RepoError, Repository, SqliteRepository};
pub use stats::{Paged, StatsService, StatsSnapshot};

#[cfg(feature = "broker")]
pub use bus::{BrokerBus, BrokerConfig};
