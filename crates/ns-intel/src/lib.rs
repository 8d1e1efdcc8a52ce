//! # ns-intel
//!
//! The investigation stage of the netsentinel pipeline: threat-intel
//! provider plug-ins with per-provider rate limits and caching, and the
//! agent that fans out lookups and fuses the answers into a verdict.

pub mod agent;
pub mod http;
pub mod provider;
pub mod providers;

pub use agent::{InvestigationAgent, InvestigationHandle};
pub use provider::{Finding, ProviderError, TiProvider};
pub use providers::{build_providers, MockProvider, BUILTIN_NAMES};
