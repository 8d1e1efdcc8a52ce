//! The safety gate: last line of defense before an action dispatches.
//!
//! Rules apply in a fixed order and each applied rule appends to the
//! downgrade trace, which lands in the action record as
//! `parameters.gate_trace` for auditability:
//!
//! 1. whitelisted target -> `log_only`
//! 2. loopback or management-subnet target -> `log_only`
//! 3. low confidence on an intrusive action -> one level down
//!    (intrusive -> `rate_limit`; would-be `rate_limit` -> `log_only`)
//! 4. production actions disabled -> execute in simulation

use crate::actions::{ActionRegistry, ExecutionMode};
use ipnet::IpNet;
use metrics::counter;
use ns_core::config::ResponseConfig;
use std::net::IpAddr;
use tracing::info;

/// Outcome of gating one proposed action.
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    /// The action that will actually dispatch.
    pub action_type: String,
    /// Names of the rules that fired, in order.
    pub trace: Vec<String>,
    pub mode: ExecutionMode,
}

/// Address sets and thresholds the gate checks against.
pub struct SafetyGate {
    whitelist: Vec<IpNet>,
    management: Vec<IpNet>,
    min_confidence: f64,
    production_enabled: bool,
}

/// Parses an address or CIDR into a net (single addresses become /32 or
/// /128). Invalid entries were rejected by config validation already.
fn parse_net(entry: &str) -> Option<IpNet> {
    if let Ok(net) = entry.parse::<IpNet>() {
        return Some(net);
    }
    entry.parse::<IpAddr>().ok().map(IpNet::from)
}

impl SafetyGate {
    pub fn new(config: &ResponseConfig) -> Self {
        Self {
            whitelist: config.ip_whitelist.iter().filter_map(|e| parse_net(e)).collect(),
            management: config
                .management_subnets
                .iter()
                .filter_map(|e| parse_net(e))
                .collect(),
            min_confidence: config.min_confidence_for_intrusive_action,
            production_enabled: config.production_actions_enabled,
        }
    }

    fn is_whitelisted(&self, ip: IpAddr) -> bool {
        self.whitelist.iter().any(|net| net.contains(&ip))
    }

    fn is_protected(&self, ip: IpAddr) -> bool {
        ip.is_loopback() || self.management.iter().any(|net| net.contains(&ip))
    }

    /// Applies the gate to a proposed action against a target.
    ///
    /// Non-IP targets (file paths, unit names) skip the address rules but
    /// still go through the confidence and simulation rules.
    pub fn apply(
        &self,
        registry: &ActionRegistry,
        proposed: &str,
        target: &str,
        confidence: f64,
    ) -> GateDecision {
        let mut action = proposed.to_string();
        let mut trace = Vec::new();

        if let Ok(ip) = target.parse::<IpAddr>() {
            if self.is_whitelisted(ip) {
                trace.push("whitelist".to_string());
                action = "log_only".to_string();
            } else if ip.is_loopback() {
                trace.push("loopback".to_string());
                action = "log_only".to_string();
            } else if self.is_protected(ip) {
                trace.push("management_subnet".to_string());
                action = "log_only".to_string();
            }
        }

        if confidence < self.min_confidence {
            let intrusive = registry
                .get(&action)
                .map(|a| a.is_intrusive())
                .unwrap_or(false);
            if intrusive {
                trace.push("low_confidence".to_string());
                action = "rate_limit".to_string();
            } else if action == "rate_limit" {
                trace.push("low_confidence".to_string());
                action = "log_only".to_string();
            }
        }

        if !trace.is_empty() {
            counter!("ns_actions_downgraded_total").increment(1);
            info!(
                proposed,
                ip = target,
                downgraded_to = %action,
                rules = ?trace,
                "safety gate downgraded action"
            );
        }

        let mode = if self.production_enabled {
            ExecutionMode::Production
        } else {
            ExecutionMode::Simulation
        };

        GateDecision {
            action_type: action,
            trace,
            mode,
        }
    }
}
