//! Pre-decision advisor hook.
//!
//! A learned policy (or any other heuristic) may suggest a different action
//! than the matrix cell. The suggestion is advisory: the static matrix
//! remains authoritative for what the cell proposes, the advisor may only
//! shift the proposal, and whatever comes out still passes the safety gate
//! unchanged.

use ns_core::model::InvestigationReport;

/// Advises on the action proposed by the decision matrix.
pub trait PolicyAdvisor: Send + Sync + 'static {
    /// Returns a replacement action type, or `None` to keep the proposal.
    /// Suggestions naming unregistered actions are ignored.
    fn advise(&self, report: &InvestigationReport, proposed: &str) -> Option<String>;
}

/// Default advisor: never overrides.
pub struct NoopAdvisor;

impl PolicyAdvisor for NoopAdvisor {
    fn advise(&self, _report: &InvestigationReport, _proposed: &str) -> Option<String> {
        None
    }
}
