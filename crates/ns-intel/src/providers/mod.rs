//! Built-in threat-intel providers.
//!
//! Six ship with the repo; none is load-bearing. The factory applies the
//! enablement rules: a disabled provider is left out entirely, a
//! credentialed provider without a credential is mocked in offline mode and
//! skipped otherwise, and everything is mocked when `offline_mode` is set.

pub mod abuse;
pub mod fraud;
pub mod mock;
pub mod pulse;
pub mod reputation;
pub mod scanner;
pub mod votes;

pub use abuse::AbuseConfidenceProvider;
pub use fraud::FraudScoreProvider;
pub use mock::MockProvider;
pub use pulse::PulseCountProvider;
pub use reputation::ReputationProvider;
pub use scanner::ScannerClassProvider;
pub use votes::CommunityVotesProvider;

use crate::provider::{ProviderError, TiProvider};
use ns_core::config::{InvestigationConfig, ProviderConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// Names of the built-in providers, in registration order.
pub const BUILTIN_NAMES: [&str; 6] = [
    reputation::NAME,
    abuse::NAME,
    pulse::NAME,
    fraud::NAME,
    votes::NAME,
    scanner::NAME,
];

/// Whether a built-in provider needs an API credential to be queried live.
fn requires_credential(name: &str) -> bool {
    matches!(name, reputation::NAME | abuse::NAME | pulse::NAME)
}

fn build_live(
    name: &str,
    config: &ProviderConfig,
) -> Result<Arc<dyn TiProvider>, ProviderError> {
    Ok(match name {
        reputation::NAME => Arc::new(ReputationProvider::new(config)?),
        abuse::NAME => Arc::new(AbuseConfidenceProvider::new(config)?),
        pulse::NAME => Arc::new(PulseCountProvider::new(config)?),
        fraud::NAME => Arc::new(FraudScoreProvider::new(config)?),
        votes::NAME => Arc::new(CommunityVotesProvider::new(config)?),
        scanner::NAME => Arc::new(ScannerClassProvider::new(config)?),
        other => {
            return Err(ProviderError::Http(format!(
                "unknown builtin provider '{other}'"
            )))
        }
    })
}

/// Builds the enabled provider set from configuration.
///
/// Providers absent from the config use defaults. The returned set is what
/// the agent counts as `total_configured_providers` for uncertainty.
pub fn build_providers(config: &InvestigationConfig) -> Vec<Arc<dyn TiProvider>> {
    let mut providers: Vec<Arc<dyn TiProvider>> = Vec::new();

    for name in BUILTIN_NAMES {
        let provider_config = config.providers.get(name).cloned().unwrap_or_default();
        if !provider_config.enabled {
            continue;
        }

        let credentialed = !provider_config.credential.is_empty();
        if config.offline_mode {
            providers.push(Arc::new(MockProvider::offline(name)));
            continue;
        }
        if requires_credential(name) && !credentialed {
            info!(provider = name, "no credential configured, provider skipped");
            continue;
        }

        match build_live(name, &provider_config) {
            Ok(provider) => providers.push(provider),
            Err(e) => warn!(provider = name, "provider construction failed, skipped: {e}"),
        }
    }

    providers
}
