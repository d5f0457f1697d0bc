//! Production wiring of the engine.

use crate::config::{Config, EventPolicy};
use crate::engine::{EngineConfig, EngineEnvironment, ReconciliationEngine};
use crate::gateway::SignedRedirectGateway;
use crate::notify::LogNotifier;
use keygate_core::{LedgerStore, RandomCodeGenerator, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Build the engine over `store` with the production gateway, notifier,
/// clock and code generator.
#[must_use]
pub fn build_engine(
    store: Arc<dyn LedgerStore>,
    config: &Config,
    policy: EventPolicy,
) -> ReconciliationEngine {
    let env = EngineEnvironment {
        store,
        gateway: Arc::new(SignedRedirectGateway::new(&config.gateway)),
        notifier: Arc::new(LogNotifier),
        clock: Arc::new(SystemClock),
        codes: Arc::new(RandomCodeGenerator),
    };
    let engine_config = EngineConfig {
        invitation_ttl: policy.invitation_ttl,
        gateway_timeout: Duration::from_secs(config.gateway.timeout_secs),
    };
    ReconciliationEngine::new(env, policy.pricing, engine_config)
}
