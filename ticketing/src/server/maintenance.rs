//! Periodic maintenance.
//!
//! Runs the capacity sweep on a fixed interval until shutdown is signalled.

use crate::engine::ReconciliationEngine;
use keygate_core::OperatorId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Spawn the maintenance loop.
///
/// The first sweep runs one `interval` after start. Sending `true` on the
/// `shutdown` channel (or dropping its sender) stops the loop.
pub fn spawn_maintenance(
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => run_sweep(&engine).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Maintenance task stopping");
                        break;
                    }
                }
            }
        }
    })
}

async fn run_sweep(engine: &ReconciliationEngine) {
    match engine
        .bulk_cancel_unused_beyond_capacity(&OperatorId::system())
        .await
    {
        Ok(0) => tracing::debug!("Capacity sweep found nothing to cancel"),
        Ok(cancelled) => tracing::info!(cancelled, "Capacity sweep cancelled unused keys"),
        Err(e) => tracing::error!(error = %e, "Capacity sweep failed"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, EngineEnvironment};
    use keygate_core::{KeyKind, KeyStatus, PricingPolicy};
    use keygate_testing::{
        fixtures, test_clock, InMemoryLedgerStore, MockPaymentGateway, RecordingNotifier,
        SequentialCodeGenerator,
    };

    #[tokio::test]
    async fn sweeps_until_shutdown() {
        let memory = InMemoryLedgerStore::with_capacity(fixtures::capacity_state(300)).await;
        let env = EngineEnvironment {
            store: Arc::new(memory.clone()),
            gateway: Arc::new(MockPaymentGateway::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            clock: Arc::new(test_clock()),
            codes: Arc::new(SequentialCodeGenerator::new()),
        };
        let engine = Arc::new(ReconciliationEngine::new(
            env,
            PricingPolicy::default(),
            EngineConfig::default(),
        ));
        engine
            .issue_keys(KeyKind::Normal, 2, None, &fixtures::admin())
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = spawn_maintenance(Arc::clone(&engine), Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(memory.keys_with_status(KeyStatus::Active).await.is_empty());
        assert_eq!(memory.keys_with_status(KeyStatus::Cancelled).await.len(), 2);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
