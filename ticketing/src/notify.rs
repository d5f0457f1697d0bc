//! Notifier that writes engine events to the log.
//!
//! Stands in for email and ticket delivery until a real channel is wired
//! up; every event becomes one structured `info` line.

use keygate_core::{EngineEvent, Notifier, NotifyError};
use std::future::Future;
use std::pin::Pin;

/// Structured-log [`Notifier`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        event: EngineEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        match &event {
            EngineEvent::PurchaseCompleted {
                purchase,
                invitation_keys,
            } => tracing::info!(
                event = event.kind(),
                purchase_id = %purchase.id,
                email = %purchase.contact.email,
                total = purchase.total_amount().minor(),
                invitations = invitation_keys.len(),
                "Ticket confirmed"
            ),
            EngineEvent::PurchaseFailed { purchase, reason } => tracing::info!(
                event = event.kind(),
                purchase_id = %purchase.id,
                email = %purchase.contact.email,
                reason = %reason,
                "Payment failed"
            ),
            EngineEvent::KeyCancelled { key, reason } => tracing::info!(
                event = event.kind(),
                key_id = %key.id,
                code = %key.code,
                reason = %reason,
                "Key cancelled"
            ),
            EngineEvent::CapacityAlert {
                confirmed,
                threshold,
            } => tracing::warn!(
                event = event.kind(),
                confirmed,
                threshold,
                "Capacity alert threshold reached"
            ),
        }
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let event = EngineEvent::CapacityAlert {
            confirmed: 270,
            threshold: 270,
        };
        assert!(LogNotifier.notify(event).await.is_ok());
    }
}
