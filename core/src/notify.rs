//! Events emitted to the notification layer after a transition commits.
//!
//! Delivery is best effort. A failed notification is logged by the engine and
//! never rolls back the transition that produced it.

use crate::key::Key;
use crate::purchase::Purchase;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Engine transition visible to the outside world
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Purchase completed and its cascade was minted
    PurchaseCompleted {
        /// Completed purchase
        purchase: Purchase,
        /// Keys minted by the cascade
        invitation_keys: Vec<Key>,
    },
    /// Purchase failed
    PurchaseFailed {
        /// Failed purchase
        purchase: Purchase,
        /// Gateway or operator reason
        reason: String,
    },
    /// Key cancelled
    KeyCancelled {
        /// Cancelled key
        key: Key,
        /// Cancellation reason
        reason: String,
    },
    /// Confirmed count reached the alert threshold
    CapacityAlert {
        /// Confirmed attendees
        confirmed: u32,
        /// Alert threshold
        threshold: u32,
    },
}

impl EngineEvent {
    /// Short name used in logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PurchaseCompleted { .. } => "purchase_completed",
            Self::PurchaseFailed { .. } => "purchase_failed",
            Self::KeyCancelled { .. } => "key_cancelled",
            Self::CapacityAlert { .. } => "capacity_alert",
        }
    }
}

/// Notification delivery failure
#[derive(Error, Debug, Clone)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Consumer of engine events (email, ticket rendering, chat alerts)
pub trait Notifier: Send + Sync {
    /// Deliver one event
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery failed.
    fn notify(&self, event: EngineEvent) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}
