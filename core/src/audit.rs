//! Audit trail rows written in the same transaction as the change they record.

use crate::types::{KeyId, OperatorId, PurchaseId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Key created by an operator
    KeyIssued,
    /// Key redeemed
    KeyUsed,
    /// Key cancelled
    KeyCancelled,
    /// Key expiry persisted
    KeyExpired,
    /// Pending purchase created
    PurchaseCreated,
    /// Purchase completed
    PurchaseCompleted,
    /// Purchase failed
    PurchaseFailed,
    /// Failed purchase reopened for recovery
    PurchaseReopened,
    /// Invitation cascade minted
    InvitationsMinted,
    /// Confirmed count incremented
    CapacityIncremented,
    /// Capacity settings replaced
    CapacitySettingsUpdated,
    /// Operator ran the recovery path
    ManualFix,
}

impl AuditAction {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::KeyIssued => "key_issued",
            Self::KeyUsed => "key_used",
            Self::KeyCancelled => "key_cancelled",
            Self::KeyExpired => "key_expired",
            Self::PurchaseCreated => "purchase_created",
            Self::PurchaseCompleted => "purchase_completed",
            Self::PurchaseFailed => "purchase_failed",
            Self::PurchaseReopened => "purchase_reopened",
            Self::InvitationsMinted => "invitations_minted",
            Self::CapacityIncremented => "capacity_incremented",
            Self::CapacitySettingsUpdated => "capacity_settings_updated",
            Self::ManualFix => "manual_fix",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::KeyIssued,
            Self::KeyUsed,
            Self::KeyCancelled,
            Self::KeyExpired,
            Self::PurchaseCreated,
            Self::PurchaseCompleted,
            Self::PurchaseFailed,
            Self::PurchaseReopened,
            Self::InvitationsMinted,
            Self::CapacityIncremented,
            Self::CapacitySettingsUpdated,
            Self::ManualFix,
        ]
        .into_iter()
        .find(|action| action.as_str() == s)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When it happened
    pub at: DateTime<Utc>,
    /// What happened
    pub action: AuditAction,
    /// Key involved
    pub key_id: Option<KeyId>,
    /// Purchase involved
    pub purchase_id: Option<PurchaseId>,
    /// Who did it
    pub actor: OperatorId,
    /// Free-form details
    pub detail: serde_json::Value,
}

impl AuditEntry {
    /// Creates an entry with no details
    #[must_use]
    pub const fn new(at: DateTime<Utc>, action: AuditAction, actor: OperatorId) -> Self {
        Self {
            at,
            action,
            key_id: None,
            purchase_id: None,
            actor,
            detail: serde_json::Value::Null,
        }
    }

    /// Attach the key
    #[must_use]
    pub const fn key(mut self, key_id: KeyId) -> Self {
        self.key_id = Some(key_id);
        self
    }

    /// Attach the purchase
    #[must_use]
    pub const fn purchase(mut self, purchase_id: PurchaseId) -> Self {
        self.purchase_id = Some(purchase_id);
        self
    }

    /// Attach details
    #[must_use]
    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
