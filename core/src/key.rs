//! Access keys and their lifecycle.
//!
//! ```text
//!            ┌──── mark_used ───▶ Used       (terminal)
//! Active ────┼──── cancel ──────▶ Cancelled  (terminal)
//!            └──── expire ──────▶ Expired    (terminal)
//! ```
//!
//! Transitions check the current status first, so replaying one against an
//! already-transitioned key fails without touching any field.

use crate::error::KeyRejection;
use crate::types::{Contact, KeyCode, KeyId, OperatorId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of key. Decides pricing and cascade size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyKind {
    /// Standard key, tier priced
    Normal,
    /// Complimentary ticket
    Free,
    /// Sponsor allocation
    Sponsor,
    /// Minted by a completed purchase's cascade
    Invitation,
    /// Ticket bundled with merchandise (polo shirt)
    #[serde(rename = "polo-bundled")]
    Bundled,
}

impl KeyKind {
    /// Every kind, in declaration order
    pub const ALL: [Self; 5] = [
        Self::Normal,
        Self::Free,
        Self::Sponsor,
        Self::Invitation,
        Self::Bundled,
    ];

    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Free => "free",
            Self::Sponsor => "sponsor",
            Self::Invitation => "invitation",
            Self::Bundled => "polo-bundled",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Redeemable
    Active,
    /// Consumed by a completed purchase
    Used,
    /// Withdrawn by an operator or maintenance
    Cancelled,
    /// Past its expiry date
    Expired,
}

impl KeyStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "used" => Some(Self::Used),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Rejection reported when a key in this status is presented
    #[must_use]
    pub const fn rejection(&self) -> Option<KeyRejection> {
        match self {
            Self::Active => None,
            Self::Used => Some(KeyRejection::AlreadyUsed),
            Self::Cancelled => Some(KeyRejection::Cancelled),
            Self::Expired => Some(KeyRejection::Expired),
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-use access key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Unique key identifier
    pub id: KeyId,
    /// Code the customer types
    pub code: KeyCode,
    /// Kind of key
    pub kind: KeyKind,
    /// Key whose completed purchase minted this one
    pub parent_key_id: Option<KeyId>,
    /// Current status
    pub status: KeyStatus,
    /// Who redeemed the key; set together with `Used`
    pub used_by: Option<Contact>,
    /// When the key was created
    pub created_at: DateTime<Utc>,
    /// Who created the key
    pub created_by: OperatorId,
    /// When the key was redeemed
    pub used_at: Option<DateTime<Utc>>,
    /// When the key was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Who cancelled the key
    pub cancelled_by: Option<OperatorId>,
    /// Why the key was cancelled
    pub cancellation_reason: Option<String>,
    /// When the key stops being redeemable
    pub expires_at: Option<DateTime<Utc>>,
}

impl Key {
    /// Creates an active key issued by an operator
    #[must_use]
    pub const fn issue(
        id: KeyId,
        code: KeyCode,
        kind: KeyKind,
        created_by: OperatorId,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            code,
            kind,
            parent_key_id: None,
            status: KeyStatus::Active,
            used_by: None,
            created_at,
            created_by,
            used_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            expires_at,
        }
    }

    /// Creates an invitation key minted by the cascade of `parent`
    #[must_use]
    pub fn invitation(
        id: KeyId,
        code: KeyCode,
        parent: KeyId,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut key = Self::issue(
            id,
            code,
            KeyKind::Invitation,
            OperatorId::system(),
            created_at,
            expires_at,
        );
        key.parent_key_id = Some(parent);
        key
    }

    /// Whether the expiry date has passed
    #[must_use]
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Check the key can be redeemed right now.
    ///
    /// An `Active` key past its expiry is reported as `Expired` even before
    /// the status has been persisted.
    ///
    /// # Errors
    ///
    /// Returns the [`KeyRejection`] matching the key's status.
    pub fn redeemable(&self, now: DateTime<Utc>) -> Result<(), KeyRejection> {
        if let Some(rejection) = self.status.rejection() {
            return Err(rejection);
        }
        if self.is_past_expiry(now) {
            return Err(KeyRejection::Expired);
        }
        Ok(())
    }

    /// Flip the key to `Used`, recording who used it.
    ///
    /// # Errors
    ///
    /// Returns the rejection for the current status if the key is not
    /// redeemable. The key is left untouched in that case.
    pub fn mark_used(&mut self, contact: Contact, now: DateTime<Utc>) -> Result<(), KeyRejection> {
        self.redeemable(now)?;
        self.status = KeyStatus::Used;
        self.used_by = Some(contact);
        self.used_at = Some(now);
        Ok(())
    }

    /// Flip a key held by a pending booking to `Used`.
    ///
    /// Only the status is checked. Expiry was enforced when the booking was
    /// made, so a payment confirmed after the expiry date still completes.
    ///
    /// # Errors
    ///
    /// Returns the current status if the key is not `Active`.
    pub fn consume(&mut self, contact: Contact, now: DateTime<Utc>) -> Result<(), KeyStatus> {
        if self.status != KeyStatus::Active {
            return Err(self.status);
        }
        self.status = KeyStatus::Used;
        self.used_by = Some(contact);
        self.used_at = Some(now);
        Ok(())
    }

    /// Cancel an active key.
    ///
    /// # Errors
    ///
    /// Returns the current status if it is already terminal.
    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        by: OperatorId,
        now: DateTime<Utc>,
    ) -> Result<(), KeyStatus> {
        if self.status != KeyStatus::Active {
            return Err(self.status);
        }
        self.status = KeyStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancelled_by = Some(by);
        self.cancellation_reason = Some(reason.into());
        Ok(())
    }

    /// Persist the `Expired` status for an active key past its expiry.
    ///
    /// Returns `true` if the status changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == KeyStatus::Active && self.is_past_expiry(now) {
            self.status = KeyStatus::Expired;
            return true;
        }
        false
    }
}
