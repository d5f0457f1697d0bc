//! Purchase records and the payment status machine.
//!
//! ```text
//! Pending ──complete──▶ Completed   (terminal)
//!    │
//!    └──────fail──────▶ Failed ──reopen──▶ Pending   (operator recovery only)
//! ```
//!
//! The price is captured once in a [`PriceSnapshot`] when the purchase is
//! created and never recomputed.

use crate::types::{Contact, KeyId, Money, OperatorId, PaymentReference, PurchaseId, TierName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment status of a purchase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting gateway confirmation (or free completion)
    Pending,
    /// Paid and reconciled
    Completed,
    /// Declined or abandoned
    Failed,
}

impl PaymentStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which route completed a purchase
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "via", content = "operator", rename_all = "snake_case")]
pub enum CompletionSource {
    /// Zero-amount booking completed synchronously
    Free,
    /// Approved gateway callback
    Gateway,
    /// Operator recovery of a lost callback
    Operator(OperatorId),
}

/// Add-on line as priced at booking time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonLine {
    /// Catalog identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Unit price at booking time
    pub price: Money,
}

/// Price resolved at booking time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Tier active when the booking was made
    pub tier: TierName,
    /// Ticket price
    pub ticket_price: Money,
    /// Selected add-ons with their prices
    pub addons: Vec<AddonLine>,
    /// Sum of add-on prices
    pub addon_total: Money,
    /// Ticket price plus add-ons
    pub total_amount: Money,
}

/// Purchase created by redeeming a key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Unique purchase identifier
    pub id: PurchaseId,
    /// Key consumed by this purchase
    pub key_id: KeyId,
    /// Purchaser contact
    pub contact: Contact,
    /// Price captured at booking
    pub price: PriceSnapshot,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Gateway order reference, present when payment is required
    pub payment_reference: Option<PaymentReference>,
    /// Gateway transaction identifier once approved
    pub gateway_transaction_id: Option<String>,
    /// Whether the invitation cascade has been minted
    pub invitations_generated: bool,
    /// Gateway response code of the last decline
    pub failure_code: Option<String>,
    /// Reason recorded for the last decline
    pub failure_reason: Option<String>,
    /// Route that completed the purchase
    pub completed_by: Option<CompletionSource>,
    /// When the purchase was created
    pub created_at: DateTime<Utc>,
    /// When the purchase last changed
    pub updated_at: DateTime<Utc>,
    /// When the purchase completed
    pub completed_at: Option<DateTime<Utc>>,
}

impl Purchase {
    /// Creates a pending purchase with its price snapshot
    #[must_use]
    pub const fn pending(
        id: PurchaseId,
        key_id: KeyId,
        contact: Contact,
        price: PriceSnapshot,
        payment_reference: Option<PaymentReference>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            key_id,
            contact,
            price,
            payment_status: PaymentStatus::Pending,
            payment_reference,
            gateway_transaction_id: None,
            invitations_generated: false,
            failure_code: None,
            failure_reason: None,
            completed_by: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Total charged for this purchase
    #[must_use]
    pub const fn total_amount(&self) -> Money {
        self.price.total_amount
    }

    /// Whether the purchase goes through the gateway
    #[must_use]
    pub const fn requires_payment(&self) -> bool {
        !self.price.total_amount.is_zero()
    }

    /// Whether the purchase still blocks its key from a new booking
    #[must_use]
    pub const fn holds_key(&self) -> bool {
        matches!(self.payment_status, PaymentStatus::Pending | PaymentStatus::Completed)
    }

    /// Move a pending purchase to `Completed`.
    ///
    /// # Errors
    ///
    /// Returns the current status if the purchase is not pending.
    pub fn complete(
        &mut self,
        transaction_id: Option<String>,
        source: CompletionSource,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentStatus> {
        if self.payment_status != PaymentStatus::Pending {
            return Err(self.payment_status);
        }
        self.payment_status = PaymentStatus::Completed;
        self.gateway_transaction_id = transaction_id;
        self.completed_by = Some(source);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Move a pending purchase to `Failed`, recording the gateway's reason.
    ///
    /// # Errors
    ///
    /// Returns the current status if the purchase is not pending.
    pub fn fail(
        &mut self,
        code: impl Into<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentStatus> {
        if self.payment_status != PaymentStatus::Pending {
            return Err(self.payment_status);
        }
        self.payment_status = PaymentStatus::Failed;
        self.failure_code = Some(code.into());
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }

    /// Put a failed purchase back to `Pending` so recovery can complete it.
    ///
    /// # Errors
    ///
    /// Returns the current status if the purchase has not failed.
    pub fn reopen(&mut self, now: DateTime<Utc>) -> Result<(), PaymentStatus> {
        if self.payment_status != PaymentStatus::Failed {
            return Err(self.payment_status);
        }
        self.payment_status = PaymentStatus::Pending;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn snapshot(total: u64) -> PriceSnapshot {
        PriceSnapshot {
            tier: TierName::new("early"),
            ticket_price: Money::from_minor(total),
            addons: Vec::new(),
            addon_total: Money::ZERO,
            total_amount: Money::from_minor(total),
        }
    }

    fn purchase(total: u64) -> Purchase {
        Purchase::pending(
            PurchaseId::new(),
            KeyId::new(),
            Contact::new("Alan Turing", "alan@example.com", "600000001"),
            snapshot(total),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn complete_only_from_pending() {
        let mut p = purchase(1500);
        p.complete(Some("txn".to_string()), CompletionSource::Gateway, Utc::now())
            .unwrap();

        assert_eq!(p.payment_status, PaymentStatus::Completed);
        assert_eq!(
            p.complete(None, CompletionSource::Gateway, Utc::now()),
            Err(PaymentStatus::Completed)
        );
        assert_eq!(p.gateway_transaction_id.as_deref(), Some("txn"));
    }

    #[test]
    fn failed_purchase_releases_key_and_can_reopen() {
        let mut p = purchase(1500);
        p.fail("EXPIRED_CARD", "card expired", Utc::now()).unwrap();

        assert!(!p.holds_key());
        assert_eq!(p.failure_code.as_deref(), Some("EXPIRED_CARD"));

        p.reopen(Utc::now()).unwrap();
        assert_eq!(p.payment_status, PaymentStatus::Pending);
        assert!(p.holds_key());
    }

    #[test]
    fn zero_amount_needs_no_payment() {
        assert!(!purchase(0).requires_payment());
        assert!(purchase(1).requires_payment());
    }
}
