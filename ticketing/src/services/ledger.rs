//! Purchase Ledger: purchases, their price snapshots and their audit trail.
//!
//! Every transition is written together with its audit row in the caller's
//! transaction; nothing here commits on its own except reads.

use keygate_core::{
    AuditAction, AuditEntry, CodeGenerator, Contact, DateTime, EngineError, EngineResult, Key,
    KeyId, KeyRejection, LedgerStore, LedgerTransaction, OperatorId, PaymentReference,
    PriceSnapshot, Purchase, PurchaseId, StoreError, Utc,
};
use serde_json::json;
use std::sync::Arc;

const MAX_REFERENCE_ATTEMPTS: usize = 16;

/// Purchase persistence and transitions
#[derive(Clone)]
pub struct PurchaseLedger {
    store: Arc<dyn LedgerStore>,
    codes: Arc<dyn CodeGenerator>,
}

impl PurchaseLedger {
    /// Creates a ledger over the shared store
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, codes: Arc<dyn CodeGenerator>) -> Self {
        Self { store, codes }
    }

    /// Committed purchase by id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PurchaseNotFound`] if no such purchase exists.
    pub async fn get(&self, id: PurchaseId) -> EngineResult<Purchase> {
        self.store
            .purchase(id)
            .await?
            .ok_or(EngineError::PurchaseNotFound(id))
    }

    /// Audit rows touching a purchase, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the lookup fails.
    pub async fn audit_trail(&self, id: PurchaseId) -> EngineResult<Vec<AuditEntry>> {
        Ok(self.store.audit_trail(id).await?)
    }

    /// Payment reference not used by any purchase.
    pub(crate) async fn fresh_reference_in(
        &self,
        tx: &mut dyn LedgerTransaction,
    ) -> EngineResult<PaymentReference> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let reference = self.codes.payment_reference();
            if !tx.reference_exists(reference.clone()).await? {
                return Ok(reference);
            }
            tracing::debug!(reference = %reference, "Payment reference collision, retrying");
        }
        Err(StoreError::Conflict("could not generate an unused payment reference".to_string()).into())
    }

    /// Whether some purchase other than `except` still holds `key`.
    pub(crate) async fn key_is_held_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        key: KeyId,
        except: Option<PurchaseId>,
    ) -> EngineResult<bool> {
        let purchases = tx.purchases_for_key(key).await?;
        Ok(purchases
            .iter()
            .any(|p| p.holds_key() && Some(p.id) != except))
    }

    /// Insert a pending purchase for `key` at the quoted `price`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::KeyInvalid`] with `AlreadyUsed` if the store
    /// reports another purchase already holding the key.
    pub(crate) async fn create_pending_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        key: &Key,
        contact: Contact,
        price: PriceSnapshot,
        reference: Option<PaymentReference>,
        now: DateTime<Utc>,
    ) -> EngineResult<Purchase> {
        let purchase = Purchase::pending(PurchaseId::new(), key.id, contact, price, reference, now);

        tx.insert_purchase(purchase.clone())
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => EngineError::KeyInvalid(KeyRejection::AlreadyUsed),
                other => other.into(),
            })?;
        tx.append_audit(
            AuditEntry::new(now, AuditAction::PurchaseCreated, OperatorId::system())
                .key(key.id)
                .purchase(purchase.id)
                .detail(json!({
                    "tier": purchase.price.tier,
                    "ticket_price": purchase.price.ticket_price,
                    "addons": purchase.price.addons.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
                    "total_amount": purchase.price.total_amount,
                    "payment_reference": purchase.payment_reference,
                })),
        )
        .await?;
        Ok(purchase)
    }

    /// Lock a purchase by id.
    pub(crate) async fn lock_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        id: PurchaseId,
    ) -> EngineResult<Purchase> {
        tx.lock_purchase(id)
            .await?
            .ok_or(EngineError::PurchaseNotFound(id))
    }

    /// Lock a purchase by gateway reference.
    pub(crate) async fn lock_by_reference_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        reference: &PaymentReference,
    ) -> EngineResult<Option<Purchase>> {
        Ok(tx.lock_purchase_by_reference(reference.clone()).await?)
    }

    /// Persist a completed purchase and its audit row.
    pub(crate) async fn record_completion_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        purchase: &Purchase,
        actor: &OperatorId,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        tx.update_purchase(purchase.clone()).await?;
        tx.append_audit(
            AuditEntry::new(now, AuditAction::PurchaseCompleted, actor.clone())
                .key(purchase.key_id)
                .purchase(purchase.id)
                .detail(json!({
                    "transaction_id": purchase.gateway_transaction_id,
                    "completed_by": purchase.completed_by,
                    "total_amount": purchase.price.total_amount,
                })),
        )
        .await?;
        Ok(())
    }

    /// Move a pending purchase to `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] if the purchase is not pending.
    pub(crate) async fn fail_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        purchase: &mut Purchase,
        code: &str,
        reason: &str,
        actor: &OperatorId,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        purchase
            .fail(code, reason, now)
            .map_err(|status| EngineError::InvalidState(format!("purchase is {status}")))?;

        tx.update_purchase(purchase.clone()).await?;
        tx.append_audit(
            AuditEntry::new(now, AuditAction::PurchaseFailed, actor.clone())
                .key(purchase.key_id)
                .purchase(purchase.id)
                .detail(json!({ "code": code, "reason": reason })),
        )
        .await?;
        Ok(())
    }

    /// Put a failed purchase back to `pending` for operator recovery.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] if the purchase has not failed.
    pub(crate) async fn reopen_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        purchase: &mut Purchase,
        actor: &OperatorId,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let previous_code = purchase.failure_code.clone();
        purchase
            .reopen(now)
            .map_err(|status| EngineError::InvalidState(format!("purchase is {status}")))?;

        tx.update_purchase(purchase.clone()).await?;
        tx.append_audit(
            AuditEntry::new(now, AuditAction::PurchaseReopened, actor.clone())
                .key(purchase.key_id)
                .purchase(purchase.id)
                .detail(json!({ "previous_failure_code": previous_code })),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use keygate_core::{KeyCode, KeyKind, Money, PaymentStatus, TierName};
    use keygate_testing::{fixtures, InMemoryLedgerStore, SequentialCodeGenerator};

    fn snapshot(total: u64) -> PriceSnapshot {
        PriceSnapshot {
            tier: TierName::new("early"),
            ticket_price: Money::from_minor(total),
            addons: Vec::new(),
            addon_total: Money::ZERO,
            total_amount: Money::from_minor(total),
        }
    }

    fn key() -> Key {
        Key::issue(
            KeyId::new(),
            KeyCode::parse("ABCD-EFGH").unwrap(),
            KeyKind::Normal,
            fixtures::admin(),
            fixtures::epoch(),
            None,
        )
    }

    async fn ledger() -> (PurchaseLedger, InMemoryLedgerStore) {
        let memory = InMemoryLedgerStore::with_capacity(fixtures::capacity_state(0)).await;
        let ledger = PurchaseLedger::new(
            Arc::new(memory.clone()),
            Arc::new(SequentialCodeGenerator::new()),
        );
        (ledger, memory)
    }

    #[tokio::test]
    async fn pending_purchase_is_persisted_with_audit() {
        let (ledger, memory) = ledger().await;
        let key = key();
        let now = fixtures::epoch();

        let mut tx = memory.begin().await.unwrap();
        tx.insert_key(key.clone()).await.unwrap();
        let reference = ledger.fresh_reference_in(tx.as_mut()).await.unwrap();
        let purchase = ledger
            .create_pending_in(tx.as_mut(), &key, fixtures::contact(), snapshot(1500), Some(reference.clone()), now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = ledger.get(purchase.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(stored.payment_reference, Some(reference));

        let trail = ledger.audit_trail(purchase.id).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::PurchaseCreated);
    }

    #[tokio::test]
    async fn second_pending_purchase_for_a_key_conflicts() {
        let (ledger, memory) = ledger().await;
        let key = key();
        let now = fixtures::epoch();

        let mut tx = memory.begin().await.unwrap();
        tx.insert_key(key.clone()).await.unwrap();
        ledger
            .create_pending_in(tx.as_mut(), &key, fixtures::contact(), snapshot(1500), None, now)
            .await
            .unwrap();
        assert!(ledger.key_is_held_in(tx.as_mut(), key.id, None).await.unwrap());

        let err = ledger
            .create_pending_in(tx.as_mut(), &key, fixtures::contact_n(2), snapshot(1500), None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::KeyInvalid(KeyRejection::AlreadyUsed)));
    }

    #[tokio::test]
    async fn fail_then_reopen() {
        let (ledger, memory) = ledger().await;
        let key = key();
        let now = fixtures::epoch();

        let mut tx = memory.begin().await.unwrap();
        tx.insert_key(key.clone()).await.unwrap();
        let mut purchase = ledger
            .create_pending_in(tx.as_mut(), &key, fixtures::contact(), snapshot(1500), None, now)
            .await
            .unwrap();

        ledger
            .fail_in(tx.as_mut(), &mut purchase, "EXPIRED_CARD", "card expired", &OperatorId::system(), now)
            .await
            .unwrap();
        assert_eq!(purchase.failure_code.as_deref(), Some("EXPIRED_CARD"));
        assert!(!ledger.key_is_held_in(tx.as_mut(), key.id, None).await.unwrap());
        assert!(matches!(
            ledger.fail_in(tx.as_mut(), &mut purchase, "X", "again", &OperatorId::system(), now).await,
            Err(EngineError::InvalidState(_))
        ));

        ledger
            .reopen_in(tx.as_mut(), &mut purchase, &fixtures::admin(), now)
            .await
            .unwrap();
        assert_eq!(purchase.payment_status, PaymentStatus::Pending);
        tx.commit().await.unwrap();

        let actions: Vec<_> = ledger
            .audit_trail(purchase.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            vec![AuditAction::PurchaseCreated, AuditAction::PurchaseFailed, AuditAction::PurchaseReopened]
        );
    }

    #[tokio::test]
    async fn unknown_purchase() {
        let (ledger, _) = ledger().await;
        let id = PurchaseId::new();
        assert!(matches!(ledger.get(id).await, Err(EngineError::PurchaseNotFound(found)) if found == id));
    }
}
