//! Key Store: issuance, validation and status transitions for keys.
//!
//! Codes are checked against every key ever issued, whatever its status, so
//! a cancelled code is never handed out again. Methods ending in `_in` run
//! inside a transaction owned by the caller; the rest open their own.

use keygate_core::{
    AuditAction, AuditEntry, CapacityState, Clock, CodeGenerator, Contact, DateTime, EngineError,
    EngineResult, Key, KeyCode, KeyId, KeyKind, KeyRejection, KeyStatus, LedgerStore,
    LedgerTransaction, OperatorId, Purchase, StoreError, Utc,
};
use serde_json::json;
use std::sync::Arc;

/// Most keys one `issue_keys` call may create
pub const MAX_KEYS_PER_ISSUE: u32 = 1000;

/// Reason recorded on keys cancelled by the capacity sweep
pub const CAPACITY_CANCEL_REASON: &str = "capacity reached";

const MAX_CODE_ATTEMPTS: usize = 32;

/// Outcome of checking a code
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyValidation {
    /// The key can be redeemed
    Valid(Key),
    /// The key cannot be redeemed
    Invalid {
        /// The key, if the code exists
        key: Option<Key>,
        /// Why it cannot be redeemed
        reason: KeyRejection,
    },
}

impl KeyValidation {
    /// Whether the code can be redeemed
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The key, valid or not
    #[must_use]
    pub const fn key(&self) -> Option<&Key> {
        match self {
            Self::Valid(key) => Some(key),
            Self::Invalid { key, .. } => key.as_ref(),
        }
    }

    /// Convert into the redeemable key.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::KeyInvalid`] with the rejection reason.
    pub fn into_key(self) -> EngineResult<Key> {
        match self {
            Self::Valid(key) => Ok(key),
            Self::Invalid { reason, .. } => Err(EngineError::KeyInvalid(reason)),
        }
    }
}

/// Key lifecycle service
#[derive(Clone)]
pub struct KeyStore {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    codes: Arc<dyn CodeGenerator>,
}

impl KeyStore {
    /// Creates a key store over the shared ledger
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        codes: Arc<dyn CodeGenerator>,
    ) -> Self {
        Self {
            store,
            clock,
            codes,
        }
    }

    /// Issue `count` new active keys of `kind`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] if `count` is outside `1..=1000`, the kind is
    ///   `invitation` (those come only from the cascade), or `expires_at` has passed
    /// - [`EngineError::Store`] if the keys cannot be persisted; none are created then
    pub async fn issue_keys(
        &self,
        kind: KeyKind,
        count: u32,
        expires_at: Option<DateTime<Utc>>,
        created_by: &OperatorId,
    ) -> EngineResult<Vec<Key>> {
        if kind == KeyKind::Invitation {
            return Err(EngineError::Validation(
                "invitation keys are only minted by completed purchases".to_string(),
            ));
        }
        if count == 0 || count > MAX_KEYS_PER_ISSUE {
            return Err(EngineError::Validation(format!(
                "count must be between 1 and {MAX_KEYS_PER_ISSUE}"
            )));
        }
        let now = self.clock.now();
        if expires_at.is_some_and(|at| at <= now) {
            return Err(EngineError::Validation("expiry must be in the future".to_string()));
        }

        let mut tx = self.store.begin().await?;
        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let code = self.fresh_code(tx.as_mut()).await?;
            let key = Key::issue(KeyId::new(), code, kind, created_by.clone(), now, expires_at);
            tx.insert_key(key.clone()).await?;
            tx.append_audit(
                AuditEntry::new(now, AuditAction::KeyIssued, created_by.clone())
                    .key(key.id)
                    .detail(json!({ "kind": kind, "code": key.code })),
            )
            .await?;
            keys.push(key);
        }
        tx.commit().await?;

        tracing::info!(kind = %kind, count, operator = %created_by, "Keys issued");
        Ok(keys)
    }

    /// Check whether `code` can be redeemed right now.
    ///
    /// Unparseable codes are reported as not found.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the lookup fails.
    pub async fn validate(&self, code: &str) -> EngineResult<KeyValidation> {
        let Ok(code) = KeyCode::parse(code) else {
            return Ok(KeyValidation::Invalid {
                key: None,
                reason: KeyRejection::NotFound,
            });
        };

        let validation = match self.store.key_by_code(code).await? {
            None => KeyValidation::Invalid {
                key: None,
                reason: KeyRejection::NotFound,
            },
            Some(key) => match key.redeemable(self.clock.now()) {
                Ok(()) => KeyValidation::Valid(key),
                Err(reason) => KeyValidation::Invalid {
                    key: Some(key),
                    reason,
                },
            },
        };
        Ok(validation)
    }

    /// Committed key by id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::KeyNotFound`] if no such key exists.
    pub async fn get(&self, id: KeyId) -> EngineResult<Key> {
        self.store
            .key(id)
            .await?
            .ok_or(EngineError::KeyNotFound(id))
    }

    /// Flip an active key to `used`.
    ///
    /// A second call fails with `KeyInvalid(AlreadyUsed)` and leaves the key
    /// as the first call left it, whatever contact it carries.
    ///
    /// # Errors
    ///
    /// - [`EngineError::KeyNotFound`] if the key does not exist
    /// - [`EngineError::KeyInvalid`] if it is not redeemable
    pub async fn mark_used(&self, id: KeyId, contact: Contact) -> EngineResult<Key> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut key = tx.lock_key(id).await?.ok_or(EngineError::KeyNotFound(id))?;

        key.mark_used(contact, now)?;
        tx.update_key(key.clone()).await?;
        tx.append_audit(AuditEntry::new(now, AuditAction::KeyUsed, OperatorId::system()).key(id))
            .await?;
        tx.commit().await?;

        tracing::info!(key_id = %id, "Key marked used");
        Ok(key)
    }

    /// Cancel an active key.
    ///
    /// A pending purchase made with the key is left pending; any later
    /// attempt to complete it is refused.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] if `reason` is blank
    /// - [`EngineError::KeyNotFound`] if the key does not exist
    /// - [`EngineError::InvalidState`] if the key is used, cancelled or expired
    pub async fn cancel(&self, id: KeyId, reason: &str, by: &OperatorId) -> EngineResult<Key> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::Validation("cancellation reason is required".to_string()));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut key = tx.lock_key(id).await?.ok_or(EngineError::KeyNotFound(id))?;

        if key.status == KeyStatus::Active && key.is_past_expiry(now) {
            return Err(EngineError::InvalidState("key is expired".to_string()));
        }
        key.cancel(reason, by.clone(), now)
            .map_err(|status| EngineError::InvalidState(format!("key is already {status}")))?;

        tx.update_key(key.clone()).await?;
        tx.append_audit(
            AuditEntry::new(now, AuditAction::KeyCancelled, by.clone())
                .key(id)
                .detail(json!({ "reason": reason })),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(key_id = %id, operator = %by, reason = %reason, "Key cancelled");
        Ok(key)
    }

    /// Cancel every active key once the confirmed count has reached max capacity.
    ///
    /// Used keys are never touched. Keys already past their expiry are
    /// recorded as `expired` rather than cancelled, as a single [`cancel`]
    /// would refuse them. Returns the cancelled keys; empty while slots
    /// remain.
    ///
    /// [`cancel`]: Self::cancel
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the sweep cannot be persisted; no key
    /// is cancelled then.
    pub async fn bulk_cancel_unused_beyond_capacity(
        &self,
        by: &OperatorId,
    ) -> EngineResult<Vec<Key>> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let capacity: CapacityState = tx.lock_capacity().await?;
        if capacity.has_slot() {
            return Ok(Vec::new());
        }

        let mut cancelled = Vec::new();
        for mut key in tx.lock_active_keys().await? {
            if self.expire_in(tx.as_mut(), &mut key, now).await? {
                continue;
            }
            if key.cancel(CAPACITY_CANCEL_REASON, by.clone(), now).is_err() {
                continue;
            }
            tx.update_key(key.clone()).await?;
            tx.append_audit(
                AuditEntry::new(now, AuditAction::KeyCancelled, by.clone())
                    .key(key.id)
                    .detail(json!({ "reason": CAPACITY_CANCEL_REASON })),
            )
            .await?;
            cancelled.push(key);
        }
        tx.commit().await?;

        if !cancelled.is_empty() {
            tracing::warn!(
                cancelled = cancelled.len(),
                confirmed = capacity.confirmed,
                max_capacity = capacity.settings.max_capacity,
                "Cancelled unused keys beyond capacity"
            );
        }
        Ok(cancelled)
    }

    /// Invitation keys minted by the purchase that consumed `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the lookup fails.
    pub async fn invitation_keys(&self, parent: KeyId) -> EngineResult<Vec<Key>> {
        Ok(self.store.invitation_keys(parent).await?)
    }

    /// Persist the `expired` status of a key whose expiry has passed.
    ///
    /// Returns `true` if the key changed.
    pub(crate) async fn expire_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        key: &mut Key,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        if !key.expire_if_due(now) {
            return Ok(false);
        }
        tx.update_key(key.clone()).await?;
        tx.append_audit(AuditEntry::new(now, AuditAction::KeyExpired, OperatorId::system()).key(key.id))
            .await?;
        tracing::info!(key_id = %key.id, "Key expired");
        Ok(true)
    }

    /// Consume the key held by `purchase` as part of its completion.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::IntegrityViolation`] if the key is missing or no
    /// longer active.
    pub(crate) async fn consume_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        purchase: &Purchase,
        actor: &OperatorId,
        now: DateTime<Utc>,
    ) -> EngineResult<Key> {
        let violation = |detail: String| EngineError::IntegrityViolation {
            purchase_id: purchase.id,
            key_id: purchase.key_id,
            detail,
        };

        let mut key = tx
            .lock_key(purchase.key_id)
            .await?
            .ok_or_else(|| violation("key does not exist".to_string()))?;
        key.consume(purchase.contact.clone(), now)
            .map_err(|status| violation(format!("key is {status}")))?;

        tx.update_key(key.clone()).await?;
        tx.append_audit(
            AuditEntry::new(now, AuditAction::KeyUsed, actor.clone())
                .key(key.id)
                .purchase(purchase.id),
        )
        .await?;
        Ok(key)
    }

    /// Mint `count` invitation keys whose parent is `parent`.
    pub(crate) async fn mint_invitations_in(
        &self,
        tx: &mut dyn LedgerTransaction,
        parent: &Key,
        count: u32,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<Key>> {
        let mut minted = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let code = self.fresh_code(tx).await?;
            let key = Key::invitation(KeyId::new(), code, parent.id, now, expires_at);
            tx.insert_key(key.clone()).await?;
            minted.push(key);
        }
        Ok(minted)
    }

    async fn fresh_code(&self, tx: &mut dyn LedgerTransaction) -> EngineResult<KeyCode> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = self.codes.key_code();
            if !tx.code_exists(code.clone()).await? {
                return Ok(code);
            }
            tracing::debug!(code = %code, "Key code collision, retrying");
        }
        Err(StoreError::Conflict("could not generate an unused key code".to_string()).into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use keygate_testing::{fixtures, FixedClock, InMemoryLedgerStore, SequentialCodeGenerator};

    async fn key_store(confirmed: u32) -> (KeyStore, InMemoryLedgerStore, FixedClock) {
        let memory = InMemoryLedgerStore::with_capacity(fixtures::capacity_state(confirmed)).await;
        let clock = FixedClock::new(fixtures::epoch());
        let keys = KeyStore::new(
            Arc::new(memory.clone()),
            Arc::new(clock.clone()),
            Arc::new(SequentialCodeGenerator::new()),
        );
        (keys, memory, clock)
    }

    #[tokio::test]
    async fn issue_creates_unique_active_keys() {
        let (keys, memory, _) = key_store(0).await;
        let issued = keys
            .issue_keys(KeyKind::Normal, 5, None, &fixtures::admin())
            .await
            .unwrap();

        assert_eq!(issued.len(), 5);
        assert!(issued.iter().all(|k| k.status == KeyStatus::Active && k.kind == KeyKind::Normal));
        let codes: std::collections::HashSet<_> = issued.iter().map(|k| k.code.clone()).collect();
        assert_eq!(codes.len(), 5);
        assert_eq!(memory.all_keys().await.len(), 5);
    }

    #[tokio::test]
    async fn issue_skips_codes_ever_issued() {
        let memory = InMemoryLedgerStore::with_capacity(fixtures::capacity_state(0)).await;
        let codes = SequentialCodeGenerator::scripted([
            fixtures::code("AAAA-AAAA"),
            fixtures::code("AAAA-AAAA"),
            fixtures::code("BBBB-BBBB"),
        ]);
        let keys = KeyStore::new(
            Arc::new(memory.clone()),
            Arc::new(FixedClock::new(fixtures::epoch())),
            Arc::new(codes),
        );

        let first = keys.issue_keys(KeyKind::Free, 1, None, &fixtures::admin()).await.unwrap();
        keys.cancel(first[0].id, "mistake", &fixtures::admin()).await.unwrap();
        let second = keys.issue_keys(KeyKind::Free, 1, None, &fixtures::admin()).await.unwrap();

        assert_eq!(first[0].code, fixtures::code("AAAA-AAAA"));
        assert_eq!(second[0].code, fixtures::code("BBBB-BBBB"));
    }

    #[tokio::test]
    async fn issue_rejects_bad_requests() {
        let (keys, memory, _) = key_store(0).await;
        let admin = fixtures::admin();

        for (kind, count) in [(KeyKind::Normal, 0), (KeyKind::Normal, 1001), (KeyKind::Invitation, 1)] {
            let err = keys.issue_keys(kind, count, None, &admin).await.unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{kind} x{count}");
        }
        let past = fixtures::epoch() - Duration::days(1);
        assert!(matches!(
            keys.issue_keys(KeyKind::Normal, 1, Some(past), &admin).await,
            Err(EngineError::Validation(_))
        ));
        assert!(memory.all_keys().await.is_empty());
    }

    #[tokio::test]
    async fn validate_reports_each_rejection() {
        let (keys, _, clock) = key_store(0).await;
        let admin = fixtures::admin();
        let expires = fixtures::epoch() + Duration::hours(1);
        let issued = keys.issue_keys(KeyKind::Normal, 3, Some(expires), &admin).await.unwrap();

        let valid = keys.validate(issued[0].code.as_str()).await.unwrap();
        assert!(valid.is_valid());

        keys.mark_used(issued[0].id, fixtures::contact()).await.unwrap();
        keys.cancel(issued[1].id, "duplicate", &admin).await.unwrap();

        let reason = |v: KeyValidation| match v {
            KeyValidation::Invalid { reason, .. } => Some(reason),
            KeyValidation::Valid(_) => None,
        };
        assert_eq!(reason(keys.validate(issued[0].code.as_str()).await.unwrap()), Some(KeyRejection::AlreadyUsed));
        assert_eq!(reason(keys.validate(issued[1].code.as_str()).await.unwrap()), Some(KeyRejection::Cancelled));
        assert_eq!(reason(keys.validate("ZZZZ-ZZZZ").await.unwrap()), Some(KeyRejection::NotFound));
        assert_eq!(reason(keys.validate("not a code").await.unwrap()), Some(KeyRejection::NotFound));

        clock.advance(Duration::hours(2));
        assert_eq!(reason(keys.validate(issued[2].code.as_str()).await.unwrap()), Some(KeyRejection::Expired));
    }

    #[tokio::test]
    async fn mark_used_succeeds_once() {
        let (keys, memory, _) = key_store(0).await;
        let key = keys.issue_keys(KeyKind::Normal, 1, None, &fixtures::admin()).await.unwrap().remove(0);

        let used = keys.mark_used(key.id, fixtures::contact()).await.unwrap();
        assert_eq!(used.used_by, Some(fixtures::contact()));
        let audits = memory.audit_entries().await.len();

        let err = keys.mark_used(key.id, fixtures::contact()).await.unwrap_err();
        assert!(matches!(err, EngineError::KeyInvalid(KeyRejection::AlreadyUsed)));
        assert!(matches!(
            keys.mark_used(key.id, fixtures::contact_n(2)).await,
            Err(EngineError::KeyInvalid(KeyRejection::AlreadyUsed))
        ));
        assert_eq!(keys.get(key.id).await.unwrap(), used);
        assert_eq!(memory.audit_entries().await.len(), audits);
    }

    #[tokio::test]
    async fn cancel_rules() {
        let (keys, _, clock) = key_store(0).await;
        let admin = fixtures::admin();
        let expires = fixtures::epoch() + Duration::hours(1);
        let issued = keys.issue_keys(KeyKind::Sponsor, 3, Some(expires), &admin).await.unwrap();

        let cancelled = keys.cancel(issued[0].id, "sponsor withdrew", &admin).await.unwrap();
        assert_eq!(cancelled.status, KeyStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by, Some(admin.clone()));
        assert!(matches!(
            keys.cancel(issued[0].id, "again", &admin).await,
            Err(EngineError::InvalidState(_))
        ));

        keys.mark_used(issued[1].id, fixtures::contact()).await.unwrap();
        assert!(matches!(
            keys.cancel(issued[1].id, "refund", &admin).await,
            Err(EngineError::InvalidState(_))
        ));

        assert!(matches!(
            keys.cancel(issued[2].id, "  ", &admin).await,
            Err(EngineError::Validation(_))
        ));
        clock.advance(Duration::hours(2));
        assert!(matches!(
            keys.cancel(issued[2].id, "late", &admin).await,
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            keys.cancel(KeyId::new(), "missing", &admin).await,
            Err(EngineError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn bulk_cancel_waits_for_max_capacity() {
        let (keys, memory, _) = key_store(299).await;
        let admin = fixtures::admin();
        let issued = keys.issue_keys(KeyKind::Normal, 3, None, &admin).await.unwrap();
        keys.mark_used(issued[0].id, fixtures::contact()).await.unwrap();

        assert!(keys.bulk_cancel_unused_beyond_capacity(&admin).await.unwrap().is_empty());

        memory.seed_capacity(fixtures::capacity_state(300)).await;
        let cancelled = keys.bulk_cancel_unused_beyond_capacity(&admin).await.unwrap();
        assert_eq!(cancelled.len(), 2);
        assert!(cancelled.iter().all(|k| k.cancellation_reason.as_deref() == Some(CAPACITY_CANCEL_REASON)));
        assert_eq!(keys.get(issued[0].id).await.unwrap().status, KeyStatus::Used);
    }

    #[tokio::test]
    async fn bulk_cancel_expires_lapsed_keys_instead() {
        let (keys, memory, clock) = key_store(300).await;
        let admin = fixtures::admin();
        let expires = fixtures::epoch() + Duration::hours(1);
        let lapsing = keys.issue_keys(KeyKind::Normal, 2, Some(expires), &admin).await.unwrap();
        let open = keys.issue_keys(KeyKind::Normal, 1, None, &admin).await.unwrap();

        clock.advance(Duration::hours(2));
        let cancelled = keys.bulk_cancel_unused_beyond_capacity(&admin).await.unwrap();

        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, open[0].id);
        for key in &lapsing {
            let stored = keys.get(key.id).await.unwrap();
            assert_eq!(stored.status, KeyStatus::Expired);
            assert!(stored.cancellation_reason.is_none());
        }
        let expired_audits = memory
            .audit_entries()
            .await
            .into_iter()
            .filter(|entry| entry.action == AuditAction::KeyExpired)
            .count();
        assert_eq!(expired_audits, 2);
    }
}
