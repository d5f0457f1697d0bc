//! In-memory ledger store.
//!
//! Transactions are serialised by a single async mutex held for the lifetime
//! of the transaction, which is stricter than row locks but gives the same
//! guarantees. Each transaction works on a private copy of the tables; commit
//! swaps the copy in, drop discards it.
//!
//! Committed reads go through a separate snapshot so they never wait on an
//! open transaction.

use keygate_core::store::{LedgerStore, LedgerTransaction, StoreFuture};
use keygate_core::{
    AuditEntry, CapacityState, Key, KeyCode, KeyId, KeyKind, KeyStatus, PaymentReference,
    PaymentStatus, Purchase, PurchaseId, StoreError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Clone, Debug, Default)]
struct Tables {
    keys: BTreeMap<KeyId, Key>,
    purchases: BTreeMap<PurchaseId, Purchase>,
    capacity: Option<CapacityState>,
    audit: Vec<AuditEntry>,
}

impl Tables {
    fn key_by_code(&self, code: &KeyCode) -> Option<&Key> {
        self.keys.values().find(|key| &key.code == code)
    }

    fn invitation_keys(&self, parent: KeyId) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .keys
            .values()
            .filter(|key| key.kind == KeyKind::Invitation && key.parent_key_id == Some(parent))
            .cloned()
            .collect();
        keys.sort_by_key(|key| key.created_at);
        keys
    }

    fn pending_holds(&self) -> u32 {
        let pending = self
            .purchases
            .values()
            .filter(|purchase| purchase.payment_status == PaymentStatus::Pending)
            .count();
        u32::try_from(pending).unwrap_or(u32::MAX)
    }
}

/// In-memory [`LedgerStore`] for tests
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    write: Arc<Mutex<Tables>>,
    committed: Arc<RwLock<Tables>>,
}

impl InMemoryLedgerStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with a seeded capacity row
    pub async fn with_capacity(state: CapacityState) -> Self {
        let store = Self::new();
        store.seed_capacity(state).await;
        store
    }

    /// Replace the capacity row outside of any transaction
    pub async fn seed_capacity(&self, state: CapacityState) {
        let mut tables = self.write.lock().await;
        tables.capacity = Some(state);
        *self.committed.write().await = tables.clone();
    }

    /// Every committed key
    pub async fn all_keys(&self) -> Vec<Key> {
        self.committed.read().await.keys.values().cloned().collect()
    }

    /// Committed keys with the given status
    pub async fn keys_with_status(&self, status: KeyStatus) -> Vec<Key> {
        self.committed
            .read()
            .await
            .keys
            .values()
            .filter(|key| key.status == status)
            .cloned()
            .collect()
    }

    /// Every committed purchase
    pub async fn all_purchases(&self) -> Vec<Purchase> {
        self.committed.read().await.purchases.values().cloned().collect()
    }

    /// Every committed audit row
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.committed.read().await.audit.clone()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn LedgerTransaction>> {
        Box::pin(async move {
            let guard = Arc::clone(&self.write).lock_owned().await;
            let working = guard.clone();
            let tx: Box<dyn LedgerTransaction> = Box::new(InMemoryTransaction {
                guard,
                working,
                committed: Arc::clone(&self.committed),
            });
            Ok(tx)
        })
    }

    fn capacity_snapshot(&self) -> StoreFuture<'_, Option<CapacityState>> {
        Box::pin(async move { Ok(self.committed.read().await.capacity.clone()) })
    }

    fn purchase(&self, id: PurchaseId) -> StoreFuture<'_, Option<Purchase>> {
        Box::pin(async move { Ok(self.committed.read().await.purchases.get(&id).cloned()) })
    }

    fn key(&self, id: KeyId) -> StoreFuture<'_, Option<Key>> {
        Box::pin(async move { Ok(self.committed.read().await.keys.get(&id).cloned()) })
    }

    fn key_by_code(&self, code: KeyCode) -> StoreFuture<'_, Option<Key>> {
        Box::pin(async move { Ok(self.committed.read().await.key_by_code(&code).cloned()) })
    }

    fn invitation_keys(&self, parent: KeyId) -> StoreFuture<'_, Vec<Key>> {
        Box::pin(async move { Ok(self.committed.read().await.invitation_keys(parent)) })
    }

    fn pending_holds(&self) -> StoreFuture<'_, u32> {
        Box::pin(async move { Ok(self.committed.read().await.pending_holds()) })
    }

    fn audit_trail(&self, purchase: PurchaseId) -> StoreFuture<'_, Vec<AuditEntry>> {
        Box::pin(async move {
            Ok(self
                .committed
                .read()
                .await
                .audit
                .iter()
                .filter(|entry| entry.purchase_id == Some(purchase))
                .cloned()
                .collect())
        })
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    committed: Arc<RwLock<Tables>>,
}

impl LedgerTransaction for InMemoryTransaction {
    fn lock_capacity(&mut self) -> StoreFuture<'_, CapacityState> {
        let capacity = self.working.capacity.clone();
        Box::pin(async move {
            capacity.ok_or_else(|| StoreError::NotFound("capacity state".to_string()))
        })
    }

    fn save_capacity(&mut self, state: CapacityState) -> StoreFuture<'_, ()> {
        self.working.capacity = Some(state);
        Box::pin(async { Ok(()) })
    }

    fn lock_key_by_code(&mut self, code: KeyCode) -> StoreFuture<'_, Option<Key>> {
        let key = self.working.key_by_code(&code).cloned();
        Box::pin(async move { Ok(key) })
    }

    fn lock_key(&mut self, id: KeyId) -> StoreFuture<'_, Option<Key>> {
        let key = self.working.keys.get(&id).cloned();
        Box::pin(async move { Ok(key) })
    }

    fn lock_active_keys(&mut self) -> StoreFuture<'_, Vec<Key>> {
        let keys: Vec<Key> = self
            .working
            .keys
            .values()
            .filter(|key| key.status == KeyStatus::Active)
            .cloned()
            .collect();
        Box::pin(async move { Ok(keys) })
    }

    fn code_exists(&mut self, code: KeyCode) -> StoreFuture<'_, bool> {
        let exists = self.working.key_by_code(&code).is_some();
        Box::pin(async move { Ok(exists) })
    }

    fn insert_key(&mut self, key: Key) -> StoreFuture<'_, ()> {
        let result = if self.working.keys.contains_key(&key.id)
            || self.working.key_by_code(&key.code).is_some()
        {
            Err(StoreError::Conflict(format!("key {} already exists", key.code)))
        } else {
            self.working.keys.insert(key.id, key);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn update_key(&mut self, key: Key) -> StoreFuture<'_, ()> {
        let result = match self.working.keys.get_mut(&key.id) {
            Some(slot) => {
                *slot = key;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("key {}", key.id))),
        };
        Box::pin(async move { result })
    }

    fn purchases_for_key(&mut self, key: KeyId) -> StoreFuture<'_, Vec<Purchase>> {
        let mut purchases: Vec<Purchase> = self
            .working
            .purchases
            .values()
            .filter(|purchase| purchase.key_id == key)
            .cloned()
            .collect();
        purchases.sort_by_key(|purchase| purchase.created_at);
        Box::pin(async move { Ok(purchases) })
    }

    fn lock_purchase(&mut self, id: PurchaseId) -> StoreFuture<'_, Option<Purchase>> {
        let purchase = self.working.purchases.get(&id).cloned();
        Box::pin(async move { Ok(purchase) })
    }

    fn lock_purchase_by_reference(
        &mut self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Option<Purchase>> {
        let purchase = self
            .working
            .purchases
            .values()
            .find(|purchase| purchase.payment_reference.as_ref() == Some(&reference))
            .cloned();
        Box::pin(async move { Ok(purchase) })
    }

    fn count_pending_holds(&mut self) -> StoreFuture<'_, u32> {
        let pending = self.working.pending_holds();
        Box::pin(async move { Ok(pending) })
    }

    fn reference_exists(&mut self, reference: PaymentReference) -> StoreFuture<'_, bool> {
        let exists = self
            .working
            .purchases
            .values()
            .any(|purchase| purchase.payment_reference.as_ref() == Some(&reference));
        Box::pin(async move { Ok(exists) })
    }

    fn insert_purchase(&mut self, purchase: Purchase) -> StoreFuture<'_, ()> {
        let key_held = self
            .working
            .purchases
            .values()
            .any(|existing| existing.key_id == purchase.key_id && existing.holds_key());
        let result = if key_held && purchase.holds_key() {
            Err(StoreError::Conflict(format!(
                "key {} already has an open purchase",
                purchase.key_id
            )))
        } else if self.working.purchases.contains_key(&purchase.id) {
            Err(StoreError::Conflict(format!("purchase {} already exists", purchase.id)))
        } else {
            self.working.purchases.insert(purchase.id, purchase);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn update_purchase(&mut self, purchase: Purchase) -> StoreFuture<'_, ()> {
        let result = match self.working.purchases.get_mut(&purchase.id) {
            Some(slot) => {
                *slot = purchase;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("purchase {}", purchase.id))),
        };
        Box::pin(async move { result })
    }

    fn append_audit(&mut self, entry: AuditEntry) -> StoreFuture<'_, ()> {
        self.working.audit.push(entry);
        Box::pin(async { Ok(()) })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            let Self {
                mut guard,
                working,
                committed,
            } = *self;
            *committed.write().await = working.clone();
            *guard = working;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures;
    use keygate_core::OperatorId;

    fn key(code: &str) -> Key {
        Key::issue(
            KeyId::new(),
            KeyCode::parse(code).unwrap(),
            KeyKind::Normal,
            OperatorId::system(),
            fixtures::epoch(),
            None,
        )
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryLedgerStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_key(key("AAAA-BBBB")).await.unwrap();
        }
        assert!(store.all_keys().await.is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.insert_key(key("AAAA-BBBB")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.all_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_codes_conflict() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_key(key("AAAA-BBBB")).await.unwrap();
        let err = tx.insert_key(key("AAAA-BBBB")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn committed_reads_do_not_wait_for_open_transactions() {
        let store = InMemoryLedgerStore::with_capacity(fixtures::capacity_state(0)).await;
        let _tx = store.begin().await.unwrap();

        let snapshot = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            store.capacity_snapshot(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(snapshot.unwrap().confirmed, 0);
    }

    #[tokio::test]
    async fn missing_capacity_is_not_found() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(matches!(tx.lock_capacity().await, Err(StoreError::NotFound(_))));
    }
}
