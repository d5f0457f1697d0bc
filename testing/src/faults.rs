//! Fault injection for atomicity tests.
//!
//! Wraps another [`LedgerStore`] and makes one chosen transaction call fail
//! with [`StoreError::Injected`] after a given number of successful calls.
//! Every other call is forwarded untouched, so the inner store's rollback is
//! what the test observes.

use keygate_core::store::{LedgerStore, LedgerTransaction, StoreFuture};
use keygate_core::{
    AuditEntry, CapacityState, Key, KeyCode, KeyId, PaymentReference, Purchase, PurchaseId,
    StoreError,
};
use std::sync::{Arc, Mutex, PoisonError};

/// Store call that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPoint {
    /// [`LedgerTransaction::insert_key`] (issue and cascade minting)
    InsertKey,
    /// [`LedgerTransaction::update_key`]
    UpdateKey,
    /// [`LedgerTransaction::insert_purchase`]
    InsertPurchase,
    /// [`LedgerTransaction::update_purchase`]
    UpdatePurchase,
    /// [`LedgerTransaction::save_capacity`]
    SaveCapacity,
    /// [`LedgerTransaction::append_audit`]
    AppendAudit,
    /// [`LedgerTransaction::commit`]
    Commit,
}

#[derive(Debug, Default)]
struct Plan {
    point: Option<FaultPoint>,
    skip: u32,
    tripped: u32,
}

#[derive(Debug, Default)]
struct Faults {
    plan: Mutex<Plan>,
}

impl Faults {
    fn check(&self, point: FaultPoint) -> Result<(), StoreError> {
        let mut plan = self.plan.lock().unwrap_or_else(PoisonError::into_inner);
        if plan.point != Some(point) {
            return Ok(());
        }
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        plan.tripped += 1;
        Err(StoreError::Injected(format!("{point:?}")))
    }
}

/// [`LedgerStore`] decorator that fails on demand
#[derive(Clone)]
pub struct FaultInjectingStore {
    inner: Arc<dyn LedgerStore>,
    faults: Arc<Faults>,
}

impl FaultInjectingStore {
    /// Wrap a store; no faults are armed initially
    #[must_use]
    pub fn new(inner: Arc<dyn LedgerStore>) -> Self {
        Self {
            inner,
            faults: Arc::default(),
        }
    }

    /// Fail every call to `point` after `skip` successful ones
    pub fn fail_after(&self, point: FaultPoint, skip: u32) {
        let mut plan = self.faults.plan.lock().unwrap_or_else(PoisonError::into_inner);
        *plan = Plan {
            point: Some(point),
            skip,
            tripped: 0,
        };
    }

    /// Fail every call to `point`
    pub fn fail_on(&self, point: FaultPoint) {
        self.fail_after(point, 0);
    }

    /// Disarm all faults
    pub fn heal(&self) {
        let mut plan = self.faults.plan.lock().unwrap_or_else(PoisonError::into_inner);
        *plan = Plan::default();
    }

    /// How many calls have been failed since the fault was armed
    #[must_use]
    pub fn tripped(&self) -> u32 {
        self.faults
            .plan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tripped
    }
}

impl LedgerStore for FaultInjectingStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn LedgerTransaction>> {
        Box::pin(async move {
            let inner = self.inner.begin().await?;
            let tx: Box<dyn LedgerTransaction> = Box::new(FaultyTransaction {
                inner,
                faults: Arc::clone(&self.faults),
            });
            Ok(tx)
        })
    }

    fn capacity_snapshot(&self) -> StoreFuture<'_, Option<CapacityState>> {
        self.inner.capacity_snapshot()
    }

    fn purchase(&self, id: PurchaseId) -> StoreFuture<'_, Option<Purchase>> {
        self.inner.purchase(id)
    }

    fn key(&self, id: KeyId) -> StoreFuture<'_, Option<Key>> {
        self.inner.key(id)
    }

    fn key_by_code(&self, code: KeyCode) -> StoreFuture<'_, Option<Key>> {
        self.inner.key_by_code(code)
    }

    fn invitation_keys(&self, parent: KeyId) -> StoreFuture<'_, Vec<Key>> {
        self.inner.invitation_keys(parent)
    }

    fn pending_holds(&self) -> StoreFuture<'_, u32> {
        self.inner.pending_holds()
    }

    fn audit_trail(&self, purchase: PurchaseId) -> StoreFuture<'_, Vec<AuditEntry>> {
        self.inner.audit_trail(purchase)
    }
}

struct FaultyTransaction {
    inner: Box<dyn LedgerTransaction>,
    faults: Arc<Faults>,
}

fn injected<'a, T: Send + 'a>(err: StoreError) -> StoreFuture<'a, T> {
    Box::pin(async move { Err(err) })
}

impl LedgerTransaction for FaultyTransaction {
    fn lock_capacity(&mut self) -> StoreFuture<'_, CapacityState> {
        self.inner.lock_capacity()
    }

    fn save_capacity(&mut self, state: CapacityState) -> StoreFuture<'_, ()> {
        match self.faults.check(FaultPoint::SaveCapacity) {
            Ok(()) => self.inner.save_capacity(state),
            Err(err) => injected(err),
        }
    }

    fn lock_key_by_code(&mut self, code: KeyCode) -> StoreFuture<'_, Option<Key>> {
        self.inner.lock_key_by_code(code)
    }

    fn lock_key(&mut self, id: KeyId) -> StoreFuture<'_, Option<Key>> {
        self.inner.lock_key(id)
    }

    fn lock_active_keys(&mut self) -> StoreFuture<'_, Vec<Key>> {
        self.inner.lock_active_keys()
    }

    fn code_exists(&mut self, code: KeyCode) -> StoreFuture<'_, bool> {
        self.inner.code_exists(code)
    }

    fn insert_key(&mut self, key: Key) -> StoreFuture<'_, ()> {
        match self.faults.check(FaultPoint::InsertKey) {
            Ok(()) => self.inner.insert_key(key),
            Err(err) => injected(err),
        }
    }

    fn update_key(&mut self, key: Key) -> StoreFuture<'_, ()> {
        match self.faults.check(FaultPoint::UpdateKey) {
            Ok(()) => self.inner.update_key(key),
            Err(err) => injected(err),
        }
    }

    fn purchases_for_key(&mut self, key: KeyId) -> StoreFuture<'_, Vec<Purchase>> {
        self.inner.purchases_for_key(key)
    }

    fn lock_purchase(&mut self, id: PurchaseId) -> StoreFuture<'_, Option<Purchase>> {
        self.inner.lock_purchase(id)
    }

    fn lock_purchase_by_reference(
        &mut self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Option<Purchase>> {
        self.inner.lock_purchase_by_reference(reference)
    }

    fn count_pending_holds(&mut self) -> StoreFuture<'_, u32> {
        self.inner.count_pending_holds()
    }

    fn reference_exists(&mut self, reference: PaymentReference) -> StoreFuture<'_, bool> {
        self.inner.reference_exists(reference)
    }

    fn insert_purchase(&mut self, purchase: Purchase) -> StoreFuture<'_, ()> {
        match self.faults.check(FaultPoint::InsertPurchase) {
            Ok(()) => self.inner.insert_purchase(purchase),
            Err(err) => injected(err),
        }
    }

    fn update_purchase(&mut self, purchase: Purchase) -> StoreFuture<'_, ()> {
        match self.faults.check(FaultPoint::UpdatePurchase) {
            Ok(()) => self.inner.update_purchase(purchase),
            Err(err) => injected(err),
        }
    }

    fn append_audit(&mut self, entry: AuditEntry) -> StoreFuture<'_, ()> {
        match self.faults.check(FaultPoint::AppendAudit) {
            Ok(()) => self.inner.append_audit(entry),
            Err(err) => injected(err),
        }
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        match self.faults.check(FaultPoint::Commit) {
            Ok(()) => self.inner.commit(),
            Err(err) => injected(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::memory::InMemoryLedgerStore;
    use keygate_core::{KeyKind, OperatorId};

    fn key(code: &str) -> Key {
        Key::issue(
            KeyId::new(),
            fixtures::code(code),
            KeyKind::Free,
            OperatorId::system(),
            fixtures::epoch(),
            None,
        )
    }

    #[tokio::test]
    async fn fails_after_the_requested_number_of_calls() {
        let memory = InMemoryLedgerStore::new();
        let store = FaultInjectingStore::new(Arc::new(memory.clone()));
        store.fail_after(FaultPoint::InsertKey, 2);

        let mut tx = store.begin().await.unwrap();
        tx.insert_key(key("AAAA-AAAB")).await.unwrap();
        tx.insert_key(key("AAAA-AAAC")).await.unwrap();
        let err = tx.insert_key(key("AAAA-AAAD")).await.unwrap_err();
        assert!(matches!(err, StoreError::Injected(_)));
        drop(tx);

        assert_eq!(store.tripped(), 1);
        assert!(memory.all_keys().await.is_empty());
    }

    #[tokio::test]
    async fn healed_store_forwards_everything() {
        let memory = InMemoryLedgerStore::new();
        let store = FaultInjectingStore::new(Arc::new(memory.clone()));
        store.fail_on(FaultPoint::Commit);
        store.heal();

        let mut tx = store.begin().await.unwrap();
        tx.insert_key(key("AAAA-AAAB")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(memory.all_keys().await.len(), 1);
    }
}
