//! Transactional store abstraction.
//!
//! A [`LedgerStore`] hands out [`LedgerTransaction`]s. Every write that
//! touches more than one entity happens inside one transaction, and a
//! transaction dropped without [`commit`](LedgerTransaction::commit) rolls
//! back.
//!
//! # Locking
//!
//! `lock_*` methods take a row lock (or the equivalent) that is held until the
//! transaction ends. Callers acquire locks in a fixed order to avoid
//! deadlocks:
//!
//! ```text
//! capacity row  →  purchase  →  key(s)
//! ```
//!
//! The plain reads on [`LedgerStore`] see committed data and never block on
//! writers; reporting and tier previews use them.
//!
//! # Implementations
//!
//! - `PostgresLedgerStore` (in `keygate-postgres`): production
//! - `InMemoryLedgerStore` (in `keygate-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures instead of using `async fn` so the engine can
//! hold `Arc<dyn LedgerStore>` and `Box<dyn LedgerTransaction>`.

use crate::audit::AuditEntry;
use crate::capacity::CapacityState;
use crate::error::StoreError;
use crate::key::Key;
use crate::purchase::Purchase;
use crate::types::{KeyCode, KeyId, PaymentReference, PurchaseId};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store methods
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Shared handle to the ledger
pub trait LedgerStore: Send + Sync {
    /// Open a transaction
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no connection is available.
    fn begin(&self) -> StoreFuture<'_, Box<dyn LedgerTransaction>>;

    /// Committed capacity row, read without locking
    fn capacity_snapshot(&self) -> StoreFuture<'_, Option<CapacityState>>;

    /// Committed purchase
    fn purchase(&self, id: PurchaseId) -> StoreFuture<'_, Option<Purchase>>;

    /// Committed key
    fn key(&self, id: KeyId) -> StoreFuture<'_, Option<Key>>;

    /// Committed key by code
    fn key_by_code(&self, code: KeyCode) -> StoreFuture<'_, Option<Key>>;

    /// Invitation keys minted by the purchase that consumed `parent`
    fn invitation_keys(&self, parent: KeyId) -> StoreFuture<'_, Vec<Key>>;

    /// Committed purchases still awaiting payment
    fn pending_holds(&self) -> StoreFuture<'_, u32>;

    /// Audit rows for a purchase, oldest first
    fn audit_trail(&self, purchase: PurchaseId) -> StoreFuture<'_, Vec<AuditEntry>>;
}

/// One unit of work against the ledger
pub trait LedgerTransaction: Send {
    /// Lock and load the capacity singleton
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if capacity has not been seeded.
    fn lock_capacity(&mut self) -> StoreFuture<'_, CapacityState>;

    /// Create or replace the capacity singleton
    fn save_capacity(&mut self, state: CapacityState) -> StoreFuture<'_, ()>;

    /// Lock and load a key by code
    fn lock_key_by_code(&mut self, code: KeyCode) -> StoreFuture<'_, Option<Key>>;

    /// Lock and load a key by id
    fn lock_key(&mut self, id: KeyId) -> StoreFuture<'_, Option<Key>>;

    /// Lock and load every `active` key
    fn lock_active_keys(&mut self) -> StoreFuture<'_, Vec<Key>>;

    /// Whether `code` was ever issued, whatever the key's status
    fn code_exists(&mut self, code: KeyCode) -> StoreFuture<'_, bool>;

    /// Insert a new key
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the code or id is taken.
    fn insert_key(&mut self, key: Key) -> StoreFuture<'_, ()>;

    /// Persist changes to an existing key
    fn update_key(&mut self, key: Key) -> StoreFuture<'_, ()>;

    /// Every purchase ever made with a key
    fn purchases_for_key(&mut self, key: KeyId) -> StoreFuture<'_, Vec<Purchase>>;

    /// Lock and load a purchase
    fn lock_purchase(&mut self, id: PurchaseId) -> StoreFuture<'_, Option<Purchase>>;

    /// Lock and load a purchase by its gateway reference
    fn lock_purchase_by_reference(
        &mut self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Option<Purchase>>;

    /// Purchases still awaiting payment. Read under the capacity lock, this
    /// plus the confirmed count is every slot spoken for.
    fn count_pending_holds(&mut self) -> StoreFuture<'_, u32>;

    /// Whether a payment reference is already taken
    fn reference_exists(&mut self, reference: PaymentReference) -> StoreFuture<'_, bool>;

    /// Insert a new purchase
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if another purchase already holds the key.
    fn insert_purchase(&mut self, purchase: Purchase) -> StoreFuture<'_, ()>;

    /// Persist changes to an existing purchase
    fn update_purchase(&mut self, purchase: Purchase) -> StoreFuture<'_, ()>;

    /// Append an audit row
    fn append_audit(&mut self, entry: AuditEntry) -> StoreFuture<'_, ()>;

    /// Make every change in this transaction durable
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;
}
