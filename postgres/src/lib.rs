//! `PostgreSQL` ledger store for Keygate.
//!
//! Implements [`LedgerStore`] on a sqlx connection pool. Each
//! [`LedgerTransaction`] owns one `sqlx::Transaction`, and every `lock_*`
//! method issues `SELECT ... FOR UPDATE`, so the engine's lock order
//! (capacity row, then purchase, then keys) maps directly onto row locks.
//!
//! The schema enforces the invariants the engine relies on as a second line
//! of defence:
//!
//! - `keys.code` is unique across every status, so cancelled codes are never reissued
//! - a partial unique index allows one `pending`/`completed` purchase per key
//! - a `used` key must carry its purchaser and timestamp
//!
//! # Example
//!
//! ```no_run
//! use keygate_postgres::PostgresLedgerStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresLedgerStore::new("postgres://localhost/keygate").await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;

use keygate_core::store::{LedgerStore, LedgerTransaction, StoreFuture};
use keygate_core::{
    AuditEntry, CapacityState, Key, KeyCode, KeyId, PaymentReference, Purchase, PurchaseId,
    StoreError,
};
use rows::{db_error, Lock};
use sqlx::{PgPool, Postgres, Transaction};

/// `PostgreSQL`-backed [`LedgerStore`]
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Connect to the database at `database_url` with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(db_error)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for health checks.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        tracing::info!("Ledger migrations applied");
        Ok(())
    }

    /// Insert the capacity row if none exists yet.
    ///
    /// Returns `true` if the row was created. An existing row is left alone
    /// so restarts never reset the confirmed count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be reached.
    pub async fn seed_capacity(&self, initial: &CapacityState) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        if rows::capacity(&mut *tx, Lock::Update).await?.is_some() {
            return Ok(false);
        }
        rows::save_capacity(&mut *tx, initial).await?;
        tx.commit().await.map_err(db_error)?;

        tracing::info!(
            max_capacity = initial.settings.max_capacity,
            tiers = initial.settings.tiers.len(),
            "Seeded capacity state"
        );
        Ok(true)
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn LedgerTransaction>> {
        Box::pin(async move {
            let tx = self.pool.begin().await.map_err(db_error)?;
            let tx: Box<dyn LedgerTransaction> = Box::new(PostgresTransaction { tx });
            Ok(tx)
        })
    }

    fn capacity_snapshot(&self) -> StoreFuture<'_, Option<CapacityState>> {
        Box::pin(rows::capacity(&self.pool, Lock::None))
    }

    fn purchase(&self, id: PurchaseId) -> StoreFuture<'_, Option<Purchase>> {
        Box::pin(rows::purchase_by_id(&self.pool, id, Lock::None))
    }

    fn key(&self, id: KeyId) -> StoreFuture<'_, Option<Key>> {
        Box::pin(rows::key_by_id(&self.pool, id, Lock::None))
    }

    fn key_by_code(&self, code: KeyCode) -> StoreFuture<'_, Option<Key>> {
        Box::pin(async move { rows::key_by_code(&self.pool, &code, Lock::None).await })
    }

    fn invitation_keys(&self, parent: KeyId) -> StoreFuture<'_, Vec<Key>> {
        Box::pin(rows::invitation_keys(&self.pool, parent))
    }

    fn pending_holds(&self) -> StoreFuture<'_, u32> {
        Box::pin(rows::pending_holds(&self.pool))
    }

    fn audit_trail(&self, purchase: PurchaseId) -> StoreFuture<'_, Vec<AuditEntry>> {
        Box::pin(rows::audit_trail(&self.pool, purchase))
    }
}

/// One database transaction. Dropping it without commit rolls back.
struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl LedgerTransaction for PostgresTransaction {
    fn lock_capacity(&mut self) -> StoreFuture<'_, CapacityState> {
        Box::pin(async move {
            rows::capacity(&mut *self.tx, Lock::Update)
                .await?
                .ok_or_else(|| StoreError::NotFound("capacity state".to_string()))
        })
    }

    fn save_capacity(&mut self, state: CapacityState) -> StoreFuture<'_, ()> {
        Box::pin(async move { rows::save_capacity(&mut *self.tx, &state).await })
    }

    fn lock_key_by_code(&mut self, code: KeyCode) -> StoreFuture<'_, Option<Key>> {
        Box::pin(async move { rows::key_by_code(&mut *self.tx, &code, Lock::Update).await })
    }

    fn lock_key(&mut self, id: KeyId) -> StoreFuture<'_, Option<Key>> {
        Box::pin(async move { rows::key_by_id(&mut *self.tx, id, Lock::Update).await })
    }

    fn lock_active_keys(&mut self) -> StoreFuture<'_, Vec<Key>> {
        Box::pin(async move { rows::active_keys(&mut *self.tx).await })
    }

    fn code_exists(&mut self, code: KeyCode) -> StoreFuture<'_, bool> {
        Box::pin(async move { rows::code_exists(&mut *self.tx, &code).await })
    }

    fn insert_key(&mut self, key: Key) -> StoreFuture<'_, ()> {
        Box::pin(async move { rows::insert_key(&mut *self.tx, &key).await })
    }

    fn update_key(&mut self, key: Key) -> StoreFuture<'_, ()> {
        Box::pin(async move { rows::update_key(&mut *self.tx, &key).await })
    }

    fn purchases_for_key(&mut self, key: KeyId) -> StoreFuture<'_, Vec<Purchase>> {
        Box::pin(async move { rows::purchases_for_key(&mut *self.tx, key).await })
    }

    fn lock_purchase(&mut self, id: PurchaseId) -> StoreFuture<'_, Option<Purchase>> {
        Box::pin(async move { rows::purchase_by_id(&mut *self.tx, id, Lock::Update).await })
    }

    fn lock_purchase_by_reference(
        &mut self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Option<Purchase>> {
        Box::pin(async move { rows::purchase_by_reference(&mut *self.tx, &reference).await })
    }

    fn count_pending_holds(&mut self) -> StoreFuture<'_, u32> {
        Box::pin(async move { rows::pending_holds(&mut *self.tx).await })
    }

    fn reference_exists(&mut self, reference: PaymentReference) -> StoreFuture<'_, bool> {
        Box::pin(async move { rows::reference_exists(&mut *self.tx, &reference).await })
    }

    fn insert_purchase(&mut self, purchase: Purchase) -> StoreFuture<'_, ()> {
        Box::pin(async move { rows::insert_purchase(&mut *self.tx, &purchase).await })
    }

    fn update_purchase(&mut self, purchase: Purchase) -> StoreFuture<'_, ()> {
        Box::pin(async move { rows::update_purchase(&mut *self.tx, &purchase).await })
    }

    fn append_audit(&mut self, entry: AuditEntry) -> StoreFuture<'_, ()> {
        Box::pin(async move { rows::append_audit(&mut *self.tx, &entry).await })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { self.tx.commit().await.map_err(db_error) })
    }
}
