//! Row mapping and the queries shared by pool reads and transactions.
//!
//! Every query function is generic over [`PgExecutor`] so the committed
//! reads on the store and the locking reads inside a transaction run the same
//! SQL, differing only in the trailing `FOR UPDATE`.

use chrono::{DateTime, Utc};
use keygate_core::{
    AuditAction, AuditEntry, CapacitySettings, CapacityState, CompletionSource, Contact, Key,
    KeyCode, KeyId, KeyKind, KeyStatus, OperatorId, PaymentReference, PaymentStatus,
    PriceSnapshot, Purchase, PurchaseId, StoreError,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgExecutor, Row};
use uuid::Uuid;

const KEY_COLUMNS: &str = "id, code, kind, parent_key_id, status, used_by, created_at, \
     created_by, used_at, cancelled_at, cancelled_by, cancellation_reason, expires_at";

const PURCHASE_COLUMNS: &str = "id, key_id, contact, price, payment_status, payment_reference, \
     gateway_transaction_id, invitations_generated, failure_code, failure_reason, completed_by, \
     created_at, updated_at, completed_at";

/// Whether a select takes row locks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lock {
    /// Plain read of committed data
    None,
    /// `SELECT ... FOR UPDATE`
    Update,
}

impl Lock {
    const fn suffix(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Update => " FOR UPDATE",
        }
    }
}

/// Map a driver error, surfacing uniqueness and serialisation failures as conflicts
pub(crate) fn db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            metrics::counter!("keygate_store_conflicts_total").increment(1);
            return StoreError::Conflict(db.message().to_string());
        }
        // serialization_failure, deadlock_detected
        if matches!(db.code().as_deref(), Some("40001" | "40P01")) {
            metrics::counter!("keygate_store_conflicts_total").increment(1);
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Database(err.to_string())
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Serialization(err.to_string())
}

fn to_i32(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Serialization(format!("{what} {value} out of range")))
}

fn to_i64(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!("{what} {value} out of range")))
}

// ============================================================================
// Keys
// ============================================================================

fn key_from_row(row: &PgRow) -> Result<Key, StoreError> {
    let code: String = row.try_get("code").map_err(decode_error)?;
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let created_by: String = row.try_get("created_by").map_err(decode_error)?;
    let cancelled_by: Option<String> = row.try_get("cancelled_by").map_err(decode_error)?;
    let used_by: Option<Json<Contact>> = row.try_get("used_by").map_err(decode_error)?;
    let parent: Option<Uuid> = row.try_get("parent_key_id").map_err(decode_error)?;

    Ok(Key {
        id: KeyId::from_uuid(row.try_get("id").map_err(decode_error)?),
        code: KeyCode::parse(&code).map_err(|e| StoreError::Serialization(e.to_string()))?,
        kind: KeyKind::parse(&kind)
            .ok_or_else(|| StoreError::Serialization(format!("Invalid key kind: {kind}")))?,
        parent_key_id: parent.map(KeyId::from_uuid),
        status: KeyStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("Invalid key status: {status}")))?,
        used_by: used_by.map(|json| json.0),
        created_at: row.try_get("created_at").map_err(decode_error)?,
        created_by: OperatorId::new(created_by).map_err(|e| StoreError::Serialization(e.to_string()))?,
        used_at: row.try_get("used_at").map_err(decode_error)?,
        cancelled_at: row.try_get("cancelled_at").map_err(decode_error)?,
        cancelled_by: cancelled_by
            .map(OperatorId::new)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        cancellation_reason: row.try_get("cancellation_reason").map_err(decode_error)?,
        expires_at: row.try_get("expires_at").map_err(decode_error)?,
    })
}

pub(crate) async fn key_by_id<'e, E: PgExecutor<'e>>(
    executor: E,
    id: KeyId,
    lock: Lock,
) -> Result<Option<Key>, StoreError> {
    let sql = format!("SELECT {KEY_COLUMNS} FROM keys WHERE id = $1{}", lock.suffix());
    let row = sqlx::query(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(executor)
        .await
        .map_err(db_error)?;
    row.as_ref().map(key_from_row).transpose()
}

pub(crate) async fn key_by_code<'e, E: PgExecutor<'e>>(
    executor: E,
    code: &KeyCode,
    lock: Lock,
) -> Result<Option<Key>, StoreError> {
    let sql = format!("SELECT {KEY_COLUMNS} FROM keys WHERE code = $1{}", lock.suffix());
    let row = sqlx::query(&sql)
        .bind(code.as_str())
        .fetch_optional(executor)
        .await
        .map_err(db_error)?;
    row.as_ref().map(key_from_row).transpose()
}

pub(crate) async fn active_keys<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<Key>, StoreError> {
    let sql = format!(
        "SELECT {KEY_COLUMNS} FROM keys WHERE status = 'active' ORDER BY created_at, code FOR UPDATE"
    );
    let rows = sqlx::query(&sql).fetch_all(executor).await.map_err(db_error)?;
    rows.iter().map(key_from_row).collect()
}

pub(crate) async fn invitation_keys<'e, E: PgExecutor<'e>>(
    executor: E,
    parent: KeyId,
) -> Result<Vec<Key>, StoreError> {
    let sql = format!(
        "SELECT {KEY_COLUMNS} FROM keys WHERE parent_key_id = $1 AND kind = 'invitation' \
         ORDER BY created_at, code"
    );
    let rows = sqlx::query(&sql)
        .bind(*parent.as_uuid())
        .fetch_all(executor)
        .await
        .map_err(db_error)?;
    rows.iter().map(key_from_row).collect()
}

pub(crate) async fn code_exists<'e, E: PgExecutor<'e>>(
    executor: E,
    code: &KeyCode,
) -> Result<bool, StoreError> {
    let row: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM keys WHERE code = $1)")
        .bind(code.as_str())
        .fetch_one(executor)
        .await
        .map_err(db_error)?;
    Ok(row.0)
}

pub(crate) async fn insert_key<'e, E: PgExecutor<'e>>(executor: E, key: &Key) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO keys (
            id, code, kind, parent_key_id, status, used_by, created_at, created_by,
            used_at, cancelled_at, cancelled_by, cancellation_reason, expires_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ",
    )
    .bind(*key.id.as_uuid())
    .bind(key.code.as_str())
    .bind(key.kind.as_str())
    .bind(key.parent_key_id.map(|id| *id.as_uuid()))
    .bind(key.status.as_str())
    .bind(key.used_by.as_ref().map(Json))
    .bind(key.created_at)
    .bind(key.created_by.as_str())
    .bind(key.used_at)
    .bind(key.cancelled_at)
    .bind(key.cancelled_by.as_ref().map(OperatorId::as_str))
    .bind(key.cancellation_reason.as_deref())
    .bind(key.expires_at)
    .execute(executor)
    .await
    .map_err(db_error)?;
    Ok(())
}

pub(crate) async fn update_key<'e, E: PgExecutor<'e>>(executor: E, key: &Key) -> Result<(), StoreError> {
    let result = sqlx::query(
        r"
        UPDATE keys
        SET status = $2, used_by = $3, used_at = $4, cancelled_at = $5,
            cancelled_by = $6, cancellation_reason = $7, expires_at = $8
        WHERE id = $1
        ",
    )
    .bind(*key.id.as_uuid())
    .bind(key.status.as_str())
    .bind(key.used_by.as_ref().map(Json))
    .bind(key.used_at)
    .bind(key.cancelled_at)
    .bind(key.cancelled_by.as_ref().map(OperatorId::as_str))
    .bind(key.cancellation_reason.as_deref())
    .bind(key.expires_at)
    .execute(executor)
    .await
    .map_err(db_error)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("key {}", key.id)));
    }
    Ok(())
}

// ============================================================================
// Purchases
// ============================================================================

fn purchase_from_row(row: &PgRow) -> Result<Purchase, StoreError> {
    let status: String = row.try_get("payment_status").map_err(decode_error)?;
    let reference: Option<String> = row.try_get("payment_reference").map_err(decode_error)?;
    let contact: Json<Contact> = row.try_get("contact").map_err(decode_error)?;
    let price: Json<PriceSnapshot> = row.try_get("price").map_err(decode_error)?;
    let completed_by: Option<Json<CompletionSource>> =
        row.try_get("completed_by").map_err(decode_error)?;

    Ok(Purchase {
        id: PurchaseId::from_uuid(row.try_get("id").map_err(decode_error)?),
        key_id: KeyId::from_uuid(row.try_get("key_id").map_err(decode_error)?),
        contact: contact.0,
        price: price.0,
        payment_status: PaymentStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("Invalid payment status: {status}")))?,
        payment_reference: reference
            .as_deref()
            .map(PaymentReference::parse)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        gateway_transaction_id: row.try_get("gateway_transaction_id").map_err(decode_error)?,
        invitations_generated: row.try_get("invitations_generated").map_err(decode_error)?,
        failure_code: row.try_get("failure_code").map_err(decode_error)?,
        failure_reason: row.try_get("failure_reason").map_err(decode_error)?,
        completed_by: completed_by.map(|json| json.0),
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        completed_at: row.try_get("completed_at").map_err(decode_error)?,
    })
}

pub(crate) async fn purchase_by_id<'e, E: PgExecutor<'e>>(
    executor: E,
    id: PurchaseId,
    lock: Lock,
) -> Result<Option<Purchase>, StoreError> {
    let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1{}", lock.suffix());
    let row = sqlx::query(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(executor)
        .await
        .map_err(db_error)?;
    row.as_ref().map(purchase_from_row).transpose()
}

pub(crate) async fn purchase_by_reference<'e, E: PgExecutor<'e>>(
    executor: E,
    reference: &PaymentReference,
) -> Result<Option<Purchase>, StoreError> {
    let sql = format!(
        "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE payment_reference = $1 FOR UPDATE"
    );
    let row = sqlx::query(&sql)
        .bind(reference.as_str())
        .fetch_optional(executor)
        .await
        .map_err(db_error)?;
    row.as_ref().map(purchase_from_row).transpose()
}

pub(crate) async fn purchases_for_key<'e, E: PgExecutor<'e>>(
    executor: E,
    key: KeyId,
) -> Result<Vec<Purchase>, StoreError> {
    let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE key_id = $1 ORDER BY created_at");
    let rows = sqlx::query(&sql)
        .bind(*key.as_uuid())
        .fetch_all(executor)
        .await
        .map_err(db_error)?;
    rows.iter().map(purchase_from_row).collect()
}

pub(crate) async fn pending_holds<'e, E: PgExecutor<'e>>(executor: E) -> Result<u32, StoreError> {
    let row: (i64,) =
        sqlx::query_as("SELECT count(*) FROM purchases WHERE payment_status = 'pending'")
            .fetch_one(executor)
            .await
            .map_err(db_error)?;
    u32::try_from(row.0).map_err(|e| StoreError::Serialization(format!("pending hold count: {e}")))
}

pub(crate) async fn reference_exists<'e, E: PgExecutor<'e>>(
    executor: E,
    reference: &PaymentReference,
) -> Result<bool, StoreError> {
    let row: (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM purchases WHERE payment_reference = $1)")
            .bind(reference.as_str())
            .fetch_one(executor)
            .await
            .map_err(db_error)?;
    Ok(row.0)
}

pub(crate) async fn insert_purchase<'e, E: PgExecutor<'e>>(
    executor: E,
    purchase: &Purchase,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO purchases (
            id, key_id, contact, price, tier, total_amount, payment_status, payment_reference,
            gateway_transaction_id, invitations_generated, failure_code, failure_reason,
            completed_by, created_at, updated_at, completed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ",
    )
    .bind(*purchase.id.as_uuid())
    .bind(*purchase.key_id.as_uuid())
    .bind(Json(&purchase.contact))
    .bind(Json(&purchase.price))
    .bind(purchase.price.tier.as_str())
    .bind(to_i64(purchase.total_amount().minor(), "total amount")?)
    .bind(purchase.payment_status.as_str())
    .bind(purchase.payment_reference.as_ref().map(PaymentReference::as_str))
    .bind(purchase.gateway_transaction_id.as_deref())
    .bind(purchase.invitations_generated)
    .bind(purchase.failure_code.as_deref())
    .bind(purchase.failure_reason.as_deref())
    .bind(purchase.completed_by.as_ref().map(Json))
    .bind(purchase.created_at)
    .bind(purchase.updated_at)
    .bind(purchase.completed_at)
    .execute(executor)
    .await
    .map_err(db_error)?;
    Ok(())
}

pub(crate) async fn update_purchase<'e, E: PgExecutor<'e>>(
    executor: E,
    purchase: &Purchase,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r"
        UPDATE purchases
        SET payment_status = $2, gateway_transaction_id = $3, invitations_generated = $4,
            failure_code = $5, failure_reason = $6, completed_by = $7,
            updated_at = $8, completed_at = $9
        WHERE id = $1
        ",
    )
    .bind(*purchase.id.as_uuid())
    .bind(purchase.payment_status.as_str())
    .bind(purchase.gateway_transaction_id.as_deref())
    .bind(purchase.invitations_generated)
    .bind(purchase.failure_code.as_deref())
    .bind(purchase.failure_reason.as_deref())
    .bind(purchase.completed_by.as_ref().map(Json))
    .bind(purchase.updated_at)
    .bind(purchase.completed_at)
    .execute(executor)
    .await
    .map_err(db_error)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("purchase {}", purchase.id)));
    }
    Ok(())
}

// ============================================================================
// Capacity
// ============================================================================

pub(crate) async fn capacity<'e, E: PgExecutor<'e>>(
    executor: E,
    lock: Lock,
) -> Result<Option<CapacityState>, StoreError> {
    let sql = format!(
        "SELECT confirmed, settings, updated_at FROM capacity_state WHERE id = 1{}",
        lock.suffix()
    );
    let row = sqlx::query(&sql)
        .fetch_optional(executor)
        .await
        .map_err(db_error)?;

    let Some(row) = row else {
        return Ok(None);
    };
    let confirmed: i32 = row.try_get("confirmed").map_err(decode_error)?;
    let settings: Json<CapacitySettings> = row.try_get("settings").map_err(decode_error)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode_error)?;

    Ok(Some(CapacityState {
        confirmed: u32::try_from(confirmed)
            .map_err(|_| StoreError::Serialization(format!("negative confirmed count {confirmed}")))?,
        settings: settings.0,
        updated_at,
    }))
}

pub(crate) async fn save_capacity<'e, E: PgExecutor<'e>>(
    executor: E,
    state: &CapacityState,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO capacity_state (id, confirmed, settings, updated_at)
        VALUES (1, $1, $2, $3)
        ON CONFLICT (id) DO UPDATE
        SET confirmed = EXCLUDED.confirmed,
            settings = EXCLUDED.settings,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(to_i32(state.confirmed, "confirmed count")?)
    .bind(Json(&state.settings))
    .bind(state.updated_at)
    .execute(executor)
    .await
    .map_err(db_error)?;
    Ok(())
}

// ============================================================================
// Audit
// ============================================================================

pub(crate) async fn append_audit<'e, E: PgExecutor<'e>>(
    executor: E,
    entry: &AuditEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO audit_log (at, action, key_id, purchase_id, actor, detail)
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(entry.at)
    .bind(entry.action.as_str())
    .bind(entry.key_id.map(|id| *id.as_uuid()))
    .bind(entry.purchase_id.map(|id| *id.as_uuid()))
    .bind(entry.actor.as_str())
    .bind(Json(&entry.detail))
    .execute(executor)
    .await
    .map_err(db_error)?;
    Ok(())
}

pub(crate) async fn audit_trail<'e, E: PgExecutor<'e>>(
    executor: E,
    purchase: PurchaseId,
) -> Result<Vec<AuditEntry>, StoreError> {
    let rows = sqlx::query(
        "SELECT at, action, key_id, purchase_id, actor, detail FROM audit_log \
         WHERE purchase_id = $1 ORDER BY id",
    )
    .bind(*purchase.as_uuid())
    .fetch_all(executor)
    .await
    .map_err(db_error)?;

    rows.iter()
        .map(|row| {
            let action: String = row.try_get("action").map_err(decode_error)?;
            let actor: String = row.try_get("actor").map_err(decode_error)?;
            let key_id: Option<Uuid> = row.try_get("key_id").map_err(decode_error)?;
            let purchase_id: Option<Uuid> = row.try_get("purchase_id").map_err(decode_error)?;
            let detail: Json<serde_json::Value> = row.try_get("detail").map_err(decode_error)?;
            Ok(AuditEntry {
                at: row.try_get("at").map_err(decode_error)?,
                action: AuditAction::parse(&action)
                    .ok_or_else(|| StoreError::Serialization(format!("Invalid audit action: {action}")))?,
                key_id: key_id.map(KeyId::from_uuid),
                purchase_id: purchase_id.map(PurchaseId::from_uuid),
                actor: OperatorId::new(actor).map_err(|e| StoreError::Serialization(e.to_string()))?,
                detail: detail.0,
            })
        })
        .collect()
}
