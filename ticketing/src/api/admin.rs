//! Operator endpoints.
//!
//! Every handler takes an [`AdminOperator`], so requests need
//! `Authorization: Bearer <ADMIN_TOKEN>` and an `X-Operator-Id` header.
//!
//! - POST /api/admin/keys - Issue keys
//! - POST /api/admin/keys/:id/cancel - Cancel a key
//! - GET /api/admin/keys/:id/invitations - Cascade minted from a key
//! - POST /api/admin/purchases/:id/manual-fix - Recover a lost callback
//! - POST /api/admin/purchases/:id/abandon - Fail a pending purchase
//! - GET /api/admin/purchases/:id/audit - Audit trail
//! - GET /api/admin/capacity - Capacity row
//! - POST /api/admin/capacity/preview - Preview a settings change
//! - PUT /api/admin/capacity - Apply a settings change
//! - POST /api/admin/maintenance/cancel-beyond-capacity - Run the capacity sweep

use crate::engine::ManualFixOutcome;
use crate::server::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use keygate_core::{
    AuditEntry, CapacitySettings, CapacityState, DateTime, ImpactReport, Key, KeyId, KeyKind,
    Purchase, PurchaseId, Utc,
};
use keygate_web::{AdminOperator, WebResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for key issuance.
#[derive(Debug, Deserialize)]
pub struct IssueKeysRequest {
    /// Kind of key to issue
    pub kind: KeyKind,
    /// How many
    pub count: u32,
    /// Optional expiry
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Response for key issuance.
#[derive(Debug, Serialize)]
pub struct IssueKeysResponse {
    /// Number of keys issued
    pub issued: usize,
    /// The new keys
    pub keys: Vec<Key>,
}

/// Request body for key cancellation.
#[derive(Debug, Deserialize)]
pub struct CancelKeyRequest {
    /// Why the key is cancelled
    pub reason: String,
}

/// Response for the capacity sweep.
#[derive(Debug, Serialize)]
pub struct BulkCancelResponse {
    /// Keys cancelled
    pub cancelled: usize,
}

/// Issue keys.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/admin/keys \
///   -H "Authorization: Bearer $ADMIN_TOKEN" -H "X-Operator-Id: ops@example.com" \
///   -H "Content-Type: application/json" \
///   -d '{"kind": "normal", "count": 50}'
/// ```
pub async fn issue_keys(
    State(state): State<AppState>,
    AdminOperator(operator): AdminOperator,
    Json(request): Json<IssueKeysRequest>,
) -> WebResult<(StatusCode, Json<IssueKeysResponse>)> {
    let keys = state
        .engine
        .issue_keys(request.kind, request.count, request.expires_at, &operator)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(IssueKeysResponse {
            issued: keys.len(),
            keys,
        }),
    ))
}

/// Cancel a key.
pub async fn cancel_key(
    State(state): State<AppState>,
    AdminOperator(operator): AdminOperator,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelKeyRequest>,
) -> WebResult<Json<Key>> {
    let key = state
        .engine
        .cancel_key(KeyId::from_uuid(id), &request.reason, &operator)
        .await?;
    Ok(Json(key))
}

/// Invitation keys minted from a key.
pub async fn invitation_keys(
    State(state): State<AppState>,
    AdminOperator(_): AdminOperator,
    Path(id): Path<Uuid>,
) -> WebResult<Json<Vec<Key>>> {
    Ok(Json(state.engine.invitation_keys(KeyId::from_uuid(id)).await?))
}

/// Recover a purchase whose callback was lost.
pub async fn manual_fix(
    State(state): State<AppState>,
    AdminOperator(operator): AdminOperator,
    Path(id): Path<Uuid>,
) -> WebResult<Json<ManualFixOutcome>> {
    let outcome = state
        .engine
        .manual_fix(PurchaseId::from_uuid(id), &operator)
        .await?;
    Ok(Json(outcome))
}

/// Fail a pending purchase so its key can be booked again.
pub async fn abandon_purchase(
    State(state): State<AppState>,
    AdminOperator(operator): AdminOperator,
    Path(id): Path<Uuid>,
) -> WebResult<Json<Purchase>> {
    let purchase = state
        .engine
        .abandon_pending(PurchaseId::from_uuid(id), &operator)
        .await?;
    Ok(Json(purchase))
}

/// Audit trail of a purchase.
pub async fn audit_trail(
    State(state): State<AppState>,
    AdminOperator(_): AdminOperator,
    Path(id): Path<Uuid>,
) -> WebResult<Json<Vec<AuditEntry>>> {
    Ok(Json(state.engine.audit_trail(PurchaseId::from_uuid(id)).await?))
}

/// Current capacity row.
pub async fn get_capacity(
    State(state): State<AppState>,
    AdminOperator(_): AdminOperator,
) -> WebResult<Json<CapacityState>> {
    Ok(Json(state.engine.capacity_snapshot().await?))
}

/// Preview a settings change.
pub async fn preview_capacity(
    State(state): State<AppState>,
    AdminOperator(_): AdminOperator,
    Json(settings): Json<CapacitySettings>,
) -> WebResult<Json<ImpactReport>> {
    Ok(Json(state.engine.preview_impact(&settings).await?))
}

/// Apply a settings change.
pub async fn update_capacity(
    State(state): State<AppState>,
    AdminOperator(operator): AdminOperator,
    Json(settings): Json<CapacitySettings>,
) -> WebResult<Json<CapacityState>> {
    Ok(Json(
        state
            .engine
            .update_capacity_settings(settings, &operator)
            .await?,
    ))
}

/// Run the capacity sweep now.
pub async fn cancel_beyond_capacity(
    State(state): State<AppState>,
    AdminOperator(operator): AdminOperator,
) -> WebResult<Json<BulkCancelResponse>> {
    let cancelled = state
        .engine
        .bulk_cancel_unused_beyond_capacity(&operator)
        .await?;
    Ok(Json(BulkCancelResponse { cancelled }))
}
