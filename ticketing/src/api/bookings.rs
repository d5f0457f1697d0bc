//! Booking endpoints.
//!
//! - POST /api/bookings - Start a booking with a key
//! - GET /api/bookings/:id - Poll a purchase from the payment return page

use crate::engine::{Booking, BookingRequest};
use crate::server::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use keygate_core::{Money, PaymentStatus, PurchaseId, TierName};
use keygate_web::{CorrelationId, WebResult};
use serde::Serialize;
use uuid::Uuid;

/// Purchase state safe to show on the return page.
#[derive(Debug, Serialize)]
pub struct PurchaseStatusResponse {
    /// Purchase id
    pub purchase_id: PurchaseId,
    /// Payment status
    pub status: PaymentStatus,
    /// Tier the price was frozen at
    pub tier: TierName,
    /// Amount charged
    pub total_amount: Money,
    /// Whether the invitation cascade has been minted
    pub invitations_generated: bool,
    /// Gateway reason when the payment failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// A failed payment can be retried with the same key
    pub can_retry: bool,
}

/// Start a booking.
///
/// Answers `201` with the purchase. Paid bookings carry `payment_url`;
/// zero-amount bookings come back already completed with their cascade.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/bookings \
///   -H "Content-Type: application/json" \
///   -d '{"code": "ABCD-EFGH", "contact": {"name": "Ada", "email": "ada@example.com", "phone": "600123456"}, "tier": "early", "addons": ["polo"]}'
/// ```
pub async fn create_booking(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    Json(request): Json<BookingRequest>,
) -> WebResult<(StatusCode, Json<Booking>)> {
    let booking = state.engine.start_booking(request).await?;
    tracing::debug!(
        correlation_id = %correlation_id,
        purchase_id = %booking.purchase.id,
        status = %booking.purchase.payment_status,
        "Booking accepted"
    );
    Ok((StatusCode::CREATED, Json(booking)))
}

/// Current status of a purchase.
pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<Json<PurchaseStatusResponse>> {
    let purchase = state
        .engine
        .purchase_status(PurchaseId::from_uuid(id))
        .await?;

    Ok(Json(PurchaseStatusResponse {
        purchase_id: purchase.id,
        status: purchase.payment_status,
        tier: purchase.price.tier.clone(),
        total_amount: purchase.total_amount(),
        invitations_generated: purchase.invitations_generated,
        can_retry: purchase.payment_status == PaymentStatus::Failed,
        failure_reason: purchase.failure_reason,
    }))
}
