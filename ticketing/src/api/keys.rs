//! Key validation endpoint.
//!
//! - POST /api/keys/validate - Check a code before showing the booking form

use crate::engine::KeyView;
use crate::server::state::AppState;
use axum::{extract::State, Json};
use keygate_web::WebResult;
use serde::Deserialize;

/// Request body for key validation.
#[derive(Debug, Deserialize)]
pub struct ValidateKeyRequest {
    /// Code as typed by the customer
    pub code: String,
}

/// Validate a key code.
///
/// Returns the tier, price and add-ons the booking form should show. An
/// unusable code answers `409 KEY_INVALID`; a full event answers
/// `409 SOLD_OUT`.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/keys/validate \
///   -H "Content-Type: application/json" \
///   -d '{"code": "ABCD-EFGH"}'
/// ```
pub async fn validate_key(
    State(state): State<AppState>,
    Json(request): Json<ValidateKeyRequest>,
) -> WebResult<Json<KeyView>> {
    Ok(Json(state.engine.validate_key(&request.code).await?))
}
