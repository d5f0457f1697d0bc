//! Payment gateway webhook.
//!
//! - POST /api/gateway/callback - Signed payment result
//!
//! Always answers `200` with a [`CallbackAck`] so the gateway stops
//! retrying; anything that needs follow-up is logged by the engine and
//! recovered through manual fix.

use crate::engine::CallbackAck;
use crate::server::state::AppState;
use axum::{body::Bytes, extract::State, http::StatusCode, Json};

/// Receive a gateway callback.
pub async fn callback(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<CallbackAck>) {
    let ack = state.engine.handle_gateway_callback(&body).await;
    (StatusCode::OK, Json(ack))
}
