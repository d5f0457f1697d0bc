//! Router configuration.

use super::state::AppState;
use crate::api::{admin, bookings, gateway, keys};
use axum::{
    routing::{get, post},
    Router,
};
use keygate_web::{health_check, readiness_check, request_context_layer};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// Public routes live under `/api`, operator routes under `/api/admin`.
/// Health checks sit at the root and need no authentication.
pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/keys", post(admin::issue_keys))
        .route("/keys/:id/cancel", post(admin::cancel_key))
        .route("/keys/:id/invitations", get(admin::invitation_keys))
        .route("/purchases/:id/manual-fix", post(admin::manual_fix))
        .route("/purchases/:id/abandon", post(admin::abandon_purchase))
        .route("/purchases/:id/audit", get(admin::audit_trail))
        .route(
            "/capacity",
            get(admin::get_capacity).put(admin::update_capacity),
        )
        .route("/capacity/preview", post(admin::preview_capacity))
        .route(
            "/maintenance/cancel-beyond-capacity",
            post(admin::cancel_beyond_capacity),
        );

    let api_routes = Router::new()
        .route("/keys/validate", post(keys::validate_key))
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/gateway/callback", post(gateway::callback))
        .nest("/admin", admin_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check::<AppState>))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(request_context_layer())
        .with_state(state)
}
