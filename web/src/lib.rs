//! Axum integration for the Keygate engine.
//!
//! The engine stays transport-agnostic; this crate is the thin shell that
//! turns its results into HTTP:
//!
//! - [`AppError`] maps [`keygate_core::EngineError`] onto status codes and a
//!   stable `{code, message}` body
//! - [`AdminOperator`] authenticates operator routes
//! - [`request_context_layer`] tags every request with a correlation id and a span
//! - [`handlers::health`] provides liveness and readiness endpoints
//!
//! # Example
//!
//! ```ignore
//! async fn purchase_status(
//!     State(state): State<AppState>,
//!     Path(id): Path<Uuid>,
//! ) -> WebResult<Json<Purchase>> {
//!     Ok(Json(state.engine.purchase_status(PurchaseId::from_uuid(id)).await?))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use extractors::{AdminCredentials, AdminOperator, CorrelationId, OPERATOR_ID_HEADER};
pub use handlers::health::{health_check, readiness_check, ReadinessProbe};
pub use middleware::{request_context_layer, CORRELATION_ID_HEADER};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
