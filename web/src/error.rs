//! HTTP error type.
//!
//! [`AppError`] carries a status, a stable machine-readable code and a
//! user-facing message, and renders as `{"code": ..., "message": ...}`.
//! Engine errors map onto it through `From<EngineError>`, which keeps "sold
//! out" (`SOLD_OUT`) distinct from "invalid code" (`KEY_INVALID`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keygate_core::EngineError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Purchase>, AppError> {
///     let purchase = state.engine.purchase_status(id).await?;
///     Ok(Json(purchase))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    /// Internal error (logged, never exposed to the client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable error code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 401 Unauthorized
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// 404 Not Found
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{resource} with id {id} not found"),
        )
    }

    /// 409 Conflict for a key that cannot be redeemed
    #[must_use]
    pub fn key_invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "KEY_INVALID", message)
    }

    /// 409 Conflict when no capacity is left
    #[must_use]
    pub fn sold_out(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "SOLD_OUT", message)
    }

    /// 409 Conflict for a transition the current status does not allow
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "INVALID_STATE", message)
    }

    /// 422 Unprocessable Entity
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    /// 402 Payment Required, the gateway declined
    #[must_use]
    pub fn payment_declined(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYMENT_REQUIRED, "PAYMENT_DECLINED", message)
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    /// 503 Service Unavailable
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Internal server error"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(message) => Self::validation(message),
            EngineError::KeyInvalid(rejection) => Self::key_invalid(rejection.to_string()),
            EngineError::CapacityExhausted { .. } => Self::sold_out("Tickets are sold out"),
            EngineError::PurchaseNotFound(id) => Self::not_found("Purchase", id),
            EngineError::KeyNotFound(id) => Self::not_found("Key", id),
            EngineError::InvalidState(message) => Self::invalid_state(message),
            EngineError::GatewayRejected { reason, .. } => Self::payment_declined(reason),
            EngineError::DuplicateCallback(reference) => {
                Self::invalid_state(format!("Payment {reference} was already processed"))
            }
            err @ EngineError::Gateway(_) => {
                Self::unavailable("Payment provider is unavailable").with_source(err)
            }
            err @ (EngineError::IntegrityViolation { .. } | EngineError::Store(_)) => {
                Self::internal("An internal error occurred").with_source(err)
            }
        }
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
