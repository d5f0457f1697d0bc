//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: request correlation id for log lines
//! - [`AdminOperator`]: authenticated administrator behind the operator routes
//!
//! # Examples
//!
//! ```ignore
//! async fn cancel_key(
//!     State(state): State<AppState>,
//!     AdminOperator(operator): AdminOperator,
//!     correlation_id: CorrelationId,
//!     Path(id): Path<Uuid>,
//! ) -> Result<Json<Key>, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, operator = %operator, "Cancelling key");
//!     // ...
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use keygate_core::OperatorId;
use uuid::Uuid;

/// Header naming the administrator performing an operator action.
pub const OPERATOR_ID_HEADER: &str = "X-Operator-Id";

/// Correlation ID for request tracing.
///
/// Taken from the request extensions when the correlation middleware ran,
/// otherwise from the `X-Correlation-ID` header, otherwise freshly generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Source of the shared administrator token.
///
/// Implemented by the application state so [`AdminOperator`] can check the
/// bearer token without knowing the state's shape.
pub trait AdminCredentials {
    /// Token administrators present as `Authorization: Bearer <token>`
    fn admin_token(&self) -> &str;
}

/// Authenticated administrator.
///
/// Requires `Authorization: Bearer <token>` matching
/// [`AdminCredentials::admin_token`] and a non-blank `X-Operator-Id` header
/// naming who is acting. An empty configured token disables admin access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminOperator(pub OperatorId);

#[async_trait]
impl<S> FromRequestParts<S> for AdminOperator
where
    S: AdminCredentials + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let expected = state.admin_token();
        if expected.is_empty() {
            return Err(AppError::unauthorized("Admin access is disabled"));
        }

        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;

        if !constant_time_eq::constant_time_eq(presented.trim().as_bytes(), expected.as_bytes()) {
            tracing::warn!(path = %parts.uri.path(), "Rejected admin request with bad token");
            return Err(AppError::unauthorized("Invalid admin token"));
        }

        let operator = parts
            .headers
            .get(OPERATOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let operator = OperatorId::new(operator)
            .map_err(|_| AppError::bad_request(format!("{OPERATOR_ID_HEADER} header is required")))?;

        Ok(Self(operator))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    struct TestState(&'static str);

    impl AdminCredentials for TestState {
        fn admin_token(&self) -> &str {
            self.0
        }
    }

    async fn admin(state: &TestState, token: Option<&str>, operator: Option<&str>) -> Result<AdminOperator, AppError> {
        let mut builder = Request::builder().uri("/api/admin/keys");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(operator) = operator {
            builder = builder.header(OPERATOR_ID_HEADER, operator);
        }
        let (mut parts, ()) = builder.body(()).expect("Valid request").into_parts();
        AdminOperator::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, uuid.to_string())
            .body(())
            .expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_correlation_id_prefers_extension() {
        let uuid = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        parts.extensions.insert(CorrelationId(uuid));
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_admin_operator_accepted() {
        let state = TestState("s3cret");
        let AdminOperator(operator) = admin(&state, Some("s3cret"), Some("ops@example.com"))
            .await
            .unwrap();
        assert_eq!(operator.as_str(), "ops@example.com");
    }

    #[tokio::test]
    async fn test_admin_operator_rejections() {
        let state = TestState("s3cret");

        let err = admin(&state, None, Some("ops")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = admin(&state, Some("wrong"), Some("ops")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = admin(&state, Some("s3cret"), None).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let disabled = TestState("");
        let err = admin(&disabled, Some(""), Some("ops")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
