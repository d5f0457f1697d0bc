//! Health check endpoints.
//!
//! Used by load balancers and orchestrators. Liveness never touches
//! dependencies; readiness asks the application state whether its backing
//! services answer.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

/// Future returned by [`ReadinessProbe::check_ready`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// Dependency check behind `GET /ready`.
pub trait ReadinessProbe {
    /// Resolve to `Err(reason)` if a dependency is unreachable.
    fn check_ready(&self) -> ProbeFuture<'_>;
}

/// Health response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// `ok` or `unavailable`
    pub status: &'static str,
    /// Crate version serving the request
    pub version: &'static str,
    /// Reason the service is not ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Liveness check.
///
/// ```text
/// GET /health
/// {"status": "ok", "version": "0.1.0"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            reason: None,
        }),
    )
}

/// Readiness check.
///
/// 200 when the probe succeeds, 503 with the reason otherwise.
pub async fn readiness_check<S>(State(state): State<S>) -> (StatusCode, Json<HealthResponse>)
where
    S: ReadinessProbe + Clone + Send + Sync + 'static,
{
    match state.check_ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
                reason: None,
            }),
        ),
        Err(reason) => {
            tracing::warn!(reason = %reason, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                    reason: Some(reason),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Probe(Option<&'static str>);

    impl ReadinessProbe for Probe {
        fn check_ready(&self) -> ProbeFuture<'_> {
            let result = self.0.map_or(Ok(()), |reason| Err(reason.to_string()));
            Box::pin(async move { result })
        }
    }

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, Json(body)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert!(!body.version.is_empty());
    }

    #[tokio::test]
    async fn test_ready_when_probe_succeeds() {
        let (status, Json(body)) = readiness_check(State(Probe(None))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.reason, None);
    }

    #[tokio::test]
    async fn test_unavailable_when_probe_fails() {
        let (status, Json(body)) = readiness_check(State(Probe(Some("database unreachable")))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "unavailable");
        assert_eq!(body.reason.as_deref(), Some("database unreachable"));
    }
}
