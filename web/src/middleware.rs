//! Request context for the booking API.
//!
//! Each request is tied to a [`CorrelationId`] taken from `X-Correlation-ID`
//! when the client (or the payment gateway) sends a valid UUID, otherwise
//! freshly generated. The id is placed in the request extensions and echoed
//! on the response so a customer's support ticket can be matched to the
//! booking logs.
//!
//! Everything the engine logs while handling the request runs inside a
//! `keygate_request` span carrying the correlation id, the route and, on
//! operator routes, the `X-Operator-Id` that made the call. The response
//! status is recorded on the same span; server errors are logged once here
//! so handlers do not have to.

use crate::extractors::{CorrelationId, OPERATOR_ID_HEADER};
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    response::Response,
};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{field, Instrument, Span};
use uuid::Uuid;

/// Header carrying the correlation id in both directions
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Layer that attaches a [`CorrelationId`] and a request span.
#[must_use]
pub const fn request_context_layer() -> RequestContextLayer {
    RequestContextLayer
}

/// See [`request_context_layer`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestContextLayer;

impl<S> Layer<S> for RequestContextLayer {
    type Service = RequestContext<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestContext { inner }
    }
}

/// Service produced by [`RequestContextLayer`]
#[derive(Clone, Debug)]
pub struct RequestContext<S> {
    inner: S,
}

fn correlation_id(headers: &HeaderMap) -> Uuid {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .unwrap_or_else(Uuid::new_v4)
}

fn request_span(req: &Request, id: Uuid) -> Span {
    let operator = req
        .headers()
        .get(OPERATOR_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let span = tracing::info_span!(
        "keygate_request",
        correlation_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
        operator = field::Empty,
        status = field::Empty,
    );
    if let Some(operator) = operator {
        span.record("operator", operator);
    }
    span
}

impl<S> Service<Request> for RequestContext<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let id = correlation_id(req.headers());
        req.extensions_mut().insert(CorrelationId(id));
        let span = request_span(&req, id);
        let response = self.inner.call(req).instrument(span.clone());

        Box::pin(async move {
            let mut response = response.await?;
            let status = response.status();
            span.record("status", status.as_u16());
            if status.is_server_error() {
                span.in_scope(|| tracing::warn!(status = status.as_u16(), "Request failed"));
            }

            if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::StatusCode,
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/api/bookings/:id",
                get(|CorrelationId(id): CorrelationId| async move { id.to_string() }),
            )
            .route(
                "/api/gateway/callback",
                post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .layer(request_context_layer())
    }

    fn echoed(response: &Response) -> String {
        response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn booking_lookup_gets_a_fresh_id() {
        let request = Request::builder()
            .uri("/api/bookings/1")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        let header = echoed(&response);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        assert!(Uuid::parse_str(&header).is_ok());
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), header);
    }

    #[tokio::test]
    async fn client_id_is_kept_and_garbage_replaced() {
        let sent = Uuid::new_v4();
        for (value, kept) in [(sent.to_string(), true), ("not-a-uuid".to_string(), false)] {
            let request = Request::builder()
                .uri("/api/bookings/1")
                .header(CORRELATION_ID_HEADER, value.as_str())
                .header(OPERATOR_ID_HEADER, "ops-1")
                .body(Body::empty())
                .unwrap();

            let header = echoed(&app().oneshot(request).await.unwrap());
            assert_eq!(header == value, kept);
            assert!(Uuid::parse_str(&header).is_ok());
        }
    }

    #[tokio::test]
    async fn failed_webhook_still_carries_the_id() {
        let sent = Uuid::new_v4();
        let request = Request::builder()
            .method("POST")
            .uri("/api/gateway/callback")
            .header(CORRELATION_ID_HEADER, sent.to_string())
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(echoed(&response), sent.to_string());
    }
}
