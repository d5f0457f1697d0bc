//! HTTP surface: routing, admin authentication and error mapping.

#![allow(clippy::unwrap_used)]

mod common;

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use common::{reference, Harness};
use keygate_core::KeyKind;
use keygate_testing::MockPaymentGateway;
use keygate_ticketing::server::{routes::build_router, state::AppState};
use serde_json::{json, Value};
use std::sync::Arc;

const TOKEN: &str = "test-admin-token";

fn server(h: &Harness) -> TestServer {
    let state = AppState::new(Arc::clone(&h.engine), TOKEN);
    TestServer::new(build_router(state)).unwrap()
}

fn bearer() -> (HeaderName, HeaderValue) {
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {TOKEN}")).unwrap(),
    )
}

fn operator() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-operator-id"),
        HeaderValue::from_static("ops@example.com"),
    )
}

fn booking_body(code: &str) -> Value {
    json!({
        "code": code,
        "contact": { "name": "Ada Lovelace", "email": "ada@example.com", "phone": "600123456" },
    })
}

#[tokio::test]
async fn health_and_readiness() {
    let h = Harness::new().await;
    let server = server(&h);

    server.get("/health").await.assert_status_ok();
    server.get("/ready").await.assert_status_ok();
}

#[tokio::test]
async fn admin_routes_require_token_and_operator() {
    let h = Harness::new().await;
    let server = server(&h);
    let body = json!({ "kind": "normal", "count": 2 });

    let response = server.post("/api/admin/keys").json(&body).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let (name, _) = bearer();
    let response = server
        .post("/api/admin/keys")
        .add_header(name, HeaderValue::from_static("Bearer wrong"))
        .json(&body)
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let (name, value) = bearer();
    let response = server.post("/api/admin/keys").add_header(name, value).json(&body).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let (name, value) = bearer();
    let (op_name, op_value) = operator();
    let response = server
        .post("/api/admin/keys")
        .add_header(name, value)
        .add_header(op_name, op_value)
        .json(&body)
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let issued = response.json::<Value>();
    assert_eq!(issued["issued"], 2);
    assert_eq!(issued["keys"][0]["created_by"], "ops@example.com");
}

#[tokio::test]
async fn empty_admin_token_disables_admin_routes() {
    let h = Harness::new().await;
    let server = TestServer::new(build_router(AppState::new(Arc::clone(&h.engine), ""))).unwrap();
    let (op_name, op_value) = operator();

    let response = server
        .get("/api/admin/capacity")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer "))
        .add_header(op_name, op_value)
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn validate_book_and_pay_over_http() {
    let h = Harness::new().await;
    let key = h.issue_one(KeyKind::Normal).await;
    let server = server(&h);

    let view = server
        .post("/api/keys/validate")
        .json(&json!({ "code": key.code.as_str() }))
        .await;
    view.assert_status_ok();
    let view = view.json::<Value>();
    assert_eq!(view["tier"], "early");
    assert_eq!(view["ticket_price"], 1500);

    let created = server.post("/api/bookings").json(&booking_body(key.code.as_str())).await;
    assert_eq!(created.status_code(), StatusCode::CREATED);
    let booking = created.json::<Value>();
    assert_eq!(booking["purchase"]["payment_status"], "pending");
    assert!(booking["payment_url"].as_str().unwrap().starts_with("https://pay.example.test/"));
    let id = booking["purchase"]["id"].as_str().unwrap().to_string();

    let purchase = h.memory.all_purchases().await.remove(0);
    let callback = server
        .post("/api/gateway/callback")
        .bytes(MockPaymentGateway::approved(reference(&purchase), "txn-42").into())
        .await;
    callback.assert_status_ok();
    assert_eq!(callback.json::<Value>()["ack"], "applied");

    let status = server.get(&format!("/api/bookings/{id}")).await;
    status.assert_status_ok();
    let status = status.json::<Value>();
    assert_eq!(status["status"], "completed");
    assert_eq!(status["invitations_generated"], true);
    assert_eq!(status["can_retry"], false);
}

#[tokio::test]
async fn gateway_callback_always_answers_ok() {
    let h = Harness::new().await;
    let server = server(&h);

    let response = server
        .post("/api/gateway/callback")
        .bytes(b"garbage".to_vec().into())
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["ack"], "rejected");
}

#[tokio::test]
async fn engine_errors_map_to_status_codes() {
    let h = Harness::with_confirmed(300).await;
    let key = h.issue_one(KeyKind::Normal).await;
    let server = server(&h);

    let sold_out = server.post("/api/bookings").json(&booking_body(key.code.as_str())).await;
    assert_eq!(sold_out.status_code(), StatusCode::CONFLICT);
    assert_eq!(sold_out.json::<Value>()["code"], "SOLD_OUT");

    let unknown = server
        .post("/api/keys/validate")
        .json(&json!({ "code": "ZZZZ-ZZZZ" }))
        .await;
    assert_eq!(unknown.status_code(), StatusCode::CONFLICT);
    assert_eq!(unknown.json::<Value>()["code"], "KEY_INVALID");

    let missing = server.get(&format!("/api/bookings/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

    let mut body = booking_body(key.code.as_str());
    body["contact"]["email"] = json!("not-an-email");
    let invalid = server.post("/api/bookings").json(&body).await;
    assert_eq!(invalid.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn gateway_outage_is_service_unavailable() {
    let h = Harness::new().await;
    let key = h.issue_one(KeyKind::Normal).await;
    let server = server(&h);

    h.gateway.set_unavailable(true);
    let response = server.post("/api/bookings").json(&booking_body(key.code.as_str())).await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn operator_recovery_over_http() {
    let h = Harness::new().await;
    let key = h.issue_one(KeyKind::Normal).await;
    let booking = h.book(&key.code).await.unwrap();
    let server = server(&h);

    let (name, value) = bearer();
    let (op_name, op_value) = operator();
    let fixed = server
        .post(&format!("/api/admin/purchases/{}/manual-fix", booking.purchase.id))
        .add_header(name, value)
        .add_header(op_name, op_value)
        .await;
    fixed.assert_status_ok();
    let fixed = fixed.json::<Value>();
    assert_eq!(fixed["outcome"], "completed");
    assert_eq!(fixed["invitation_keys"].as_array().unwrap().len(), 5);

    let (name, value) = bearer();
    let (op_name, op_value) = operator();
    let capacity = server
        .get("/api/admin/capacity")
        .add_header(name, value)
        .add_header(op_name, op_value)
        .await;
    capacity.assert_status_ok();
    assert_eq!(capacity.json::<Value>()["confirmed"], 1);
}
