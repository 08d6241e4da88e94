//! Middleware-chain behavior: request IDs, security headers, CORS, rate
//! limiting, and the error envelope.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;

use common::{assert_status, body_json, TestApp};
use qazna_api::config::AppConfig;

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let app = TestApp::spawn();

    let response = app
        .request(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "  req-42  ")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(
        response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("req-42")
    );

    let response = app.get("/healthz").await;
    let generated = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(!generated.is_empty());
}

#[tokio::test]
async fn security_headers_are_always_present() {
    let app = TestApp::spawn();
    let response = app.get("/healthz").await;

    let get = |name: &str| {
        response.headers().get(name).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string()
    };
    assert_eq!(get("x-content-type-options"), "nosniff");
    assert_eq!(get("x-frame-options"), "DENY");
    assert_eq!(get("x-xss-protection"), "0");
    assert_eq!(get("referrer-policy"), "no-referrer");
    assert!(get("content-security-policy").contains("default-src 'self'"));
}

#[tokio::test]
async fn cors_echoes_only_allowed_origins() {
    let mut config = AppConfig::default();
    config.allowed_origins = vec!["https://app.qazna.org".to_string()];
    let app = TestApp::spawn_with_config(config, false);

    // Preflight short-circuits with 204.
    let response = app
        .request(
            Request::builder()
                .method("OPTIONS")
                .uri("/v1/accounts")
                .header(header::ORIGIN, "https://app.qazna.org")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_status(&response, StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("https://app.qazna.org")
    );
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .and_then(|v| v.to_str().ok()),
        Some("GET,POST,OPTIONS")
    );

    // Disallowed origins are not echoed.
    let response = app
        .request(
            Request::builder()
                .uri("/healthz")
                .header(header::ORIGIN, "https://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

    // Loopback only counts when the allow-list is empty.
    let open = TestApp::spawn();
    let response = open
        .request(
            Request::builder()
                .uri("/healthz")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("http://localhost:3000")
    );
}

#[tokio::test]
async fn rate_limit_denies_with_retry_after_and_envelope() {
    let mut config = AppConfig::default();
    config.rate_limit_burst = 1;
    config.rate_limit_rps = 1;
    let app = TestApp::spawn_with_config(config, false);

    let first = app.get("/healthz").await;
    assert_status(&first, StatusCode::OK);

    let second = app.get("/healthz").await;
    assert_status(&second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        second.headers().get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
        Some("1")
    );
    let body = body_json(second).await;
    assert!(body["error"].as_str().is_some());
    assert!(body["request_id"].as_str().is_some());

    // OPTIONS bypasses the limiter even when exhausted.
    let options = app
        .request(
            Request::builder()
                .method("OPTIONS")
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_status(&options, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let app = TestApp::spawn();
    let huge = "x".repeat((1 << 20) + 1);
    let response = app
        .post_json("/v1/accounts", json!({ "currency": "QZN", "initial_amount": 0, "pad": huge }))
        .await;
    assert!(
        response.status() == StatusCode::PAYLOAD_TOO_LARGE
            || response.status() == StatusCode::BAD_REQUEST,
        "got {}",
        response.status()
    );
}

#[tokio::test]
async fn readiness_and_metrics_endpoints_respond() {
    let app = TestApp::spawn();

    let response = app.get("/readyz").await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ready");

    let response = app.get("/healthz").await;
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "qazna-api");

    let response = app.get("/v1/info").await;
    let body = body_json(response).await;
    assert!(body["time"].as_str().is_some());

    let response = app.get("/metrics").await;
    assert_status(&response, StatusCode::OK);
}
