//! End-to-end ledger flows over the HTTP surface with the in-memory
//! backend and authentication disabled.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{assert_status, body_json, TestApp};

async fn create_account(app: &TestApp, currency: &str, initial: i64) -> String {
    let response = app
        .post_json("/v1/accounts", json!({ "currency": currency, "initial_amount": initial }))
        .await;
    assert_status(&response, StatusCode::CREATED);
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let body = body_json(response).await;
    let id = body["id"].as_str().expect("account id").to_string();
    assert_eq!(location.as_deref(), Some(format!("/v1/accounts/{id}").as_str()));
    id
}

async fn balance(app: &TestApp, id: &str, currency: &str) -> i64 {
    let response = app.get(&format!("/v1/accounts/{id}/balance?currency={currency}")).await;
    assert_status(&response, StatusCode::OK);
    body_json(response).await["amount"].as_i64().unwrap()
}

#[tokio::test]
async fn happy_transfer() {
    let app = TestApp::spawn();
    let a = create_account(&app, "QZN", 100_000).await;
    let b = create_account(&app, "QZN", 0).await;

    let response = app
        .post_json_with(
            "/v1/transfers",
            json!({ "from_id": a, "to_id": b, "currency": "QZN", "amount": 25_000 }),
            &[("Idempotency-Key", "test-key-1")],
        )
        .await;
    assert_status(&response, StatusCode::CREATED);
    assert_eq!(
        response.headers().get("idempotency-key").and_then(|v| v.to_str().ok()),
        Some("test-key-1")
    );
    let tx = body_json(response).await;
    assert_eq!(tx["sequence"].as_u64(), Some(1));
    assert_eq!(tx["amount"].as_i64(), Some(25_000));
    assert_eq!(tx["currency"], "QZN");

    assert_eq!(balance(&app, &a, "QZN").await, 75_000);
    assert_eq!(balance(&app, &b, "QZN").await, 25_000);

    let listing = app.get("/v1/ledger/transactions?limit=10").await;
    assert_status(&listing, StatusCode::OK);
    let listing = body_json(listing).await;
    let items = listing["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["sequence"].as_u64(), Some(1));
    assert_eq!(listing["next_after"].as_u64(), Some(1));
    assert!(listing["as_of"].as_str().is_some());
}

#[tokio::test]
async fn idempotent_replay_returns_the_original_transaction() {
    let app = TestApp::spawn();
    let a = create_account(&app, "QZN", 100_000).await;
    let b = create_account(&app, "QZN", 0).await;

    let body = json!({ "from_id": a, "to_id": b, "currency": "QZN", "amount": 25_000 });
    let headers = [("Idempotency-Key", "test-key-1")];

    let first = app.post_json_with("/v1/transfers", body.clone(), &headers).await;
    assert_status(&first, StatusCode::CREATED);
    let first = body_json(first).await;

    let second = app.post_json_with("/v1/transfers", body, &headers).await;
    assert_status(&second, StatusCode::CREATED);
    let second = body_json(second).await;

    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["sequence"], second["sequence"]);
    assert_eq!(balance(&app, &a, "QZN").await, 75_000);
    assert_eq!(balance(&app, &b, "QZN").await, 25_000);
}

#[tokio::test]
async fn insufficient_funds_is_a_conflict_and_moves_nothing() {
    let app = TestApp::spawn();
    let a = create_account(&app, "QZN", 100).await;
    let b = create_account(&app, "QZN", 0).await;

    let response = app
        .post_json(
            "/v1/transfers",
            json!({ "from_id": a, "to_id": b, "currency": "QZN", "amount": 200 }),
        )
        .await;
    assert_status(&response, StatusCode::CONFLICT);

    assert_eq!(balance(&app, &a, "QZN").await, 100);
    assert_eq!(balance(&app, &b, "QZN").await, 0);
}

#[tokio::test]
async fn validation_failures_are_bad_requests() {
    let app = TestApp::spawn();

    let response = app.post_json("/v1/accounts", json!({ "initial_amount": 10 })).await;
    assert_status(&response, StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].as_str().unwrap().contains("currency"));

    let response = app.post_json("/v1/accounts", json!({ "currency": "QZN", "initial_amount": -1 })).await;
    assert_status(&response, StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/v1/transfers",
            json!({ "from_id": "a", "to_id": "", "currency": "QZN", "amount": 0 }),
        )
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);

    // Unknown fields are rejected, not ignored.
    let response = app
        .post_json("/v1/accounts", json!({ "currency": "QZN", "initial_amount": 1, "extra": true }))
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mismatched_idempotency_header_and_body_are_rejected() {
    let app = TestApp::spawn();
    let a = create_account(&app, "QZN", 1_000).await;
    let b = create_account(&app, "QZN", 0).await;

    let response = app
        .post_json_with(
            "/v1/transfers",
            json!({
                "from_id": a,
                "to_id": b,
                "currency": "QZN",
                "amount": 10,
                "idempotency_key": "body-key"
            }),
            &[("Idempotency-Key", "header-key")],
        )
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);

    let long_key = "k".repeat(129);
    let response = app
        .post_json_with(
            "/v1/transfers",
            json!({ "from_id": a, "to_id": b, "currency": "QZN", "amount": 10 }),
            &[("Idempotency-Key", long_key.as_str())],
        )
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let app = TestApp::spawn();
    let a = create_account(&app, "QZN", 100).await;

    let response = app.get("/v1/accounts/missing-account").await;
    assert_status(&response, StatusCode::NOT_FOUND);

    let response = app
        .post_json(
            "/v1/transfers",
            json!({ "from_id": a, "to_id": "missing", "currency": "QZN", "amount": 10 }),
        )
        .await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn self_transfer_is_allowed_and_balance_neutral() {
    let app = TestApp::spawn();
    let a = create_account(&app, "QZN", 500).await;

    let response = app
        .post_json(
            "/v1/transfers",
            json!({ "from_id": a, "to_id": a, "currency": "QZN", "amount": 100 }),
        )
        .await;
    assert_status(&response, StatusCode::CREATED);
    let tx = body_json(response).await;
    assert_eq!(tx["sequence"].as_u64(), Some(1));
    assert_eq!(balance(&app, &a, "QZN").await, 500);
}

#[tokio::test]
async fn listing_validates_pagination_parameters() {
    let app = TestApp::spawn();

    assert_status(
        &app.get("/v1/ledger/transactions?limit=0").await,
        StatusCode::BAD_REQUEST,
    );
    assert_status(
        &app.get("/v1/ledger/transactions?limit=1001").await,
        StatusCode::BAD_REQUEST,
    );
    assert_status(
        &app.get("/v1/ledger/transactions?after=-3").await,
        StatusCode::BAD_REQUEST,
    );
    assert_status(&app.get("/v1/ledger/transactions").await, StatusCode::OK);
}

#[tokio::test]
async fn balance_requires_currency_and_missing_rows_read_zero() {
    let app = TestApp::spawn();
    let a = create_account(&app, "QZN", 100).await;

    assert_status(
        &app.get(&format!("/v1/accounts/{a}/balance")).await,
        StatusCode::BAD_REQUEST,
    );
    assert_eq!(balance(&app, &a, "USD").await, 0);
}
