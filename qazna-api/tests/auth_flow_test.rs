//! Authentication, authorization, and OAuth PKCE flows over the HTTP
//! surface with in-memory backends.

mod common;

use axum::http::{header, StatusCode};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;
use sha2::{Digest, Sha256};

use common::{assert_status, body_json, TestApp};

#[tokio::test]
async fn unauthenticated_mutations_are_rejected_with_challenge() {
    let app = TestApp::spawn_with_auth().await;

    let response = app
        .post_json("/v1/accounts", json!({ "currency": "QZN", "initial_amount": 0 }))
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
    let challenge = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(challenge.contains(r#"realm="qazna""#));
    assert!(challenge.contains("invalid_request"));

    let body = body_json(response).await;
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn garbage_tokens_are_rejected_as_invalid() {
    let app = TestApp::spawn_with_auth().await;

    let response = app.get_authed("/v1/ledger/transactions", "not-a-token").await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
    let challenge = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(challenge.contains("invalid_token"));
}

#[tokio::test]
async fn permissions_gate_ledger_mutations() {
    let app = TestApp::spawn_with_auth().await;

    // No roles, no permissions: authenticated but forbidden.
    let limited = app.issue_token("limited-user", &[]).await;
    let response = app
        .request(common::json_request(
            "POST",
            "/v1/accounts",
            json!({ "currency": "QZN", "initial_amount": 0 }),
            &[("authorization", &format!("Bearer {limited}"))],
        ))
        .await;
    assert_status(&response, StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "insufficient_scope");

    // Admin role passes.
    let admin = app.issue_token("admin-user", &["admin"]).await;
    let response = app
        .request(common::json_request(
            "POST",
            "/v1/accounts",
            json!({ "currency": "QZN", "initial_amount": 1000 }),
            &[("authorization", &format!("Bearer {admin}"))],
        ))
        .await;
    assert_status(&response, StatusCode::CREATED);
}

#[tokio::test]
async fn rbac_resolved_permissions_allow_mutations() {
    let app = TestApp::spawn_with_auth().await;
    let auth = app.state.auth.clone().unwrap();

    // A real user whose only grant is ledger.account.create via a role.
    let org = auth.rbac.create_organization("Treasury", None).await.unwrap();
    let user = auth
        .rbac
        .create_user(&org.id, "teller@qazna.org", "pw-123456", "active")
        .await
        .unwrap();
    let role = auth.rbac.create_role(&org.id, "teller", "account operations").await.unwrap();
    auth.rbac
        .set_role_permissions(&role.id, &["ledger.account.create".to_string()])
        .await
        .unwrap();
    auth.rbac.assign_role_to_user(&user.id, &role.id).await.unwrap();

    let token = app.issue_token(&user.id, &[]).await;
    let response = app
        .request(common::json_request(
            "POST",
            "/v1/accounts",
            json!({ "currency": "QZN", "initial_amount": 0 }),
            &[("authorization", &format!("Bearer {token}"))],
        ))
        .await;
    assert_status(&response, StatusCode::CREATED);

    // But the transfer permission is still missing.
    let response = app
        .request(common::json_request(
            "POST",
            "/v1/transfers",
            json!({ "from_id": "a", "to_id": "b", "currency": "QZN", "amount": 1 }),
            &[("authorization", &format!("Bearer {token}"))],
        ))
        .await;
    assert_status(&response, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn dev_grant_issues_usable_bearer_tokens() {
    let app = TestApp::spawn_with_auth().await;

    let response = app
        .post_json("/v1/auth/token", json!({ "user": "demo-user", "roles": ["Admin", "admin"] }))
        .await;
    assert_status(&response, StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["expires_in"].as_i64().unwrap() > 0);
    let token = body["access_token"].as_str().unwrap().to_string();

    let claims = app
        .state
        .auth
        .as_ref()
        .unwrap()
        .tokens
        .parse_and_validate(&token)
        .await
        .unwrap();
    assert_eq!(claims.sub, "demo-user");
    assert_eq!(claims.roles, vec!["admin".to_string()]);
}

#[tokio::test]
async fn password_and_refresh_grants_rotate_tokens() {
    let app = TestApp::spawn_with_auth().await;
    let auth = app.state.auth.clone().unwrap();

    let org = auth.rbac.create_organization("Treasury", None).await.unwrap();
    auth.rbac
        .create_user(&org.id, "ops@qazna.org", "pass-1234", "active")
        .await
        .unwrap();

    let response = app
        .post_json(
            "/v1/auth/token",
            json!({ "grant_type": "password", "email": "ops@qazna.org", "password": "pass-1234" }),
        )
        .await;
    assert_status(&response, StatusCode::OK);
    let body = body_json(response).await;
    let refresh = body["refresh_token"].as_str().unwrap().to_string();
    assert!(refresh.contains('.'));
    assert!(body["refresh_expires_at"].as_str().is_some());

    // Wrong password.
    let response = app
        .post_json(
            "/v1/auth/token",
            json!({ "grant_type": "password", "email": "ops@qazna.org", "password": "wrong" }),
        )
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);

    // Rotate.
    let response = app
        .post_json(
            "/v1/auth/token",
            json!({ "grant_type": "refresh_token", "refresh_token": refresh }),
        )
        .await;
    assert_status(&response, StatusCode::OK);
    let rotated = body_json(response).await;
    assert_ne!(rotated["refresh_token"], json!(refresh));

    // Reuse of the rotated-away token fails.
    let response = app
        .post_json(
            "/v1/auth/token",
            json!({ "grant_type": "refresh_token", "refresh_token": refresh }),
        )
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);

    let response = app
        .post_json("/v1/auth/token", json!({ "grant_type": "client_credentials" }))
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn pkce_flow_exchanges_once() {
    let app = TestApp::spawn_with_auth().await;

    let verifier = "sample-verifier";
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

    let response = app
        .post_json(
            "/v1/auth/oauth/authorize",
            json!({
                "client_id": "demo-client",
                "redirect_uri": "http://localhost/callback",
                "code_challenge": challenge,
                "code_challenge_method": "S256",
                "user": "demo-user",
                "roles": ["admin"]
            }),
        )
        .await;
    assert_status(&response, StatusCode::OK);
    let body = body_json(response).await;
    let code = body["code"].as_str().unwrap().to_string();
    assert!(body["expires_in"].as_i64().unwrap() > 0);

    let exchange = json!({
        "client_id": "demo-client",
        "client_secret": "demo-secret",
        "code": code,
        "code_verifier": verifier
    });
    let response = app.post_json("/v1/auth/oauth/token", exchange.clone()).await;
    assert_status(&response, StatusCode::OK);
    let body = body_json(response).await;
    let token = body["access_token"].as_str().unwrap().to_string();
    assert!(!token.is_empty());

    let claims = app
        .state
        .auth
        .as_ref()
        .unwrap()
        .tokens
        .parse_and_validate(&token)
        .await
        .unwrap();
    assert_eq!(claims.sub, "demo-user");
    assert!(claims.exp > chrono::Utc::now().timestamp());

    // Second exchange of the same code is a 400.
    let response = app.post_json("/v1/auth/oauth/token", exchange).await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn jwks_lists_the_active_key() {
    let app = TestApp::spawn_with_auth().await;
    let admin = app.issue_token("admin-user", &["admin"]).await;

    let response = app.get_authed("/v1/auth/jwks", &admin).await;
    assert_status(&response, StatusCode::OK);
    let body = body_json(response).await;
    let keys = body["keys"].as_array().unwrap();
    assert!(!keys.is_empty());
    assert_eq!(keys[0]["kty"], "RSA");
    assert_eq!(keys[0]["alg"], "RS256");
    assert_eq!(keys[0]["use"], "sig");
    assert!(keys[0]["kid"].as_str().is_some());
    assert!(!keys[0]["n"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn auth_endpoints_answer_503_without_the_subsystem() {
    let app = TestApp::spawn();
    let response = app.post_json("/v1/auth/token", json!({ "user": "u" })).await;
    assert_status(&response, StatusCode::SERVICE_UNAVAILABLE);
}
