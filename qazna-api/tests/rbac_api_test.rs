//! RBAC administration over the HTTP surface.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};

use common::{assert_status, body_json, json_request, TestApp};

struct RbacClient {
    app: TestApp,
    token: String,
}

impl RbacClient {
    async fn spawn() -> Self {
        let app = TestApp::spawn_with_auth().await;
        let token = app.issue_token("root", &["admin"]).await;
        Self { app, token }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn post(&self, path: &str, body: Value) -> axum::http::Response<Body> {
        self.app
            .request(json_request("POST", path, body, &[("authorization", &self.bearer())]))
            .await
    }

    async fn send(&self, method: &str, path: &str, body: Option<Value>) -> axum::http::Response<Body> {
        let request = match body {
            Some(body) => json_request(method, path, body, &[("authorization", &self.bearer())]),
            None => Request::builder()
                .method(method)
                .uri(path)
                .header(header::AUTHORIZATION, self.bearer())
                .body(Body::empty())
                .unwrap(),
        };
        self.app.request(request).await
    }
}

#[tokio::test]
async fn organization_crud_over_http() {
    let client = RbacClient::spawn().await;

    let response = client
        .post("/v1/organizations", json!({ "name": "Treasury", "metadata": { "region": "eurasia" } }))
        .await;
    assert_status(&response, StatusCode::CREATED);
    assert!(response.headers().get("location").is_some());
    let org = body_json(response).await;
    let org_id = org["id"].as_str().unwrap().to_string();
    assert_eq!(org["name"], "Treasury");

    // Duplicate name conflicts.
    let response = client.post("/v1/organizations", json!({ "name": "Treasury" })).await;
    assert_status(&response, StatusCode::CONFLICT);

    let response = client.send("GET", "/v1/organizations", None).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let response = client
        .send("PATCH", &format!("/v1/organizations/{org_id}"), Some(json!({ "name": "Treasury Prime" })))
        .await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await["name"], "Treasury Prime");

    let response = client.send("DELETE", &format!("/v1/organizations/{org_id}"), None).await;
    assert_status(&response, StatusCode::NO_CONTENT);

    let response = client.send("GET", &format!("/v1/organizations/{org_id}"), None).await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn user_and_role_lifecycle() {
    let client = RbacClient::spawn().await;

    let org = body_json(client.post("/v1/organizations", json!({ "name": "Treasury" })).await).await;
    let org_id = org["id"].as_str().unwrap();

    let response = client
        .post(
            &format!("/v1/organizations/{org_id}/users"),
            json!({ "email": "Ops@Qazna.org", "password": "pw-123456", "status": "" }),
        )
        .await;
    assert_status(&response, StatusCode::CREATED);
    let user = body_json(response).await;
    assert_eq!(user["email"], "ops@qazna.org");
    assert_eq!(user["status"], "active");
    assert!(user.get("password_hash").is_none());
    let user_id = user["id"].as_str().unwrap().to_string();

    // Bad status rejected.
    let response = client
        .post(
            &format!("/v1/organizations/{org_id}/users"),
            json!({ "email": "x@qazna.org", "password": "pw", "status": "frozen" }),
        )
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);

    let response = client
        .post(
            &format!("/v1/organizations/{org_id}/roles"),
            json!({ "name": "operator", "description": "ledger operator" }),
        )
        .await;
    assert_status(&response, StatusCode::CREATED);
    let role = body_json(response).await;
    let role_id = role["id"].as_str().unwrap().to_string();

    let response = client
        .send(
            "PUT",
            &format!("/v1/roles/{role_id}/permissions"),
            Some(json!({ "permissions": ["ledger.transfer", "ledger.account.create"] })),
        )
        .await;
    assert_status(&response, StatusCode::NO_CONTENT);

    // Unknown permission keys 404 with context.
    let response = client
        .send(
            "PUT",
            &format!("/v1/roles/{role_id}/permissions"),
            Some(json!({ "permissions": ["ledger.mint_unbacked"] })),
        )
        .await;
    assert_status(&response, StatusCode::NOT_FOUND);
    assert!(body_json(response).await["error"]
        .as_str()
        .unwrap()
        .contains("ledger.mint_unbacked"));

    let response = client
        .post(&format!("/v1/users/{user_id}/assignments"), json!({ "role_id": role_id }))
        .await;
    assert_status(&response, StatusCode::CREATED);
    let assignment = body_json(response).await;
    assert_eq!(assignment["user_id"].as_str(), Some(user_id.as_str()));

    // Duplicate assignment conflicts.
    let response = client
        .post(&format!("/v1/users/{user_id}/assignments"), json!({ "role_id": role_id }))
        .await;
    assert_status(&response, StatusCode::CONFLICT);

    let response = client.send("GET", &format!("/v1/users/{user_id}/assignments"), None).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let response = client
        .send("DELETE", &format!("/v1/users/{user_id}/assignments/{role_id}"), None)
        .await;
    assert_status(&response, StatusCode::NO_CONTENT);

    let response = client.send("GET", &format!("/v1/users/{user_id}/assignments"), None).await;
    assert!(body_json(response).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn assignments_across_organizations_are_rejected() {
    let client = RbacClient::spawn().await;

    let a = body_json(client.post("/v1/organizations", json!({ "name": "A" })).await).await;
    let b = body_json(client.post("/v1/organizations", json!({ "name": "B" })).await).await;
    let a_id = a["id"].as_str().unwrap();
    let b_id = b["id"].as_str().unwrap();

    let user = body_json(
        client
            .post(
                &format!("/v1/organizations/{a_id}/users"),
                json!({ "email": "ops@qazna.org", "password": "pw-123456", "status": "active" }),
            )
            .await,
    )
    .await;
    let role = body_json(
        client
            .post(&format!("/v1/organizations/{b_id}/roles"), json!({ "name": "operator" , "description": "" }))
            .await,
    )
    .await;

    let response = client
        .post(
            &format!("/v1/users/{}/assignments", user["id"].as_str().unwrap()),
            json!({ "role_id": role["id"].as_str().unwrap() }),
        )
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rbac_surface_requires_management_permissions() {
    let app = TestApp::spawn_with_auth().await;
    let limited = app.issue_token("limited", &[]).await;

    let response = app
        .request(json_request(
            "POST",
            "/v1/organizations",
            json!({ "name": "X" }),
            &[("authorization", &format!("Bearer {limited}"))],
        ))
        .await;
    assert_status(&response, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rbac_surface_is_unavailable_without_auth() {
    let app = TestApp::spawn();
    let response = app.post_json("/v1/organizations", json!({ "name": "X" })).await;
    assert_status(&response, StatusCode::SERVICE_UNAVAILABLE);
}
