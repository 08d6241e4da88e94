//! Shared setup for router-level integration tests. The app is driven
//! through `tower::ServiceExt::oneshot` against in-memory backends; no
//! network listener is involved.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::Duration as ChronoDuration;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use qazna_api::config::AppConfig;
use qazna_api::db::memory::{
    MemoryAuditStore, MemoryKeyStore, MemoryOAuthStore, MemoryRbacStore, MemoryRefreshTokenStore,
};
use qazna_api::ledger::memory::MemoryLedger;
use qazna_api::services::audit::AuditService;
use qazna_api::services::keys::KeyManager;
use qazna_api::services::oauth::OAuthService;
use qazna_api::services::rbac::RbacService;
use qazna_api::services::tokens::TokenService;
use qazna_api::stream::StreamHub;
use qazna_api::{build_router, AppState, AuthContext, ReadyProbe};

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    /// App without authentication: every endpoint is open, RBAC answers 503.
    pub fn spawn() -> Self {
        Self::spawn_with_config(AppConfig::default(), false)
    }

    /// App with the auth subsystem on in-memory stores (demo OAuth client
    /// pre-registered, builtin permissions seeded).
    pub async fn spawn_with_auth() -> Self {
        let app = Self::spawn_with_config(AppConfig::default(), true);
        if let Some(auth) = &app.state.auth {
            auth.keys.ensure_active().await.expect("signing key");
            auth.rbac.ensure_builtins().await.expect("builtin permissions");
        }
        app
    }

    pub fn spawn_with_config(config: AppConfig, with_auth: bool) -> Self {
        let auth = with_auth.then(|| {
            let keys = Arc::new(KeyManager::new(Arc::new(MemoryKeyStore::new())));
            let rbac_store = Arc::new(MemoryRbacStore::new());
            let tokens = Arc::new(TokenService::new(
                keys.clone(),
                Arc::new(MemoryRefreshTokenStore::new()),
                rbac_store.clone(),
                config.issuer.clone(),
                ChronoDuration::minutes(15),
                ChronoDuration::days(14),
            ));
            AuthContext {
                tokens: tokens.clone(),
                keys,
                rbac: Arc::new(RbacService::new(rbac_store)),
                oauth: Arc::new(OAuthService::new(
                    Arc::new(MemoryOAuthStore::with_demo_client()),
                    tokens,
                )),
                audit: AuditService::new(Arc::new(MemoryAuditStore::new())),
            }
        });

        let state = AppState {
            config: config.clone(),
            version: "test".to_string(),
            ledger: Arc::new(MemoryLedger::new()),
            auth,
            stream: StreamHub::new(),
            readiness: ReadyProbe::always_ready(),
        };
        Self { router: build_router(state.clone()), state }
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("infallible router")
    }

    pub async fn get(&self, path: &str) -> Response<Body> {
        self.request(Request::builder().uri(path).body(Body::empty()).unwrap()).await
    }

    pub async fn get_authed(&self, path: &str, token: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .uri(path)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Response<Body> {
        self.request(json_request("POST", path, body, &[])).await
    }

    pub async fn post_json_with(
        &self,
        path: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        self.request(json_request("POST", path, body, headers)).await
    }

    /// Mint an access token straight from the token service.
    pub async fn issue_token(&self, user: &str, roles: &[&str]) -> String {
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        self.state
            .auth
            .as_ref()
            .expect("auth enabled")
            .tokens
            .issue_for(user, &roles, None, vec![])
            .await
            .expect("issue token")
            .token
    }
}

pub fn json_request(
    method: &str,
    path: &str,
    body: Value,
    headers: &[(&str, &str)],
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
