//! Qazna API — a monetary coordination layer.
//!
//! A deterministic ledger core behind a dual HTTP/gRPC surface, with
//! RS256 bearer tokens over rotating signing keys, RBAC-gated mutations,
//! and an append-only audit trail.

pub mod config;
pub mod context;
pub mod db;
pub mod extract;
pub mod grpc;
pub mod handlers;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod services;
pub mod stream;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use qazna_core::error::AppError;
use qazna_core::middleware::cors::{cors_middleware, CorsPolicy};
use qazna_core::middleware::logging::request_logging_middleware;
use qazna_core::middleware::metrics::metrics_middleware;
use qazna_core::middleware::rate_limit::{rate_limit_middleware, IpRateLimiter};
use qazna_core::middleware::recovery::recovery_middleware;
use qazna_core::middleware::request_id::request_id_middleware;
use qazna_core::middleware::security_headers::security_headers_middleware;

use crate::config::AppConfig;
use crate::ledger::Ledger;
use crate::services::audit::AuditService;
use crate::services::keys::KeyManager;
use crate::services::oauth::OAuthService;
use crate::services::rbac::RbacService;
use crate::services::tokens::TokenService;
use crate::stream::StreamHub;

pub const SERVICE_NAME: &str = "qazna-api";

/// Request body cap, applied to every endpoint.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// The auth subsystem: token issuance, key lifecycle, RBAC, OAuth, audit.
/// Absent entirely when the deployment carries no signing keys.
#[derive(Clone)]
pub struct AuthContext {
    pub tokens: Arc<TokenService>,
    pub keys: Arc<KeyManager>,
    pub rbac: Arc<RbacService>,
    pub oauth: Arc<OAuthService>,
    pub audit: AuditService,
}

/// Readiness probe: pings the database when one is configured, otherwise
/// always ready.
#[derive(Clone, Default)]
pub struct ReadyProbe {
    pool: Option<PgPool>,
}

impl ReadyProbe {
    pub fn always_ready() -> Self {
        Self { pool: None }
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool: Some(pool) }
    }

    pub async fn check(&self) -> Result<(), AppError> {
        if let Some(pool) = &self.pool {
            sqlx::query("SELECT 1")
                .execute(pool)
                .await
                .map_err(|e| AppError::Database(anyhow::anyhow!("readiness ping: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub version: String,
    pub ledger: Arc<dyn Ledger>,
    pub auth: Option<AuthContext>,
    pub stream: StreamHub,
    pub readiness: ReadyProbe,
}

/// Assemble the HTTP surface with the full middleware chain.
pub fn build_router(state: AppState) -> Router {
    let cors = Arc::new(CorsPolicy::new(state.config.allowed_origins.clone()));
    let limiter = Arc::new(IpRateLimiter::new(
        state.config.rate_limit_burst,
        state.config.rate_limit_rps,
    ));

    Router::new()
        .route("/healthz", get(handlers::ops::healthz))
        .route("/readyz", get(handlers::ops::readyz))
        .route("/v1/info", get(handlers::ops::info))
        .route("/metrics", get(handlers::ops::metrics))
        .route("/v1/auth/token", post(handlers::auth::token))
        .route("/v1/auth/jwks", get(handlers::auth::jwks))
        .route("/v1/auth/oauth/authorize", post(handlers::oauth::authorize))
        .route("/v1/auth/oauth/token", post(handlers::oauth::token))
        .route("/v1/accounts", post(handlers::accounts::create))
        .route("/v1/accounts/{id}", get(handlers::accounts::get))
        .route("/v1/accounts/{id}/balance", get(handlers::accounts::balance))
        .route("/v1/transfers", post(handlers::transfers::create))
        .route("/v1/ledger/transactions", get(handlers::transactions::list))
        .route(
            "/v1/organizations",
            post(handlers::orgs::create).get(handlers::orgs::list),
        )
        .route(
            "/v1/organizations/{id}",
            get(handlers::orgs::get)
                .patch(handlers::orgs::update)
                .delete(handlers::orgs::delete),
        )
        .route(
            "/v1/organizations/{id}/users",
            post(handlers::users::create).get(handlers::users::list),
        )
        .route(
            "/v1/organizations/{id}/roles",
            post(handlers::roles::create).get(handlers::roles::list),
        )
        .route("/v1/roles/{id}/permissions", put(handlers::roles::set_permissions))
        .route(
            "/v1/users/{id}/assignments",
            post(handlers::users::assign_role).get(handlers::users::list_assignments),
        )
        .route(
            "/v1/users/{id}/assignments/{role_id}",
            delete(handlers::users::unassign_role),
        )
        .route("/v1/stream", get(handlers::stream::subscribe))
        .with_state(state.clone())
        // Layers wrap bottom-up: the last layer added runs first.
        .layer(from_fn(metrics_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(from_fn_with_state(limiter, rate_limit_middleware))
        .layer(from_fn_with_state(cors, cors_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(recovery_middleware))
        .layer(from_fn_with_state(state, middleware::auth::auth_middleware))
        .layer(from_fn(request_logging_middleware))
        .layer(from_fn(request_id_middleware))
}
