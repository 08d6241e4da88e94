use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use qazna_core::error::AppError;

use crate::context::RequestContext;
use crate::extract::Json as JsonBody;
use crate::handlers::auth::TokenResponse;
use crate::handlers::require_auth;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorizeRequest {
    client_id: String,
    redirect_uri: String,
    code_challenge: String,
    code_challenge_method: String,
    user: String,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeRequest {
    #[serde(default)]
    grant_type: Option<String>,
    client_id: String,
    client_secret: String,
    code: String,
    code_verifier: String,
}

pub async fn authorize(
    State(state): State<AppState>,
    ctx: RequestContext,
    JsonBody(req): JsonBody<AuthorizeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();

    let code = auth
        .oauth
        .issue_auth_code(
            &req.client_id,
            &req.redirect_uri,
            &req.code_challenge,
            &req.code_challenge_method,
            &req.user,
            &req.roles,
        )
        .await?;

    auth.audit
        .record(
            &ctx,
            "auth.oauth.code.issue",
            "oauth_client",
            &code.client_id,
            BTreeMap::from([("user".to_string(), code.user_id.clone())]),
        )
        .await;

    Ok(Json(AuthorizeResponse {
        expires_in: (code.expires_at - Utc::now()).num_seconds().max(0),
        expires_at: code.expires_at,
        code: code.code,
    }))
}

pub async fn token(
    State(state): State<AppState>,
    ctx: RequestContext,
    JsonBody(req): JsonBody<ExchangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();

    if let Some(grant) = req.grant_type.as_deref() {
        if !grant.trim().eq_ignore_ascii_case("authorization_code") {
            return Err(AppError::bad_request("unsupported grant_type"));
        }
    }

    let issued = auth
        .oauth
        .exchange_auth_code(&req.client_id, &req.client_secret, &req.code, &req.code_verifier)
        .await?;

    auth.audit
        .record(
            &ctx,
            "auth.oauth.code.exchange",
            "oauth_client",
            req.client_id.trim(),
            BTreeMap::new(),
        )
        .await;

    Ok(Json(TokenResponse::access_only(issued.token, issued.expires_at)))
}
