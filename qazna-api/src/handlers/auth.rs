use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use qazna_core::error::AppError;

use crate::context::RequestContext;
use crate::extract::Json as JsonBody;
use crate::handlers::require_auth;
use crate::models::TokenPair;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenRequest {
    #[serde(default)]
    grant_type: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    // Development grant: mint a token for a literal subject.
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl TokenResponse {
    fn from_pair(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            token_type: "Bearer",
            expires_in: seconds_until(pair.access_expires_at),
            expires_at: pair.access_expires_at,
            refresh_token: Some(pair.refresh_token),
            refresh_expires_at: Some(pair.refresh_expires_at),
        }
    }

    pub(crate) fn access_only(token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: token,
            token_type: "Bearer",
            expires_in: seconds_until(expires_at),
            expires_at,
            refresh_token: None,
            refresh_expires_at: None,
        }
    }
}

fn seconds_until(expires_at: DateTime<Utc>) -> i64 {
    (expires_at - Utc::now()).num_seconds().max(0)
}

pub async fn token(
    State(state): State<AppState>,
    ctx: RequestContext,
    JsonBody(req): JsonBody<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();

    let grant = req.grant_type.as_deref().unwrap_or("").trim().to_lowercase();
    match grant.as_str() {
        "password" => {
            let email = req.email.as_deref().unwrap_or("").trim();
            let password = req.password.as_deref().unwrap_or("");
            if email.is_empty() || password.is_empty() {
                return Err(AppError::bad_request("email and password are required"));
            }
            let (pair, user) = auth.tokens.issue_token_pair(email, password).await?;
            auth.audit
                .record(
                    &ctx,
                    "auth.token.issue",
                    "user",
                    &user.id,
                    BTreeMap::from([("grant_type".to_string(), "password".to_string())]),
                )
                .await;
            Ok(Json(TokenResponse::from_pair(pair)))
        }
        "refresh_token" => {
            let refresh = req.refresh_token.as_deref().unwrap_or("").trim();
            if refresh.is_empty() {
                return Err(AppError::bad_request("refresh_token is required"));
            }
            let (pair, user) = auth.tokens.refresh_token_pair(refresh).await?;
            auth.audit
                .record(
                    &ctx,
                    "auth.token.refresh",
                    "user",
                    &user.id,
                    BTreeMap::from([("grant_type".to_string(), "refresh_token".to_string())]),
                )
                .await;
            Ok(Json(TokenResponse::from_pair(pair)))
        }
        "" => {
            // Development grant: {"user": "...", "roles": [...]}.
            let user = req.user.as_deref().unwrap_or("").trim();
            if user.is_empty() {
                return Err(AppError::bad_request("unsupported grant_type"));
            }
            let issued = auth.tokens.issue_for(user, &req.roles, None, vec![]).await?;
            auth.audit
                .record(
                    &ctx,
                    "auth.token.issue",
                    "user",
                    user,
                    BTreeMap::from([("grant_type".to_string(), "dev".to_string())]),
                )
                .await;
            Ok(Json(TokenResponse::access_only(issued.token, issued.expires_at)))
        }
        _ => Err(AppError::bad_request("unsupported grant_type")),
    }
}

pub async fn jwks(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?;
    let document = auth.keys.jwks().await?;
    Ok((StatusCode::OK, Json(document)))
}
