use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::collections::BTreeMap;

use qazna_core::error::AppError;

use crate::context::RequestContext;
use crate::extract::Json as JsonBody;
use crate::handlers::{ensure_permissions, ledger_error};
use crate::models::ledger::MAX_ACCOUNT_ID_LEN;
use crate::models::Money;
use crate::services::rbac::PERM_LEDGER_ACCOUNT_CREATE;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAccountRequest {
    #[serde(default)]
    currency: String,
    #[serde(default)]
    initial_amount: i64,
}

pub async fn create(
    State(state): State<AppState>,
    ctx: RequestContext,
    JsonBody(req): JsonBody<CreateAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    ensure_permissions(&state, &ctx, &[PERM_LEDGER_ACCOUNT_CREATE]).await?;

    let currency = req.currency.trim();
    if currency.is_empty() {
        return Err(AppError::bad_request("currency is required"));
    }
    if req.initial_amount < 0 {
        return Err(AppError::bad_request("initial_amount must be >= 0"));
    }

    let account = state
        .ledger
        .create_account(&ctx, Money::new(currency.to_uppercase(), req.initial_amount))
        .await
        .map_err(ledger_error)?;

    if let Some(auth) = &state.auth {
        auth.audit
            .record(&ctx, "ledger.account.create", "account", &account.id, BTreeMap::new())
            .await;
    }

    let location = format!("/v1/accounts/{}", account.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(account)))
}

pub async fn get(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = id.trim();
    if id.is_empty() || id.len() > MAX_ACCOUNT_ID_LEN {
        return Err(AppError::not_found("account not found"));
    }
    let account = state.ledger.get_account(&ctx, id).await.map_err(ledger_error)?;
    Ok(Json(account))
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    #[serde(default)]
    currency: Option<String>,
}

pub async fn balance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Query(query): Query<BalanceQuery>,
) -> Result<impl IntoResponse, AppError> {
    let currency = query.currency.as_deref().unwrap_or("").trim().to_uppercase();
    if currency.is_empty() {
        return Err(AppError::bad_request("currency query parameter is required"));
    }
    let money = state
        .ledger
        .get_balance(&ctx, id.trim(), &currency)
        .await
        .map_err(ledger_error)?;
    Ok(Json(money))
}
