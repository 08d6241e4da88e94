use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;

use qazna_core::error::AppError;

use crate::context::RequestContext;
use crate::extract::Json as JsonBody;
use crate::handlers::{ensure_permissions, ledger_error};
use crate::models::ledger::{MAX_ACCOUNT_ID_LEN, MAX_IDEMPOTENCY_KEY_LEN};
use crate::models::Money;
use crate::services::rbac::PERM_LEDGER_TRANSFER;
use crate::stream::TransferEvent;
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferRequest {
    #[serde(default)]
    from_id: String,
    #[serde(default)]
    to_id: String,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    idempotency_key: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    JsonBody(req): JsonBody<TransferRequest>,
) -> Result<impl IntoResponse, AppError> {
    ensure_permissions(&state, &ctx, &[PERM_LEDGER_TRANSFER]).await?;

    let header_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if header_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::bad_request("Idempotency-Key must be at most 128 characters"));
    }

    let body_key = req.idempotency_key.as_deref().map(str::trim).unwrap_or("");
    if body_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::bad_request("idempotency_key must be at most 128 characters"));
    }
    let idempotency_key = match (header_key, body_key) {
        ("", "") => "",
        (header, "") => header,
        ("", body) => body,
        (header, body) if header == body => header,
        _ => {
            return Err(AppError::bad_request(
                "Idempotency-Key header and body value must match",
            ))
        }
    };

    let from_id = req.from_id.trim();
    let to_id = req.to_id.trim();
    if from_id.is_empty() || to_id.is_empty() {
        return Err(AppError::bad_request("from_id and to_id are required"));
    }
    if from_id.len() > MAX_ACCOUNT_ID_LEN || to_id.len() > MAX_ACCOUNT_ID_LEN {
        return Err(AppError::bad_request("account ids must be at most 64 characters"));
    }
    let currency = req.currency.trim();
    if currency.is_empty() {
        return Err(AppError::bad_request("currency is required"));
    }
    if req.amount <= 0 {
        return Err(AppError::bad_request("amount must be > 0"));
    }

    let started_at = Utc::now();
    let tx = state
        .ledger
        .transfer(
            &ctx,
            from_id,
            to_id,
            Money::new(currency.to_uppercase(), req.amount),
            if idempotency_key.is_empty() { None } else { Some(idempotency_key) },
        )
        .await
        .map_err(ledger_error)?;

    if let Some(auth) = &state.auth {
        // A replayed transfer hands back a record minted before this request.
        let action = if tx.created_at > started_at {
            "ledger.transfer.execute"
        } else {
            "ledger.transfer.idempotent_replay"
        };
        auth.audit
            .record(
                &ctx,
                action,
                "transaction",
                &tx.id,
                BTreeMap::from([
                    ("currency".to_string(), tx.currency.clone()),
                    ("amount".to_string(), tx.amount.to_string()),
                ]),
            )
            .await;
    }

    state.stream.publish(TransferEvent {
        from: tx.from_account_id.clone(),
        to: tx.to_account_id.clone(),
        amount: tx.amount,
        currency: tx.currency.clone(),
        timestamp: Utc::now(),
    });

    let mut response = (StatusCode::CREATED, Json(tx)).into_response();
    if !idempotency_key.is_empty() {
        if let Ok(value) = HeaderValue::from_str(idempotency_key) {
            response.headers_mut().insert(IDEMPOTENCY_KEY_HEADER, value);
        }
    }
    Ok(response)
}
