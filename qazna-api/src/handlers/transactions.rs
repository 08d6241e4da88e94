use axum::{extract::State, response::IntoResponse, Json};
use axum::extract::Query;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qazna_core::error::AppError;

use crate::context::RequestContext;
use crate::handlers::ledger_error;
use crate::ledger::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use crate::models::Transaction;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    pub items: Vec<Transaction>,
    pub next_after: u64,
    pub as_of: DateTime<Utc>,
}

pub async fn list(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = parse_limit(query.limit.as_deref())?;
    let after = parse_after(query.after.as_deref())?;

    let (items, next_after) =
        state.ledger.list_transactions(&ctx, limit, after).await.map_err(ledger_error)?;

    Ok(Json(ListTransactionsResponse { items, next_after, as_of: Utc::now() }))
}

fn parse_limit(raw: Option<&str>) -> Result<usize, AppError> {
    let raw = raw.unwrap_or("").trim();
    if raw.is_empty() {
        return Ok(DEFAULT_LIST_LIMIT);
    }
    let value: i64 =
        raw.parse().map_err(|_| AppError::bad_request("limit must be an integer"))?;
    if value < 1 || value as usize > MAX_LIST_LIMIT {
        return Err(AppError::bad_request("limit must be between 1 and 1000"));
    }
    Ok(value as usize)
}

fn parse_after(raw: Option<&str>) -> Result<u64, AppError> {
    let raw = raw.unwrap_or("").trim();
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse().map_err(|_| AppError::bad_request("after must be a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_parsing() {
        assert_eq!(parse_limit(None).unwrap(), DEFAULT_LIST_LIMIT);
        assert_eq!(parse_limit(Some("")).unwrap(), DEFAULT_LIST_LIMIT);
        assert_eq!(parse_limit(Some("10")).unwrap(), 10);
        assert_eq!(parse_limit(Some("1000")).unwrap(), 1000);
        assert!(parse_limit(Some("0")).is_err());
        assert!(parse_limit(Some("1001")).is_err());
        assert!(parse_limit(Some("ten")).is_err());
    }

    #[test]
    fn after_parsing() {
        assert_eq!(parse_after(None).unwrap(), 0);
        assert_eq!(parse_after(Some("42")).unwrap(), 42);
        assert!(parse_after(Some("-1")).is_err());
        assert!(parse_after(Some("later")).is_err());
    }
}
