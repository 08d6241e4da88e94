//! REST handlers. Permission checks happen here at the handler boundary;
//! the middleware stack has already authenticated the caller.

pub mod accounts;
pub mod auth;
pub mod oauth;
pub mod ops;
pub mod orgs;
pub mod roles;
pub mod stream;
pub mod transactions;
pub mod transfers;
pub mod users;

use std::collections::BTreeSet;

use qazna_core::error::AppError;

use crate::context::RequestContext;
use crate::ledger::LedgerError;
use crate::{AppState, AuthContext};

pub(crate) fn ledger_error(err: LedgerError) -> AppError {
    match err {
        LedgerError::InvalidAmount | LedgerError::InvalidCurrency => {
            AppError::bad_request(err.to_string())
        }
        LedgerError::InsufficientFunds => AppError::conflict(err.to_string()),
        LedgerError::NotFound => AppError::not_found(err.to_string()),
        LedgerError::Unavailable(_) => AppError::unavailable("ledger unavailable"),
        LedgerError::Storage(source) => AppError::Database(source),
    }
}

/// RBAC and token endpoints need the auth subsystem; absent means 503.
pub(crate) fn require_auth(state: &AppState) -> Result<&AuthContext, AppError> {
    state.auth.as_ref().ok_or_else(|| AppError::unavailable("authentication service unavailable"))
}

/// Require every listed permission. Grants come from the RBAC join plus any
/// permission claims embedded in the token; the `admin` role short-circuits
/// (development tokens carry it).
pub(crate) async fn ensure_permissions(
    state: &AppState,
    ctx: &RequestContext,
    permissions: &[&str],
) -> Result<(), AppError> {
    let Some(auth) = &state.auth else {
        return Ok(());
    };
    let Some(actor) = &ctx.actor else {
        return Err(AppError::unauthorized("authentication required"));
    };
    if actor.has_role("admin") {
        return Ok(());
    }

    let mut granted: BTreeSet<String> = actor.token_permissions.iter().cloned().collect();
    granted.extend(auth.rbac.user_permissions(&actor.user_id).await?);

    for permission in permissions {
        if !granted.contains(*permission) {
            return Err(AppError::forbidden("insufficient_scope"));
        }
    }
    Ok(())
}
