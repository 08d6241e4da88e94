use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::collections::BTreeMap;

use qazna_core::error::AppError;

use crate::context::RequestContext;
use crate::extract::Json as JsonBody;
use crate::handlers::{ensure_permissions, require_auth};
use crate::services::rbac::PERM_MANAGE_USERS;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignRoleRequest {
    #[serde(default)]
    role_id: String,
}

pub async fn create(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(org_id): Path<String>,
    JsonBody(req): JsonBody<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_USERS]).await?;

    let user = auth.rbac.create_user(&org_id, &req.email, &req.password, &req.status).await?;
    auth.audit
        .record(
            &ctx,
            "rbac.user.create",
            "user",
            &user.id,
            BTreeMap::from([
                ("organization_id".to_string(), user.organization_id.clone()),
                ("email".to_string(), user.email.clone()),
            ]),
        )
        .await;

    let location = format!("/v1/users/{}", user.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(user)))
}

pub async fn list(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(org_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?;
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_USERS]).await?;
    let users = auth.rbac.list_users(&org_id).await?;
    Ok(Json(users))
}

pub async fn assign_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<String>,
    JsonBody(req): JsonBody<AssignRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_USERS]).await?;

    if req.role_id.trim().is_empty() {
        return Err(AppError::bad_request("role_id is required"));
    }
    let assignment = auth.rbac.assign_role_to_user(&user_id, &req.role_id).await?;
    auth.audit
        .record(
            &ctx,
            "rbac.user.assign_role",
            "user",
            &assignment.user_id,
            BTreeMap::from([("role_id".to_string(), assignment.role_id.clone())]),
        )
        .await;
    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn list_assignments(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?;
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_USERS]).await?;
    let assignments = auth.rbac.list_assignments(&user_id).await?;
    Ok(Json(assignments))
}

pub async fn unassign_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((user_id, role_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_USERS]).await?;

    auth.rbac.unassign_role(&user_id, &role_id).await?;
    auth.audit
        .record(
            &ctx,
            "rbac.user.unassign_role",
            "user",
            user_id.trim(),
            BTreeMap::from([("role_id".to_string(), role_id.trim().to_string())]),
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}
