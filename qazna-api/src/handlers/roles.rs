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
use crate::services::rbac::{PERM_MANAGE_PERMISSIONS, PERM_MANAGE_ROLES};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoleRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPermissionsRequest {
    #[serde(default)]
    permissions: Vec<String>,
}

pub async fn create(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(org_id): Path<String>,
    JsonBody(req): JsonBody<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_ROLES]).await?;

    let role = auth.rbac.create_role(&org_id, &req.name, &req.description).await?;
    auth.audit
        .record(
            &ctx,
            "rbac.role.create",
            "role",
            &role.id,
            BTreeMap::from([
                ("organization_id".to_string(), role.organization_id.clone()),
                ("name".to_string(), role.name.clone()),
            ]),
        )
        .await;

    let location = format!("/v1/roles/{}", role.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(role)))
}

pub async fn list(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(org_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?;
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_ROLES]).await?;
    let roles = auth.rbac.list_roles(&org_id).await?;
    Ok(Json(roles))
}

pub async fn set_permissions(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(role_id): Path<String>,
    JsonBody(req): JsonBody<SetPermissionsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_PERMISSIONS]).await?;

    auth.rbac.set_role_permissions(&role_id, &req.permissions).await?;
    auth.audit
        .record(
            &ctx,
            "rbac.role.permissions.update",
            "role",
            role_id.trim(),
            BTreeMap::from([("count".to_string(), req.permissions.len().to_string())]),
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}
