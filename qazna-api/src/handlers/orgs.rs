use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use qazna_core::error::AppError;

use crate::context::RequestContext;
use crate::extract::Json as JsonBody;
use crate::handlers::{ensure_permissions, require_auth};
use crate::services::rbac::PERM_MANAGE_ORGANIZATIONS;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateOrganizationRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateOrganizationRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

pub async fn create(
    State(state): State<AppState>,
    ctx: RequestContext,
    JsonBody(req): JsonBody<CreateOrganizationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_ORGANIZATIONS]).await?;

    let org = auth.rbac.create_organization(&req.name, req.metadata).await?;
    auth.audit
        .record(
            &ctx,
            "rbac.organization.create",
            "organization",
            &org.id,
            BTreeMap::from([("name".to_string(), org.name.clone())]),
        )
        .await;

    let location = format!("/v1/organizations/{}", org.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(org)))
}

pub async fn list(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?;
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_ORGANIZATIONS]).await?;
    let orgs = auth.rbac.list_organizations().await?;
    Ok(Json(orgs))
}

pub async fn get(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?;
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_ORGANIZATIONS]).await?;
    let org = auth.rbac.get_organization(&id).await?;
    Ok(Json(org))
}

pub async fn update(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UpdateOrganizationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_ORGANIZATIONS]).await?;

    let org = auth.rbac.update_organization(&id, req.name, req.metadata).await?;
    auth.audit
        .record(
            &ctx,
            "rbac.organization.update",
            "organization",
            &org.id,
            BTreeMap::from([("name".to_string(), org.name.clone())]),
        )
        .await;
    Ok(Json(org))
}

pub async fn delete(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let auth = require_auth(&state)?.clone();
    ensure_permissions(&state, &ctx, &[PERM_MANAGE_ORGANIZATIONS]).await?;

    auth.rbac.delete_organization(&id).await?;
    auth.audit
        .record(&ctx, "rbac.organization.delete", "organization", id.trim(), BTreeMap::new())
        .await;
    Ok(StatusCode::NO_CONTENT)
}
