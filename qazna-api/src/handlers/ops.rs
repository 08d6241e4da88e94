use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;

use qazna_core::observability::metrics::{gather, set_ready};

use crate::{AppState, SERVICE_NAME};

pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": state.version,
    }))
}

pub async fn readyz(State(state): State<AppState>) -> Response {
    match state.readiness.check().await {
        Ok(()) => {
            set_ready(true);
            Json(json!({ "status": "ready" })).into_response()
        }
        Err(err) => {
            set_ready(false);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not_ready", "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": SERVICE_NAME,
        "time": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "version": state.version,
    }))
}

pub async fn metrics() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        gather(),
    )
        .into_response()
}
