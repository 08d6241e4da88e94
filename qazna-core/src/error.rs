use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Service-wide error taxonomy. Transport layers map these at the edge;
/// underlying storage errors are wrapped and never leak driver text.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(anyhow::Error),

    /// Missing or malformed credentials.
    #[error("{0}")]
    Unauthorized(anyhow::Error),

    /// Credentials were presented but failed validation.
    #[error("{0}")]
    InvalidToken(anyhow::Error),

    /// Authenticated but lacking a required permission.
    #[error("{0}")]
    Forbidden(anyhow::Error),

    #[error("{0}")]
    NotFound(anyhow::Error),

    #[error("{0}")]
    Conflict(anyhow::Error),

    #[error("rate limit exceeded")]
    TooManyRequests { retry_after: u64 },

    #[error("{0}")]
    Unavailable(anyhow::Error),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),

    #[error("database error")]
    Database(#[source] anyhow::Error),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(anyhow::anyhow!(msg.into()))
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(anyhow::anyhow!(msg.into()))
    }

    pub fn invalid_token(msg: impl Into<String>) -> Self {
        AppError::InvalidToken(anyhow::anyhow!(msg.into()))
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(anyhow::anyhow!(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(anyhow::anyhow!(msg.into()))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(anyhow::anyhow!(msg.into()))
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        AppError::Unavailable(anyhow::anyhow!(msg.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
}

/// Build the uniform JSON error envelope. Middleware that has the request ID
/// at hand passes it; handler-level errors omit it.
pub fn error_response(status: StatusCode, message: &str, request_id: Option<&str>) -> Response {
    let mut response = (status, Json(ErrorBody { error: message, request_id })).into_response();
    decorate(&mut response, status, None);
    response
}

fn decorate(response: &mut Response, status: StatusCode, retry_after: Option<u64>) {
    let headers = response.headers_mut();
    match status {
        StatusCode::UNAUTHORIZED => {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Bearer realm="qazna", error="invalid_token""#),
            );
        }
        StatusCode::FORBIDDEN => {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Bearer realm="qazna", error="insufficient_scope""#),
            );
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let retry = retry_after.unwrap_or(1);
            if let Ok(value) = HeaderValue::from_str(&retry.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
        }
        _ => {}
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal causes are logged, not surfaced.
        let message = match &self {
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                "internal error".to_string()
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                "storage error".to_string()
            }
            other => other.to_string(),
        };

        let retry_after = match &self {
            AppError::TooManyRequests { retry_after } => Some(*retry_after),
            _ => None,
        };

        let mut response =
            (status, Json(ErrorBody { error: &message, request_id: None })).into_response();
        decorate(&mut response, status, retry_after);

        if let AppError::Unauthorized(_) = self {
            // Missing credentials use the invalid_request error code.
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Bearer realm="qazna", error="invalid_request""#),
            );
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::invalid_token("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::TooManyRequests { retry_after: 1 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AppError::unavailable("x").status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn unauthorized_carries_challenge() {
        let response = AppError::unauthorized("missing bearer token").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(challenge.contains("invalid_request"));
    }

    #[test]
    fn invalid_token_carries_challenge() {
        let response = AppError::invalid_token("invalid token").into_response();
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(challenge.contains("invalid_token"));
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let response = AppError::TooManyRequests { retry_after: 1 }.into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("1")
        );
    }
}
