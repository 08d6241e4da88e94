//! Bearer-token extraction. Public paths bypass authentication entirely;
//! everything else needs a valid access token, whose identity is attached
//! to the request as an [`Actor`].

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};

use qazna_core::error::error_response;
use qazna_core::middleware::request_id;

use crate::context::Actor;
use crate::AppState;

const PUBLIC_PATHS: &[&str] = &[
    "/v1/auth/token",
    "/v1/auth/oauth/token",
    "/v1/auth/oauth/authorize",
    "/metrics",
    "/healthz",
    "/readyz",
    "/openapi.yaml",
    "/",
];
const PUBLIC_PREFIXES: &[&str] = &["/assets/"];

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(auth) = state.auth.clone() else {
        return next.run(req).await;
    };

    if req.method() == Method::OPTIONS || is_public_path(req.uri().path()) {
        return next.run(req).await;
    }

    let rid = request_id(&req);
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let token = match extract_bearer_token(header_value) {
        Ok(token) => token,
        Err(message) => return unauthorized(message, "invalid_request", rid.as_deref()),
    };

    let claims = match auth.tokens.parse_and_validate(token).await {
        Ok(claims) => claims,
        Err(_) => return unauthorized("invalid token", "invalid_token", rid.as_deref()),
    };

    req.extensions_mut().insert(Actor {
        user_id: claims.sub,
        org_id: claims.org,
        roles: claims.roles,
        token_permissions: claims.permissions,
    });

    next.run(req).await
}

fn unauthorized(message: &str, error_code: &str, request_id: Option<&str>) -> Response {
    let mut response = error_response(StatusCode::UNAUTHORIZED, message, request_id);
    let challenge = format!(r#"Bearer realm="qazna", error="{error_code}""#);
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// Pull the token out of `Authorization: Bearer <token>`; the scheme match
/// is case-insensitive.
pub fn extract_bearer_token(header: &str) -> Result<&str, &'static str> {
    let header = header.trim();
    if header.is_empty() {
        return Err("missing bearer token");
    }
    let (scheme, rest) = header.split_once(' ').ok_or("invalid authorization scheme")?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err("invalid authorization scheme");
    }
    let token = rest.trim();
    if token.is_empty() {
        return Err("missing bearer token");
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer_token("Bearer abc"), Ok("abc"));
        assert_eq!(extract_bearer_token("bearer abc"), Ok("abc"));
        assert_eq!(extract_bearer_token("BEARER  abc "), Ok("abc"));
        assert!(extract_bearer_token("").is_err());
        assert!(extract_bearer_token("Basic abc").is_err());
        assert!(extract_bearer_token("Bearer ").is_err());
        assert!(extract_bearer_token("Bearer").is_err());
    }

    #[test]
    fn public_paths() {
        for path in [
            "/",
            "/healthz",
            "/readyz",
            "/metrics",
            "/openapi.yaml",
            "/v1/auth/token",
            "/v1/auth/oauth/token",
            "/v1/auth/oauth/authorize",
            "/assets/app.css",
        ] {
            assert!(is_public_path(path), "{path} should be public");
        }
        for path in ["/v1/accounts", "/v1/transfers", "/v1/organizations", "/v1/stream"] {
            assert!(!is_public_path(path), "{path} should require auth");
        }
    }
}
