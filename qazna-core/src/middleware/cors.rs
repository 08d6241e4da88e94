use axum::{
    extract::Request,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

const ALLOWED_METHODS: &str = "GET,POST,OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Idempotency-Key, X-Request-Id, Authorization";

/// CORS policy: the origin is echoed only when it matches the allow-list,
/// or is local loopback when the list is empty. `OPTIONS` short-circuits
/// with 204 before reaching the rate limiter or handlers.
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        let allowed_origins = allowed_origins
            .into_iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        Self { allowed_origins }
    }

    fn allows(&self, origin: &str) -> bool {
        if !self.allowed_origins.is_empty() {
            return self.allowed_origins.iter().any(|allowed| allowed.eq_ignore_ascii_case(origin));
        }
        is_local_origin(origin)
    }
}

fn is_local_origin(origin: &str) -> bool {
    origin.starts_with("http://localhost:") || origin.starts_with("http://127.0.0.1:")
}

pub async fn cors_middleware(
    axum::extract::State(policy): axum::extract::State<Arc<CorsPolicy>>,
    req: Request,
    next: Next,
) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    let preflight = req.method() == Method::OPTIONS;
    let mut response =
        if preflight { StatusCode::NO_CONTENT.into_response() } else { next.run(req).await };

    let headers = response.headers_mut();
    if let Some(origin) = origin.filter(|o| policy.allows(o)) {
        if let Ok(value) = HeaderValue::from_str(&origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_allows_loopback_only() {
        let policy = CorsPolicy::new(vec![]);
        assert!(policy.allows("http://localhost:3000"));
        assert!(policy.allows("http://127.0.0.1:8080"));
        assert!(!policy.allows("https://evil.example"));
    }

    #[test]
    fn configured_list_is_exact_and_case_insensitive() {
        let policy = CorsPolicy::new(vec!["https://app.qazna.org".to_string(), " ".to_string()]);
        assert!(policy.allows("https://app.qazna.org"));
        assert!(policy.allows("HTTPS://APP.QAZNA.ORG"));
        assert!(!policy.allows("http://localhost:3000"));
    }
}
