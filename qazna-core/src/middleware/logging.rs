use axum::{extract::Request, middleware::Next, response::Response};
use http_body::Body as _;
use std::time::Instant;

use crate::middleware::{client_ip, request_id};
use crate::observability::metrics::canonical_path;

/// Emit one structured JSON line per request after the response completes.
pub async fn request_logging_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = canonical_path(req.uri().path());
    let rid = request_id(&req).unwrap_or_default();
    let remote_ip = client_ip(&req);
    let user_agent = header_string(&req, "user-agent");
    let referer = header_string(&req, "referer");

    let start = Instant::now();
    let response = next.run(req).await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let status = response.status().as_u16();
    let bytes = response.body().size_hint().exact().unwrap_or(0);

    tracing::info!(
        request_id = %rid,
        method = %method,
        path = %path,
        status = status,
        duration_ms = duration_ms,
        bytes = bytes,
        remote_ip = remote_ip.as_deref().unwrap_or(""),
        user_agent = user_agent.as_deref().unwrap_or(""),
        referer = referer.as_deref().unwrap_or(""),
        "request_complete"
    );

    response
}

fn header_string(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}
