use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::{
    canonical_path, HTTP_INFLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// Innermost instrumentation layer: in-flight gauge, latency histogram, and
/// request counter labeled by `(method, canonical_path, status)`.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = canonical_path(req.uri().path());

    HTTP_INFLIGHT.inc();
    let start = Instant::now();

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [method.as_str(), path.as_str(), status.as_str()];
    HTTP_REQUEST_DURATION.with_label_values(&labels).observe(duration);
    HTTP_REQUESTS_TOTAL.with_label_values(&labels).inc();
    HTTP_INFLIGHT.dec();

    response
}
