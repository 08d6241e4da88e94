use axum::{extract::Request, http::header, middleware::Next, response::Response};

// CSP tuned for the documentation assets (ReDoc worker/img/jsdelivr).
const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
img-src 'self' data: https://cdn.redoc.ly https://*.tile.openstreetmap.org; \
style-src 'self' 'unsafe-inline' https://cdn.jsdelivr.net; \
script-src 'self' https://cdn.jsdelivr.net; \
connect-src 'self' https://cdn.jsdelivr.net; \
worker-src 'self' blob:; \
frame-ancestors 'none'";

pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(header::X_CONTENT_TYPE_OPTIONS, header::HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, header::HeaderValue::from_static("DENY"));
    headers.insert(header::X_XSS_PROTECTION, header::HeaderValue::from_static("0"));
    headers.insert(header::REFERRER_POLICY, header::HeaderValue::from_static("no-referrer"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        header::HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );

    response
}
