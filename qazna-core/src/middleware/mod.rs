pub mod cors;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;
pub mod security_headers;

use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

use crate::middleware::request_id::RequestId;

/// Fetch the request ID stored by the request-ID middleware, if any.
pub fn request_id(req: &Request) -> Option<String> {
    req.extensions().get::<RequestId>().map(|rid| rid.0.clone())
}

/// Derive the client IP: first entry of `X-Forwarded-For` when present,
/// otherwise the connection peer.
pub fn client_ip(req: &Request) -> Option<String> {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(forwarded.to_string());
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}
