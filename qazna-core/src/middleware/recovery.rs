use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

use crate::error::error_response;
use crate::middleware::request_id;

/// Recover from handler panics: log once at error level and answer 500.
/// Internal code prefers result-returning APIs; this is a boundary only.
pub async fn recovery_middleware(req: Request, next: Next) -> Response {
    let rid = request_id(&req);

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            tracing::error!(
                request_id = rid.as_deref().unwrap_or(""),
                panic = %detail,
                "panic_recovered"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error", rid.as_deref())
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
