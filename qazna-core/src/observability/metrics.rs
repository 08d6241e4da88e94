//! Prometheus metrics shared across the HTTP and gRPC surfaces.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};

/// Request counter by method, canonical path, and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests.",
        &["method", "path", "status"]
    )
    .expect("register http_requests_total")
});

/// Request latency histogram by method, canonical path, and status.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds.",
        &["method", "path", "status"]
    )
    .expect("register http_request_duration_seconds")
});

/// In-flight HTTP requests.
pub static HTTP_INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("http_inflight_requests", "In-flight HTTP requests.")
        .expect("register http_inflight_requests")
});

/// Readiness state (1 when ready).
pub static READY: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("qazna_ready", "Readiness state (1 when ready).")
        .expect("register qazna_ready")
});

static BUILD_INFO: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "qazna_build_info",
        "Build metadata (value fixed at 1).",
        &["version", "commit"]
    )
    .expect("register qazna_build_info")
});

/// Force registration of all metrics and reset the readiness gauge.
pub fn init() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&HTTP_INFLIGHT);
    Lazy::force(&READY);
    READY.set(0);
}

/// Publish the build-info metric once at startup.
pub fn init_build_info(version: &str, commit: &str) {
    BUILD_INFO.with_label_values(&[version, commit]).set(1);
}

pub fn set_ready(state: bool) {
    READY.set(if state { 1 } else { 0 });
}

/// Render all registered metrics in Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}

/// Collapse identifier path segments into `:id`-style labels so metric
/// cardinality stays bounded.
pub fn canonical_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    match path {
        "/" | "/metrics" | "/healthz" | "/readyz" | "/v1/info" | "/openapi.yaml" => {
            return path.to_string()
        }
        _ => {}
    }
    if let Some(rest) = path.strip_prefix("/v1/accounts/") {
        if let Some(id) = rest.strip_suffix("/balance") {
            if !id.contains('/') {
                return "/v1/accounts/:id/balance".to_string();
            }
        }
        if !rest.contains('/') {
            return "/v1/accounts/:id".to_string();
        }
    }
    if let Some(rest) = path.strip_prefix("/v1/organizations/") {
        let rest = rest.trim_end_matches('/');
        let mut parts = rest.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(_), None, _) => return "/v1/organizations/:id".to_string(),
            (Some(_), Some("users"), None) => return "/v1/organizations/:id/users".to_string(),
            (Some(_), Some("roles"), None) => return "/v1/organizations/:id/roles".to_string(),
            _ => {}
        }
    }
    if let Some(rest) = path.strip_prefix("/v1/roles/") {
        let rest = rest.trim_end_matches('/');
        let mut parts = rest.split('/');
        if let (Some(_), Some("permissions"), None) = (parts.next(), parts.next(), parts.next()) {
            return "/v1/roles/:id/permissions".to_string();
        }
    }
    if let Some(rest) = path.strip_prefix("/v1/users/") {
        let rest = rest.trim_end_matches('/');
        let mut parts = rest.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some("assignments"), None, _) => {
                return "/v1/users/:id/assignments".to_string()
            }
            (Some(_), Some("assignments"), Some(_), None) => {
                return "/v1/users/:id/assignments/:role_id".to_string()
            }
            _ => {}
        }
    }
    if path.starts_with("/v1/ledger/transactions") {
        return "/v1/ledger/transactions".to_string();
    }
    if path.starts_with("/v1/transfers") {
        return "/v1/transfers".to_string();
    }
    path.to_string()
}
