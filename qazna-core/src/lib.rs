//! Shared plumbing for the Qazna monetary coordination service.
//!
//! Hosts the error taxonomy, environment configuration helpers, the HTTP
//! middleware stack, Prometheus metrics, and identifier generation used by
//! the service crates.

pub mod config;
pub mod error;
pub mod ids;
pub mod middleware;
pub mod observability;
