use std::net::SocketAddr;
use std::time::Duration;

use qazna_core::config::{env_duration, env_flag, env_opt, env_string, env_u32};
use qazna_core::error::AppError;

pub const DEFAULT_HTTP_ADDR: &str = ":8080";
pub const DEFAULT_GRPC_ADDR: &str = ":9090";
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 400;
pub const DEFAULT_RATE_LIMIT_RPS: u32 = 200;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: SocketAddr,
    pub grpc_addr: SocketAddr,
    pub pg_dsn: Option<String>,
    pub ledger_grpc_addr: Option<String>,
    pub auth_private_key: Option<String>,
    pub auth_public_key: Option<String>,
    pub auth_key_id: Option<String>,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub allowed_origins: Vec<String>,
    pub rate_limit_burst: u32,
    pub rate_limit_rps: u32,
    pub stream_demo: bool,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_addr: parse_addr(DEFAULT_HTTP_ADDR).expect("valid default http addr"),
            grpc_addr: parse_addr(DEFAULT_GRPC_ADDR).expect("valid default grpc addr"),
            pg_dsn: None,
            ledger_grpc_addr: None,
            auth_private_key: None,
            auth_public_key: None,
            auth_key_id: None,
            issuer: crate::services::tokens::DEFAULT_ISSUER.to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(14 * 24 * 3600),
            allowed_origins: Vec::new(),
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            rate_limit_rps: DEFAULT_RATE_LIMIT_RPS,
            stream_demo: false,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = AppConfig::default();
        let config = AppConfig {
            http_addr: parse_addr(&env_string("QAZNA_HTTP_ADDR", DEFAULT_HTTP_ADDR))?,
            grpc_addr: parse_addr(&env_string("QAZNA_GRPC_ADDR", DEFAULT_GRPC_ADDR))?,
            pg_dsn: env_opt("QAZNA_PG_DSN"),
            ledger_grpc_addr: env_opt("QAZNA_LEDGER_GRPC_ADDR"),
            auth_private_key: env_opt("QAZNA_AUTH_PRIVATE_KEY"),
            auth_public_key: env_opt("QAZNA_AUTH_PUBLIC_KEY"),
            auth_key_id: env_opt("QAZNA_AUTH_KEY_ID"),
            issuer: env_string("QAZNA_AUTH_ISSUER", &defaults.issuer),
            access_ttl: env_duration("QAZNA_AUTH_ACCESS_TTL", defaults.access_ttl),
            refresh_ttl: env_duration("QAZNA_AUTH_REFRESH_TTL", defaults.refresh_ttl),
            allowed_origins: env_opt("QAZNA_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            rate_limit_burst: env_u32("QAZNA_RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST),
            rate_limit_rps: env_u32("QAZNA_RATE_LIMIT_RPS", DEFAULT_RATE_LIMIT_RPS),
            stream_demo: env_flag("QAZNA_STREAM_DEMO"),
            log_level: env_string("QAZNA_LOG_LEVEL", "info"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        match (&self.auth_private_key, &self.auth_public_key) {
            (Some(_), None) | (None, Some(_)) => Err(AppError::bad_request(
                "QAZNA_AUTH_PRIVATE_KEY and QAZNA_AUTH_PUBLIC_KEY must be set together",
            )),
            _ => Ok(()),
        }
    }
}

/// Accepts `host:port` or the Go-style `:port` shorthand.
fn parse_addr(raw: &str) -> Result<SocketAddr, AppError> {
    let raw = raw.trim();
    let candidate =
        if raw.starts_with(':') { format!("0.0.0.0{raw}") } else { raw.to_string() };
    candidate
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid listen address: {raw}")))
}
