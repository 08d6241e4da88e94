use std::env;
use std::time::Duration;

use crate::error::AppError;

/// Read an environment variable, falling back to a default.
pub fn env_string(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(val) if !val.trim().is_empty() => val.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Read an optional environment variable, treating blanks as absent.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Read a positive integer, falling back to the default on absence or junk.
pub fn env_u32(key: &str, default: u32) -> u32 {
    match env_opt(key).and_then(|v| v.parse::<u32>().ok()) {
        Some(val) if val > 0 => val,
        _ => default,
    }
}

/// Read a boolean flag (`1`/`true`, case-insensitive).
pub fn env_flag(key: &str) -> bool {
    matches!(
        env_opt(key).map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("1") | Some("true")
    )
}

/// Parse a duration written either as bare seconds (`900`) or with a
/// `s`/`m`/`h`/`d` suffix (`15m`, `48h`).
pub fn parse_duration(raw: &str) -> Result<Duration, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::bad_request("duration is empty"));
    }
    let (value, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], Some(c.to_ascii_lowercase())),
        _ => (raw, None),
    };
    let value: u64 = value
        .trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid duration: {raw}")))?;
    let seconds = match unit {
        None | Some('s') => value,
        Some('m') => value * 60,
        Some('h') => value * 3600,
        Some('d') => value * 86_400,
        Some(other) => {
            return Err(AppError::bad_request(format!("unknown duration unit: {other}")))
        }
    };
    Ok(Duration::from_secs(seconds))
}

/// Read a duration from the environment, falling back to the default.
pub fn env_duration(key: &str, default: Duration) -> Duration {
    match env_opt(key) {
        Some(raw) => parse_duration(&raw).unwrap_or(default),
        None => default,
    }
}
