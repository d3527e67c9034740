//! Process configuration, read from `FINBACK_*` environment variables.

use std::net::SocketAddr;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub bind_addr: SocketAddr,
    /// Global switch for external event delivery.
    pub external_events_enabled: bool,
    /// Request header carrying the idempotency key.
    pub idempotency_key_header: String,
    /// Largest response body the replay coordinator will buffer.
    pub max_capture_bytes: usize,
    pub json_logs: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            external_events_enabled: true,
            idempotency_key_header: DEFAULT_IDEMPOTENCY_HEADER.to_string(),
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
            json_logs: true,
        }
    }
}

impl PlatformConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind_addr = match lookup("FINBACK_BIND_ADDR") {
            Some(v) => v.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "FINBACK_BIND_ADDR",
                value: v.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.bind_addr,
        };

        let external_events_enabled = match lookup("FINBACK_EXTERNAL_EVENTS_ENABLED") {
            Some(v) => parse_bool("FINBACK_EXTERNAL_EVENTS_ENABLED", &v)?,
            None => defaults.external_events_enabled,
        };

        let idempotency_key_header = match lookup("FINBACK_IDEMPOTENCY_HEADER") {
            Some(v) if is_header_name(&v) => v,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    var: "FINBACK_IDEMPOTENCY_HEADER",
                    value: v,
                    reason: "not a valid header name".to_string(),
                });
            }
            None => defaults.idempotency_key_header,
        };

        let max_capture_bytes = match lookup("FINBACK_MAX_CAPTURE_BYTES") {
            Some(v) => v.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                var: "FINBACK_MAX_CAPTURE_BYTES",
                value: v.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.max_capture_bytes,
        };

        let json_logs = match lookup("FINBACK_LOG_JSON") {
            Some(v) => parse_bool("FINBACK_LOG_JSON", &v)?,
            None => defaults.json_logs,
        };

        Ok(Self {
            bind_addr,
            external_events_enabled,
            idempotency_key_header,
            max_capture_bytes,
            json_logs,
        })
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn is_header_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
