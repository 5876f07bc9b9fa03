//! Runtime configuration.
//!
//! Defaults match a local dialogue engine on port 5005. Every field can be
//! overridden through `CHATBRIDGE_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::logging::LogFormat;

pub const DEFAULT_HTTP_PORT: u16 = 8000;
pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:5005/webhooks/rest/webhook";
pub const DEFAULT_ENGINE_HEALTH_URL: &str = "http://127.0.0.1:5005/health";
pub const DEFAULT_SLOT_POOL_SIZE: u32 = 10;
pub const DEFAULT_SLOT_TTL_SECS: i64 = 15 * 60;
pub const DEFAULT_OTP_TTL_SECS: i64 = 5 * 60;
pub const DEFAULT_OTP_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_OTP_FIXED_CODE: &str = "000000";

const ENV_HTTP_PORT: &str = "CHATBRIDGE_HTTP_PORT";
const ENV_DATABASE_PATH: &str = "CHATBRIDGE_DATABASE_PATH";
const ENV_ENGINE_URL: &str = "CHATBRIDGE_ENGINE_URL";
const ENV_ENGINE_HEALTH_URL: &str = "CHATBRIDGE_ENGINE_HEALTH_URL";
const ENV_SLOT_POOL_SIZE: &str = "CHATBRIDGE_SLOT_POOL_SIZE";
const ENV_SLOT_TTL_SECS: &str = "CHATBRIDGE_SLOT_TTL_SECS";
const ENV_OTP_TTL_SECS: &str = "CHATBRIDGE_OTP_TTL_SECS";
const ENV_OTP_MAX_ATTEMPTS: &str = "CHATBRIDGE_OTP_MAX_ATTEMPTS";
const ENV_OTP_FIXED_CODE: &str = "CHATBRIDGE_OTP_FIXED_CODE";
const ENV_OTP_GATE: &str = "CHATBRIDGE_OTP_GATE";
const ENV_LOG_FORMAT: &str = "CHATBRIDGE_LOG_FORMAT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Dialogue engine endpoints and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub webhook_url: String,
    pub health_url: String,
    pub timeout: Duration,
    pub health_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            webhook_url: DEFAULT_ENGINE_URL.to_string(),
            health_url: DEFAULT_ENGINE_HEALTH_URL.to_string(),
            timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
        }
    }
}

/// Admission pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    pub pool_size: u32,
    pub ttl: chrono::Duration,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_SLOT_POOL_SIZE,
            ttl: chrono::Duration::seconds(DEFAULT_SLOT_TTL_SECS),
        }
    }
}

/// Passcode issuance and the chat gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpConfig {
    pub ttl: chrono::Duration,
    pub max_attempts: u32,
    /// Code handed out for every issuance. `None` means random codes.
    pub fixed_code: Option<String>,
    /// Require a verified passcode before chat turns reach the engine.
    pub gate_enabled: bool,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::seconds(DEFAULT_OTP_TTL_SECS),
            max_attempts: DEFAULT_OTP_MAX_ATTEMPTS,
            fixed_code: Some(DEFAULT_OTP_FIXED_CODE.to_string()),
            gate_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub http_port: u16,
    /// Database file; `None` uses the platform data directory.
    pub database_path: Option<PathBuf>,
    pub engine: EngineConfig,
    pub slots: SlotConfig,
    pub otp: OtpConfig,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            database_path: None,
            engine: EngineConfig::default(),
            slots: SlotConfig::default(),
            otp: OtpConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(v) = get(ENV_HTTP_PORT) {
            config.http_port = parse(ENV_HTTP_PORT, &v, "a port number")?;
        }
        if let Some(v) = get(ENV_DATABASE_PATH) {
            config.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_ENGINE_URL) {
            config.engine.webhook_url = v;
        }
        if let Some(v) = get(ENV_ENGINE_HEALTH_URL) {
            config.engine.health_url = v;
        }
        if let Some(v) = get(ENV_SLOT_POOL_SIZE) {
            let size: u32 = parse(ENV_SLOT_POOL_SIZE, &v, "a positive integer")?;
            if size == 0 {
                return Err(invalid(ENV_SLOT_POOL_SIZE, "a positive integer", &v));
            }
            config.slots.pool_size = size;
        }
        if let Some(v) = get(ENV_SLOT_TTL_SECS) {
            config.slots.ttl = positive_seconds(ENV_SLOT_TTL_SECS, &v)?;
        }
        if let Some(v) = get(ENV_OTP_TTL_SECS) {
            config.otp.ttl = positive_seconds(ENV_OTP_TTL_SECS, &v)?;
        }
        if let Some(v) = get(ENV_OTP_MAX_ATTEMPTS) {
            let attempts: u32 = parse(ENV_OTP_MAX_ATTEMPTS, &v, "a positive integer")?;
            if attempts == 0 {
                return Err(invalid(ENV_OTP_MAX_ATTEMPTS, "a positive integer", &v));
            }
            config.otp.max_attempts = attempts;
        }
        // Set but blank switches to random codes.
        if let Some(raw) = lookup(ENV_OTP_FIXED_CODE) {
            let code = raw.trim().to_string();
            if code.is_empty() {
                config.otp.fixed_code = None;
            } else if crate::otp::is_valid_code(&code) {
                config.otp.fixed_code = Some(code);
            } else {
                return Err(invalid(ENV_OTP_FIXED_CODE, "six digits", &code));
            }
        }
        if let Some(v) = get(ENV_OTP_GATE) {
            config.otp.gate_enabled = parse_bool(ENV_OTP_GATE, &v)?;
        }
        if let Some(v) = get(ENV_LOG_FORMAT) {
            config.log_format = v
                .parse()
                .map_err(|_| invalid(ENV_LOG_FORMAT, "\"pretty\" or \"json\"", &v))?;
        }

        Ok(config)
    }
}

fn invalid(name: &'static str, expected: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        expected,
        value: value.to_string(),
    }
}

fn parse<T: std::str::FromStr>(
    name: &'static str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(name, expected, value))
}

fn positive_seconds(name: &'static str, value: &str) -> Result<chrono::Duration, ConfigError> {
    let secs: i64 = parse(name, value, "a positive number of seconds")?;
    if secs <= 0 {
        return Err(invalid(name, "a positive number of seconds", value));
    }
    Ok(chrono::Duration::seconds(secs))
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, "a boolean", value)),
    }
}
