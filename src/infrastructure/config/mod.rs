//! Service Configuration
//!
//! Configuration loaded from environment variables (a `.env` file is loaded
//! by the binary before this runs).
//!
//! | Variable | Default | Required |
//! |---|---|---|
//! | `WS_URL` | — | yes |
//! | `WS_API_KEY` | — | yes |
//! | `DATABASE_URL` | — | yes |
//! | `REDIS_ADDR` | — | yes |
//! | `REDIS_PASSWORD` | `""` | no |
//! | `REDIS_DB` | `0` | no |
//! | `REDIS_TTL` | `24h` | no |
//! | `WS_SERVER_ADDR` | `:8080` | no |
//! | `BATCH_SIZE` | `100` | no |
//! | `WORKER_COUNT` | `10` | no |
//! | `FLUSH_INTERVAL` | `2s` | no |
//! | `SUBSCRIPTION_SYMBOLS` | `USDSGD` | no |
//! | `LOG_LEVEL` | `info` | no (read by telemetry init) |

use std::time::Duration;

/// Default downstream WebSocket listen address.
const DEFAULT_WS_SERVER_ADDR: &str = ":8080";

/// Default symbol list when `SUBSCRIPTION_SYMBOLS` is unset or empty.
const DEFAULT_SUBSCRIPTION_SYMBOL: &str = "USDSGD";

// =============================================================================
// Settings Types
// =============================================================================

/// Redis connection settings.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// `host:port` of the Redis server.
    pub addr: String,
    /// Password, if the server requires one.
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
    /// Expiry applied to every cache entry.
    pub ttl: Duration,
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upstream WebSocket URL.
    pub ws_url: String,
    /// API key sent in the upstream connect handshake.
    pub ws_api_key: String,
    /// Postgres connection string.
    pub database_url: String,
    /// Cache settings.
    pub redis: RedisSettings,
    /// Downstream WebSocket listen address.
    pub ws_server_addr: String,
    /// Records per batch before a size-based flush.
    pub batch_size: usize,
    /// Number of batching workers draining the queue.
    pub worker_count: usize,
    /// Interval of the per-worker flush timer.
    pub flush_interval: Duration,
    /// Symbols requested in the upstream subscribe frame.
    pub subscription_symbols: Vec<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a required variable is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ws_url = require_env("WS_URL")?;
        let ws_api_key = require_env("WS_API_KEY")?;
        let database_url = require_env("DATABASE_URL")?;
        let redis_addr = require_env("REDIS_ADDR")?;

        let redis = RedisSettings {
            addr: redis_addr,
            password: std::env::var("REDIS_PASSWORD")
                .ok()
                .filter(|p| !p.is_empty()),
            db: parse_env_i64("REDIS_DB", 0),
            ttl: parse_env_duration("REDIS_TTL", Duration::from_secs(24 * 60 * 60)),
        };

        Ok(Self {
            ws_url,
            ws_api_key,
            database_url,
            redis,
            ws_server_addr: normalize_listen_addr(
                &std::env::var("WS_SERVER_ADDR")
                    .unwrap_or_else(|_| DEFAULT_WS_SERVER_ADDR.to_string()),
            ),
            batch_size: parse_env_usize("BATCH_SIZE", 100),
            worker_count: parse_env_usize("WORKER_COUNT", 10),
            flush_interval: parse_env_duration("FLUSH_INTERVAL", Duration::from_secs(2)),
            subscription_symbols: parse_symbols(
                std::env::var("SUBSCRIPTION_SYMBOLS").ok().as_deref(),
            ),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

// =============================================================================
// Parse Helpers
// =============================================================================

fn require_env(key: &str) -> Result<String, ConfigError> {
    let value =
        std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_duration(&v))
        .unwrap_or(default)
}

/// Parse a duration string with a unit suffix: `500ms`, `2s`, `5m`, `24h`.
/// A bare number is taken as seconds.
#[must_use]
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();

    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let number: u64 = number.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(number)),
        "s" => Some(Duration::from_secs(number)),
        "m" => Some(Duration::from_secs(number * 60)),
        "h" => Some(Duration::from_secs(number * 60 * 60)),
        _ => None,
    }
}

/// Parse the CSV symbol list, trimming entries and dropping empties. Falls
/// back to the default symbol when unset or empty.
fn parse_symbols(raw: Option<&str>) -> Vec<String> {
    let symbols: Vec<String> = raw
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if symbols.is_empty() {
        vec![DEFAULT_SUBSCRIPTION_SYMBOL.to_string()]
    } else {
        symbols
    }
}

/// Accept Go-style listen addresses like `:8080` by assuming all interfaces.
fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
