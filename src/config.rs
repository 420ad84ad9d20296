//! Gateway configuration
//!
//! Read once at startup from `CHAT_*` environment variables, each with a
//! default suitable for local development.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default health endpoint address
pub const DEFAULT_HEALTH_ADDR: &str = "127.0.0.1:8081";

/// Messages the in-memory store keeps before discarding the oldest
pub const DEFAULT_STORE_CAPACITY: usize = 1000;

/// Per-session outbound queue capacity
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;

/// Per-room command channel buffer size
pub const DEFAULT_ROOM_BUFFER: usize = 256;

const DEFAULT_PERSIST_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REPLICATE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name reported by the health endpoint
    pub service_name: String,
    pub bind_addr: String,
    pub health_addr: String,
    pub store_capacity: usize,
    /// Messages buffered per session before it is disconnected
    pub outbound_capacity: usize,
    pub room_buffer: usize,
    pub persist_timeout: Duration,
    pub replicate_timeout: Duration,
    /// Upper bound on waiting for sessions to drain at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "chat".to_string(),
            bind_addr: DEFAULT_ADDR.to_string(),
            health_addr: DEFAULT_HEALTH_ADDR.to_string(),
            store_capacity: DEFAULT_STORE_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            room_buffer: DEFAULT_ROOM_BUFFER,
            persist_timeout: Duration::from_secs(DEFAULT_PERSIST_TIMEOUT_SECS),
            replicate_timeout: Duration::from_secs(DEFAULT_REPLICATE_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            service_name: lookup("CHAT_SERVICE_NAME").unwrap_or(defaults.service_name),
            bind_addr: lookup("CHAT_BIND_ADDR").unwrap_or(defaults.bind_addr),
            health_addr: lookup("CHAT_HEALTH_ADDR").unwrap_or(defaults.health_addr),
            store_capacity: parse_positive(
                &lookup,
                "CHAT_STORE_CAPACITY",
                defaults.store_capacity,
            )?,
            outbound_capacity: parse_positive(
                &lookup,
                "CHAT_OUTBOUND_CAPACITY",
                defaults.outbound_capacity,
            )?,
            room_buffer: parse_positive(&lookup, "CHAT_ROOM_BUFFER", defaults.room_buffer)?,
            persist_timeout: Duration::from_secs(parse_positive(
                &lookup,
                "CHAT_PERSIST_TIMEOUT_SECS",
                DEFAULT_PERSIST_TIMEOUT_SECS,
            )?),
            replicate_timeout: Duration::from_secs(parse_positive(
                &lookup,
                "CHAT_REPLICATE_TIMEOUT_SECS",
                DEFAULT_REPLICATE_TIMEOUT_SECS,
            )?),
            shutdown_timeout: Duration::from_secs(parse_positive(
                &lookup,
                "CHAT_SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )?),
        })
    }
}

/// Parse a non-zero number, falling back to `default` when unset
fn parse_positive<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Ok(value),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}
