//! Environment-based settings.
//!
//! The process environment is the single configuration source; a dotenv file
//! named by `DOTENV_PATH` is applied by the process launcher before startup.

use crate::rowflow::error::{EtlError, EtlResult};
use std::env;

/// Request cache settings. Absence of `REDIS_CACHE_HOST` disables the cache
/// entirely; credentials are read by whatever injects the remote store, not
/// by this crate.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub host: Option<String>,
    pub port: u16,
}

impl CacheSettings {
    pub fn from_env() -> EtlResult<Self> {
        let host = env::var("REDIS_CACHE_HOST").ok().filter(|h| !h.is_empty());
        let port = match env::var("REDIS_CACHE_PORT") {
            Ok(raw) if !raw.is_empty() => raw.parse().map_err(|e| {
                EtlError::bad_metadata(format!("error parsing REDIS_CACHE_PORT: {}", e))
            })?,
            _ => 6379,
        };
        Ok(CacheSettings { host, port })
    }

    pub fn enabled(&self) -> bool {
        self.host.is_some()
    }

    /// `host:port` of the remote tier, when enabled
    pub fn address(&self) -> Option<String> {
        self.host
            .as_ref()
            .map(|host| format!("{}:{}", host, self.port))
    }
}

/// Kafka connection settings for the worker binaries
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub brokers: String,
    pub group_id: String,
}

impl BrokerSettings {
    pub fn from_env() -> Self {
        BrokerSettings {
            brokers: env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
            group_id: env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "rowflow".to_string()),
        }
    }
}
