//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on in-memory stores
/// - `SERVICE_NAME`: checkpoint name prefix (default: `"saga-tracker"`)
/// - `POLL_INTERVAL_MS`: background catch-up interval (default: `500`)
/// - `PROJECTION_MAX_RETRIES`: projection update retries (default: `5`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub service_name: String,
    pub poll_interval: Duration,
    pub projection_max_retries: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unparseable numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(lookup("PORT")).unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            service_name: lookup("SERVICE_NAME").unwrap_or(defaults.service_name),
            poll_interval: parse(lookup("POLL_INTERVAL_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            projection_max_retries: parse(lookup("PROJECTION_MAX_RETRIES"))
                .unwrap_or(defaults.projection_max_retries),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checkpoint name of the saga event watcher.
    pub fn watcher_name(&self) -> String {
        format!("{}-watcher", self.service_name)
    }

    /// Checkpoint name of the projection processor.
    pub fn processor_name(&self) -> String {
        format!("{}-projection", self.service_name)
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            service_name: "saga-tracker".to_string(),
            poll_interval: Duration::from_millis(500),
            projection_max_retries: 5,
        }
    }
}
