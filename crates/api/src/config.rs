//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::OrderPolicy;

/// Server signing key used when `PAYMENT_SERVER_KEY` is unset.
pub const DEVELOPMENT_SERVER_KEY: &str = "development-server-key";

const MAX_WINDOW_HOURS: u64 = 365 * 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — Postgres connection string; unset selects the in-memory store
/// - `PAYMENT_SERVER_KEY` — shared secret for callback signatures
/// - `RESERVATION_TTL_SECS` (default: `900`)
/// - `PAYMENT_WINDOW_HOURS` (default: `24`)
/// - `SWEEP_INTERVAL_SECS` (default: `60`)
/// - `LOCK_TIMEOUT_MS` (default: `5000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub payment_server_key: String,
    pub reservation_ttl_secs: u64,
    pub payment_window_hours: u64,
    pub sweep_interval_secs: u64,
    pub lock_timeout_ms: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            payment_server_key: lookup("PAYMENT_SERVER_KEY")
                .filter(|key| !key.is_empty())
                .unwrap_or(defaults.payment_server_key),
            reservation_ttl_secs: number("RESERVATION_TTL_SECS", defaults.reservation_ttl_secs),
            payment_window_hours: number("PAYMENT_WINDOW_HOURS", defaults.payment_window_hours),
            sweep_interval_secs: number("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)
                .max(1),
            lock_timeout_ms: number("LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True when callbacks are verified with the development key.
    pub fn uses_development_key(&self) -> bool {
        self.payment_server_key == DEVELOPMENT_SERVER_KEY
    }

    /// Lifecycle windows. Values are capped at one year.
    pub fn policy(&self) -> OrderPolicy {
        let ttl_secs = self.reservation_ttl_secs.min(MAX_WINDOW_HOURS * 3600);
        let window_hours = self.payment_window_hours.min(MAX_WINDOW_HOURS);
        OrderPolicy::default()
            .with_reservation_ttl(chrono::Duration::seconds(ttl_secs as i64))
            .with_payment_window(chrono::Duration::hours(window_hours as i64))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            payment_server_key: DEVELOPMENT_SERVER_KEY.to_string(),
            reservation_ttl_secs: 900,
            payment_window_hours: 24,
            sweep_interval_secs: 60,
            lock_timeout_ms: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert!(config.uses_development_key());
        assert_eq!(config.policy(), OrderPolicy::default());
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/checkout"),
            ("PAYMENT_SERVER_KEY", "sk-live"),
            ("RESERVATION_TTL_SECS", "60"),
            ("PAYMENT_WINDOW_HOURS", "2"),
            ("SWEEP_INTERVAL_SECS", "0"),
        ]));

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/checkout")
        );
        assert!(!config.uses_development_key());
        assert_eq!(config.policy().reservation_ttl, chrono::Duration::seconds(60));
        assert_eq!(config.policy().payment_window, chrono::Duration::hours(2));
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = Config::from_lookup(lookup(&[("PORT", "http"), ("LOCK_TIMEOUT_MS", "soon")]));
        assert_eq!(config.port, 3000);
        assert_eq!(config.lock_timeout_ms, 5000);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
