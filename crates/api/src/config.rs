//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::{CheckoutConfig, PageRequest};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON log lines, anything else for text
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs in memory
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `CHECKOUT_TX_TIMEOUT_MS`: checkout transaction bound (default: `5000`)
/// - `ORDERS_PER_PAGE`: default order page size (default: `15`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub json_logs: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub checkout_tx_timeout: Duration,
    pub orders_per_page: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            json_logs: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: parse_or(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            checkout_tx_timeout: Duration::from_millis(parse_or(
                &lookup,
                "CHECKOUT_TX_TIMEOUT_MS",
                defaults.checkout_tx_timeout.as_millis() as u64,
            )),
            orders_per_page: parse_or(&lookup, "ORDERS_PER_PAGE", defaults.orders_per_page)
                .clamp(1, PageRequest::MAX_PER_PAGE),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checkout limits derived from this configuration.
    pub fn checkout(&self) -> CheckoutConfig {
        CheckoutConfig {
            transaction_timeout: self.checkout_tx_timeout,
            ..CheckoutConfig::default()
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            json_logs: false,
            database_url: None,
            database_max_connections: 10,
            checkout_tx_timeout: Duration::from_millis(5000),
            orders_per_page: PageRequest::DEFAULT_PER_PAGE,
        }
    }
}
