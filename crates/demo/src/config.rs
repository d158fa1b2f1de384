//! Demo configuration loaded from environment variables.

use unit_of_work::UnitOfWorkConfig;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Demo configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DEMO_ACCOUNTS`: number of accounts to open (default: `4`)
/// - `DEMO_TRANSFERS`: number of transfers to run (default: `12`)
///
/// plus everything [`UnitOfWorkConfig::from_env`] reads.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub accounts: usize,
    pub transfers: usize,
    pub unit_of_work: UnitOfWorkConfig,
}

impl DemoConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match std::env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            accounts: std::env::var("DEMO_ACCOUNTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n >= 2)
                .unwrap_or(defaults.accounts),
            transfers: std::env::var("DEMO_TRANSFERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.transfers),
            unit_of_work: UnitOfWorkConfig::from_env(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            accounts: 4,
            transfers: 12,
            unit_of_work: UnitOfWorkConfig::default(),
        }
    }
}
