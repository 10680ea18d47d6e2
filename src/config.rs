//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// Default endpoint notified when an existing proposal is replaced
pub const DEFAULT_NOTIFY_URL: &str = "http://bc-desafio.mybluemix.net/atualizar";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
        }
    }
}

/// Which ledger host persists the proposal table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Memory,
    Postgres,
}

impl std::str::FromStr for LedgerBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(LedgerBackend::Memory),
            "postgres" | "postgresql" => Ok(LedgerBackend::Postgres),
            other => Err(ConfigError::InvalidValue(format!(
                "LEDGER_BACKEND must be 'memory' or 'postgres', got '{}'",
                other
            ))),
        }
    }
}

/// Ledger host configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub database_url: Option<String>,
    pub max_pool_size: usize,
    /// Caller metadata used to run `reset` at startup
    pub bootstrap_admin: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Memory,
            database_url: None,
            max_pool_size: 10,
            bootstrap_admin: None,
        }
    }
}

/// Outbound notification configuration
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub url: url::Url,
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: url::Url::parse(DEFAULT_NOTIFY_URL).expect("default notify url is valid"),
            timeout: Duration::from_secs(5),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub notify: NotifyConfig,
    pub cors: CorsConfig,
    pub log_format: LogFormat,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = ServerConfig {
            host: lookup("HOST")
                .and_then(|h| h.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().port),
        };

        let backend = match lookup("LEDGER_BACKEND") {
            Some(raw) => raw.parse()?,
            None => LedgerBackend::Memory,
        };
        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());
        if backend == LedgerBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }
        let ledger = LedgerConfig {
            backend,
            database_url,
            max_pool_size: lookup("DB_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            bootstrap_admin: lookup("BOOTSTRAP_ADMIN"),
        };

        let notify = NotifyConfig {
            enabled: match lookup("NOTIFY_ENABLED") {
                Some(raw) => parse_flag("NOTIFY_ENABLED", &raw)?,
                None => true,
            },
            url: match lookup("NOTIFY_URL") {
                Some(raw) => Self::parse_notify_url(&raw)?,
                None => NotifyConfig::default().url,
            },
            timeout: match lookup("NOTIFY_TIMEOUT_SECS") {
                Some(raw) => {
                    let secs: u64 = raw.trim().parse().map_err(|_| {
                        ConfigError::InvalidValue(format!(
                            "NOTIFY_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                            raw
                        ))
                    })?;
                    if secs == 0 {
                        return Err(ConfigError::InvalidValue(
                            "NOTIFY_TIMEOUT_SECS must be greater than zero".to_string(),
                        ));
                    }
                    Duration::from_secs(secs)
                }
                None => NotifyConfig::default().timeout,
            },
        };

        let cors = CorsConfig {
            allowed_origins: lookup("ALLOWED_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            Some("json") => LogFormat::Json,
            Some("compact") | None => LogFormat::Compact,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "LOG_FORMAT must be 'compact' or 'json', got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            server,
            ledger,
            notify,
            cors,
            log_format,
        })
    }

    /// Parse the notification endpoint (http:// or https:// only)
    fn parse_notify_url(raw: &str) -> Result<url::Url, ConfigError> {
        let parsed = url::Url::parse(raw.trim())
            .map_err(|e| ConfigError::InvalidValue(format!("Invalid NOTIFY_URL: {}", e)))?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            other => Err(ConfigError::InvalidValue(format!(
                "NOTIFY_URL must use http or https, got '{}'",
                other
            ))),
        }
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(format!(
            "{} must be a boolean, got '{}'",
            name, raw
        ))),
    }
}
