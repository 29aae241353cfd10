use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::eligibility::plugins::DEFAULT_COMPONENTS;
use crate::eligibility::service::{DEFAULT_RESULT_LIMIT, MAX_RESULT_LIMIT};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub database: DatabaseConfig,
    pub eligibility: EligibilityConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            database: DatabaseConfig::from_env()?,
            eligibility: EligibilityConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Connection settings for the records and fact tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `postgres://...` in deployments; `sqlite://...` works for local runs.
    pub url: Option<String>,
    pub max_connections: u32,
}

pub const DEFAULT_DATABASE_CONNECTIONS: u32 = 10;

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: DEFAULT_DATABASE_CONNECTIONS,
        }
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("DATABASE_URL")
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        let max_connections = read_positive(
            "DATABASE_MAX_CONNECTIONS",
            DEFAULT_DATABASE_CONNECTIONS as usize,
        )?;
        let max_connections = u32::try_from(max_connections).map_err(|_| {
            ConfigError::InvalidNumber {
                key: "DATABASE_MAX_CONNECTIONS",
            }
        })?;

        Ok(Self {
            url,
            max_connections,
        })
    }

    pub fn require_url(&self) -> Result<&str, ConfigError> {
        self.url.as_deref().ok_or(ConfigError::MissingDatabaseUrl)
    }
}

/// Engine startup and query settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityConfig {
    /// Component ids enabled for this deployment.
    pub components: Vec<String>,
    pub backfill_on_start: bool,
    pub default_limit: usize,
    pub max_limit: usize,
    pub backfill_concurrency: usize,
    pub rollover_check: Duration,
    /// `None` disables the SQL preview endpoint.
    pub debug_token: Option<String>,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            components: DEFAULT_COMPONENTS.iter().map(|id| id.to_string()).collect(),
            backfill_on_start: true,
            default_limit: DEFAULT_RESULT_LIMIT,
            max_limit: MAX_RESULT_LIMIT,
            backfill_concurrency: 8,
            rollover_check: Duration::from_secs(300),
            debug_token: None,
        }
    }
}

impl EligibilityConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let components = match env::var("ELIGIBILITY_COMPONENTS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => defaults.components,
        };

        let backfill_on_start = match env::var("ELIGIBILITY_BACKFILL_ON_START") {
            Ok(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag {
                key: "ELIGIBILITY_BACKFILL_ON_START",
            })?,
            Err(_) => defaults.backfill_on_start,
        };

        let default_limit = read_positive("ELIGIBILITY_DEFAULT_LIMIT", defaults.default_limit)?;
        let max_limit = read_positive("ELIGIBILITY_MAX_LIMIT", defaults.max_limit)?;
        if default_limit > max_limit {
            return Err(ConfigError::LimitOrder {
                default_limit,
                max_limit,
            });
        }

        let backfill_concurrency = read_positive(
            "ELIGIBILITY_BACKFILL_CONCURRENCY",
            defaults.backfill_concurrency,
        )?;
        let rollover_secs = read_positive("ELIGIBILITY_ROLLOVER_CHECK_SECS", 300)?;

        let debug_token = env::var("ELIGIBILITY_DEBUG_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        Ok(Self {
            components,
            backfill_on_start,
            default_limit,
            max_limit,
            backfill_concurrency,
            rollover_check: Duration::from_secs(rollover_secs as u64),
            debug_token,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_positive(key: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidNumber { key }),
        },
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidFlag { key: &'static str },
    InvalidNumber { key: &'static str },
    LimitOrder { default_limit: usize, max_limit: usize },
    MissingDatabaseUrl,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidFlag { key } => write!(f, "{key} must be true or false"),
            ConfigError::InvalidNumber { key } => write!(f, "{key} must be a positive integer"),
            ConfigError::LimitOrder {
                default_limit,
                max_limit,
            } => write!(
                f,
                "ELIGIBILITY_DEFAULT_LIMIT ({default_limit}) exceeds ELIGIBILITY_MAX_LIMIT ({max_limit})"
            ),
            ConfigError::MissingDatabaseUrl => {
                write!(f, "DATABASE_URL must be set to serve eligibility queries")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
