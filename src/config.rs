use crate::error::{Result, RotatorError};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Forwarding server configuration
    pub proxy: ProxyServerConfig,
    /// Management API configuration
    pub api: ApiServerConfig,
    /// Pool store configuration
    pub database: DatabaseConfig,
    /// Health check configuration
    pub health: HealthCheckSettings,
    /// Logging configuration
    pub log: LogConfig,
    /// Descriptor file ingested at startup when the pool is empty
    pub seed_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// Port for the forwarding server (default: 8000)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Request timeout in seconds
    pub request_timeout: u64,
    /// Latency reported to the health tracker after a successful relay
    pub forward_latency: ForwardLatency,
    /// Capacity of the health report queue
    pub report_queue_capacity: usize,
    /// Largest inbound request body the forwarder buffers, in bytes
    pub max_body_size: usize,
}

/// What latency the forwarder reports on a successful relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardLatency {
    /// The measured round trip of the relayed request
    Measured,
    /// A fixed value in milliseconds
    Fixed(u32),
}

impl FromStr for ForwardLatency {
    type Err = RotatorError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("measured") {
            return Ok(ForwardLatency::Measured);
        }
        s.parse::<u32>().map(ForwardLatency::Fixed).map_err(|_| {
            RotatorError::InvalidConfig(
                "PROXY_FORWARD_LATENCY must be 'measured' or a number of milliseconds".into(),
            )
        })
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the management API (default: 3000)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = any origin)
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body in bytes
    pub max_upload_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Which pool store to use
    pub backend: StoreBackend,
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
}

impl DatabaseConfig {
    /// Get the database connection URL
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckSettings {
    /// Probe target used when the caller supplies none
    pub url: String,
    /// Per-probe timeout in seconds
    pub timeout: u64,
    /// Maximum probes in flight
    pub workers: usize,
    /// Seconds between scheduled checks (0 = disabled)
    pub interval: u64,
}

impl HealthCheckSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval > 0).then(|| Duration::from_secs(self.interval))
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            proxy: ProxyServerConfig {
                port: parse_env("PROXY_PORT", "8000", "a valid port number")?,
                host: get_env_or("PROXY_HOST", "0.0.0.0"),
                request_timeout: parse_env("PROXY_REQUEST_TIMEOUT", "30", "a number of seconds")?,
                forward_latency: get_env_or("PROXY_FORWARD_LATENCY", "measured").parse()?,
                report_queue_capacity: parse_env("HEALTH_REPORT_QUEUE", "1024", "a valid number")?,
                max_body_size: parse_env("PROXY_MAX_BODY_SIZE", "10485760", "a size in bytes")?,
            },
            api: ApiServerConfig {
                port: parse_env("API_PORT", "3000", "a valid port number")?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                max_upload_size: parse_env("MAX_FILE_SIZE", "10485760", "a valid number")?,
            },
            database: DatabaseConfig {
                backend: match get_env_or("STORE_BACKEND", "postgres").to_lowercase().as_str() {
                    "postgres" | "postgresql" => StoreBackend::Postgres,
                    "memory" => StoreBackend::Memory,
                    other => {
                        return Err(RotatorError::InvalidConfig(format!(
                            "STORE_BACKEND must be 'postgres' or 'memory', got '{}'",
                            other
                        )))
                    }
                },
                host: get_env_or("DB_HOST", "localhost"),
                port: parse_env("DB_PORT", "5432", "a valid port number")?,
                user: get_env_or("DB_USER", "rotator"),
                password: get_env_or("DB_PASSWORD", "rotator_password"),
                name: get_env_or("DB_NAME", "rotator"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: parse_env("DB_MAX_CONNECTIONS", "20", "a valid number")?,
                min_connections: parse_env("DB_MIN_CONNECTIONS", "2", "a valid number")?,
            },
            health: HealthCheckSettings {
                url: get_env_or("HEALTH_CHECK_URL", "https://httpbin.org/ip"),
                timeout: parse_env("HEALTH_CHECK_TIMEOUT", "10", "a number of seconds")?,
                workers: parse_env("HEALTH_CHECK_WORKERS", "10", "a valid number")?,
                interval: parse_env("HEALTH_CHECK_INTERVAL", "0", "a number of seconds")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
            seed_file: env::var("PROXY_SEED_FILE")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }

    /// Get the forwarding server address
    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy.host, self.proxy.port)
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, rejecting malformed values
fn parse_env<T: FromStr>(key: &str, default: &str, expected: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RotatorError::InvalidConfig(format!("{} must be {}", key, expected)))
}
