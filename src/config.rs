//! Application configuration loaded from environment variables.
//!
//! # Environment Selection
//!
//! `ENVIRONMENT` is mandatory and must be one of `DEVELOPMENT`, `STAGING` or
//! `PRODUCTION`. The matching `.env.<environment>` file is loaded when present,
//! followed by a plain `.env`. Variables already set in the process win.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_REQUESTS`: Requests accepted per client and endpoint (default: 30)
//! - `RATE_LIMIT_WINDOW_SECS`: How long a request over the limit is held (default: 60)
//! - `RATE_LIMIT_WAIT_REQUESTS`: Held requests allowed before a cooldown (default: 10)
//! - `RATE_LIMIT_COOLDOWN_MINUTES`: Length of the cooldown (default: 1)
//!
//! # Security
//!
//! - `SECRET_KEY`: HS256 signing key for bearer tokens. Required outside development.
//! - `AUTOMATED_AGENT`: `User-Agent` value that marks internal traffic (default: `AI`)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, AppResult};

/// Signing key used only when running in development without `SECRET_KEY`.
const DEVELOPMENT_SECRET_KEY: &str = "development-only-secret-key";

/// Deployment environment of the running process.
///
/// Drives the logging sinks and the rate limiter bypass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Name of the env file holding this environment's variables.
    pub fn env_file(&self) -> &'static str {
        match self {
            Environment::Development => ".env.development",
            Environment::Staging => ".env.staging",
            Environment::Production => ".env.production",
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "DEVELOPMENT" => Ok(Environment::Development),
            "STAGING" => Ok(Environment::Staging),
            "PRODUCTION" => Ok(Environment::Production),
            other => Err(AppError::Config(format!(
                "Incorrect ENVIRONMENT '{other}': expected DEVELOPMENT, STAGING or PRODUCTION"
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Development => "DEVELOPMENT",
            Environment::Staging => "STAGING",
            Environment::Production => "PRODUCTION",
        })
    }
}

/// Rate limiter settings, one set shared by every client/endpoint bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Requests accepted per bucket before callers start waiting.
    pub requests_limit: u32,
    /// How long a caller over the limit is suspended before being let through.
    pub time_window: Duration,
    /// Number of waits tolerated per bucket before a cooldown is imposed.
    pub wait_request_limit: u32,
    /// Cooldown length in minutes.
    pub cooldown_minutes: u32,
}

impl RateLimitSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(u64::from(self.cooldown_minutes) * 60)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_limit: 30,
            time_window: Duration::from_secs(60),
            wait_request_limit: 10,
            cooldown_minutes: 1,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Deployment environment
    pub environment: Environment,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// HS256 key used to sign and verify bearer tokens
    pub secret_key: String,

    /// Lifetime of tokens issued by the service (default: 7 days)
    pub access_token_ttl: Duration,

    /// `User-Agent` value identifying automated/internal callers
    pub automated_agent: String,

    /// Allowed CORS origins; `*` allows any
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    pub rate_limit: RateLimitSettings,

    // =========================================================================
    // Request Limits
    // =========================================================================
    /// Maximum request body size buffered for logging (default: 10MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter (e.g., "info", "debug")
    pub log_level: String,

    /// Port for the Prometheus exporter (0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when `ENVIRONMENT` is missing or unknown,
    /// when a numeric variable does not parse, when `SECRET_KEY` is missing
    /// outside development, or when validation fails.
    pub fn from_env() -> AppResult<Self> {
        let environment: Environment = env::var("ENVIRONMENT")
            .map_err(|_| AppError::Config("Missing ENVIRONMENT".to_string()))?
            .parse()?;

        // Env files are optional; process variables take precedence.
        let _ = dotenvy::from_filename(environment.env_file());
        let _ = dotenvy::dotenv();

        let secret_key = match env::var("SECRET_KEY").ok().filter(|k| !k.is_empty()) {
            Some(key) => key,
            None if environment.is_development() => {
                warn!("SECRET_KEY not set, using the insecure development key");
                DEVELOPMENT_SECRET_KEY.to_string()
            }
            None => {
                return Err(AppError::Config(format!(
                    "SECRET_KEY must be set in {environment}"
                )));
            }
        };

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8000)?,
            environment,

            secret_key,
            access_token_ttl: token_ttl_from_minutes(Self::parse_env(
                "ACCESS_TOKEN_EXPIRE_MINUTES",
                60 * 24 * 7,
            )?)?,
            automated_agent: env::var("AUTOMATED_AGENT").unwrap_or_else(|_| "AI".to_string()),
            cors_allowed_origins: Self::parse_cors_origins(),

            rate_limit: RateLimitSettings {
                requests_limit: Self::parse_env("RATE_LIMIT_REQUESTS", 30)?,
                time_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
                wait_request_limit: Self::parse_env("RATE_LIMIT_WAIT_REQUESTS", 10)?,
                cooldown_minutes: Self::parse_env("RATE_LIMIT_COOLDOWN_MINUTES", 1)?,
            },

            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?,

            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limit.requests_limit == 0 {
            return Err(AppError::Config(
                "RATE_LIMIT_REQUESTS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit.time_window.is_zero() {
            return Err(AppError::Config(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit.cooldown_minutes == 0 {
            return Err(AppError::Config(
                "RATE_LIMIT_COOLDOWN_MINUTES must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::Config(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.secret_key.is_empty() {
            return Err(AppError::Config("SECRET_KEY cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address, or `None` when disabled.
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::Config(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse CORS allowed origins from environment variable.
    fn parse_cors_origins() -> Vec<String> {
        env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Token lifetime for `ACCESS_TOKEN_EXPIRE_MINUTES`.
fn token_ttl_from_minutes(minutes: u64) -> AppResult<Duration> {
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            AppError::Config(format!(
                "ACCESS_TOKEN_EXPIRE_MINUTES is too large: {minutes}"
            ))
        })
}

/// Staging configuration for tests: the rate limiter is active and tokens
/// are signed with a fixed key.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            environment: Environment::Staging,
            secret_key: "test-secret-key".to_string(),
            access_token_ttl: Duration::from_secs(60 * 60 * 24 * 7),
            automated_agent: "AI".to_string(),
            cors_allowed_origins: vec!["*".to_string()],
            rate_limit: RateLimitSettings::default(),
            max_request_body_size: 10 * 1024 * 1024,
            log_level: "info".to_string(),
            metrics_port: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 8000);
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.rate_limit.requests_limit, 30);
        assert_eq!(config.rate_limit.time_window, Duration::from_secs(60));
        assert_eq!(config.rate_limit.wait_request_limit, 10);
        assert_eq!(config.rate_limit.cooldown(), Duration::from_secs(60));
        assert_eq!(config.automated_agent, "AI");
        assert!(!config.metrics_enabled());
    }

    #[test]
    fn test_token_ttl_from_minutes() {
        assert_eq!(
            token_ttl_from_minutes(10080).unwrap(),
            Duration::from_secs(10080 * 60)
        );
        assert_eq!(token_ttl_from_minutes(0).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_token_ttl_overflow_is_config_error() {
        let err = token_ttl_from_minutes(u64::MAX).unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("ACCESS_TOKEN_EXPIRE_MINUTES")));
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "DEVELOPMENT".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert_eq!("STAGING".parse::<Environment>().unwrap(), Environment::Staging);
        assert_eq!(
            "PRODUCTION".parse::<Environment>().unwrap(),
            Environment::Production
        );

        let err = "production".parse::<Environment>().unwrap_err();
        assert!(err.to_string().contains("Incorrect ENVIRONMENT"));
    }

    #[test]
    fn test_environment_env_file() {
        assert_eq!(Environment::Development.env_file(), ".env.development");
        assert_eq!(Environment::Staging.env_file(), ".env.staging");
        assert_eq!(Environment::Production.env_file(), ".env.production");
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_metrics_addr() {
        let config = Config {
            metrics_port: 9090,
            ..Config::default()
        };

        assert_eq!(config.metrics_addr().unwrap().port(), 9090);
        assert!(Config::default().metrics_addr().is_none());
    }

    #[test]
    fn test_validate_zero_requests_limit() {
        let config = Config {
            rate_limit: RateLimitSettings {
                requests_limit: 0,
                ..RateLimitSettings::default()
            },
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("RATE_LIMIT_REQUESTS"));
    }

    #[test]
    fn test_validate_zero_window() {
        let config = Config {
            rate_limit: RateLimitSettings {
                time_window: Duration::ZERO,
                ..RateLimitSettings::default()
            },
            ..Config::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("RATE_LIMIT_WINDOW_SECS")
        );
    }

    #[test]
    fn test_validate_zero_cooldown() {
        let config = Config {
            rate_limit: RateLimitSettings {
                cooldown_minutes: 0,
                ..RateLimitSettings::default()
            },
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }
}
