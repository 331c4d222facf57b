//! Application configuration

use std::env;

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_INVITATION_EXPIRY_DAYS: i64 = 7;
pub const DEFAULT_API_KEY_RATE_LIMIT: i32 = 1000;
const MIN_SECRET_LEN: usize = 32;

/// Log output format for the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Key material
    pub api_key_hmac_secret: String,

    // Tenancy defaults
    pub invitation_expiry_days: i64,
    pub api_key_default_rate_limit: i32,

    // Logging
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            )?,

            api_key_hmac_secret: {
                let secret = env::var("API_KEY_HMAC_SECRET")
                    .map_err(|_| ConfigError::Missing("API_KEY_HMAC_SECRET"))?;
                if secret.len() < MIN_SECRET_LEN {
                    return Err(ConfigError::WeakSecret(
                        "API_KEY_HMAC_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            invitation_expiry_days: {
                let days = parse_or("INVITATION_EXPIRY_DAYS", DEFAULT_INVITATION_EXPIRY_DAYS)?;
                if days <= 0 {
                    return Err(ConfigError::Invalid {
                        var: "INVITATION_EXPIRY_DAYS",
                        reason: "must be a positive number of days".into(),
                    });
                }
                days
            },
            api_key_default_rate_limit: {
                let limit = parse_or("API_KEY_DEFAULT_RATE_LIMIT", DEFAULT_API_KEY_RATE_LIMIT)?;
                if limit <= 0 {
                    return Err(ConfigError::Invalid {
                        var: "API_KEY_DEFAULT_RATE_LIMIT",
                        reason: "must be positive".into(),
                    });
                }
                limit
            },

            log_format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                Ok("pretty") | Err(_) => LogFormat::Pretty,
                Ok(other) => {
                    return Err(ConfigError::Invalid {
                        var: "LOG_FORMAT",
                        reason: format!("expected 'json' or 'pretty', got '{}'", other),
                    })
                }
            },
        })
    }

    /// Settings for embedding the managers without a database, e.g. in tests.
    pub fn for_secret(api_key_hmac_secret: impl Into<String>) -> Self {
        Self {
            database_url: String::new(),
            database_max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            api_key_hmac_secret: api_key_hmac_secret.into(),
            invitation_expiry_days: DEFAULT_INVITATION_EXPIRY_DAYS,
            api_key_default_rate_limit: DEFAULT_API_KEY_RATE_LIMIT,
            log_format: LogFormat::Pretty,
        }
    }
}

fn parse_or<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("could not parse '{}'", raw),
        }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}
