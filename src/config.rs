//! Service configuration.
//!
//! A [`SsoConfig`] is built once at startup (from the environment, from JSON, or as a
//! struct literal) and handed by reference to each component's constructor. Components
//! copy out what they need; nothing reads configuration from a global.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: `{value}`")]
    InvalidValue { name: &'static str, value: String },

    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SsoConfig {
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub login: LoginLimitConfig,
    pub ticket: TicketConfig,
    pub redis: RedisConfig,
    pub server: ServerConfig,
}

/// Token signing parameters. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expire: u64,
    pub refresh_token_expire: u64,
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            access_token_expire: 2 * 60 * 60,
            refresh_token_expire: 7 * 24 * 60 * 60,
            issuer: "r-sso".to_string(),
        }
    }
}

impl JwtConfig {
    pub fn access_token_duration(&self) -> Duration {
        Duration::from_secs(self.access_token_expire)
    }

    pub fn refresh_token_duration(&self) -> Duration {
        Duration::from_secs(self.refresh_token_expire)
    }
}

/// Lifetime of the advisory session entry created on login.
///
/// Independent of the access token lifetime; the two are not reconciled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub expire: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expire: 24 * 60 * 60,
        }
    }
}

impl SessionConfig {
    pub fn expire_duration(&self) -> Duration {
        Duration::from_secs(self.expire)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginLimitConfig {
    pub max_attempts: u64,
    /// Fixed lockout window, counted from the first failure.
    pub lock_seconds: u64,
}

impl Default for LoginLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lock_seconds: 5 * 60,
        }
    }
}

impl LoginLimitConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Service ticket lifetime; one redirect round-trip, not a session.
    pub expire: u64,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self { expire: 60 }
    }
}

impl TicketConfig {
    pub fn expire_duration(&self) -> Duration {
        Duration::from_secs(self.expire)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Deployment-wide key prefix; normalized to end with `:` by the store.
    pub prefix: String,
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1/".to_string(),
            prefix: "r_sso:".to_string(),
            pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

impl SsoConfig {
    /// Defaults with the given signing secret. Handy for tests and demos.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.jwt.secret = secret.into();
        config
    }

    /// Parses a JSON document; missing sections and fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from `R_SSO_*` environment variables (plus `REDIS_URL`).
    ///
    /// Unset variables fall back to the defaults; set-but-unparsable ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            jwt: JwtConfig {
                secret: env_or("R_SSO_JWT_SECRET", defaults.jwt.secret)?,
                access_token_expire: env_or(
                    "R_SSO_ACCESS_TOKEN_EXPIRE",
                    defaults.jwt.access_token_expire,
                )?,
                refresh_token_expire: env_or(
                    "R_SSO_REFRESH_TOKEN_EXPIRE",
                    defaults.jwt.refresh_token_expire,
                )?,
                issuer: env_or("R_SSO_ISSUER", defaults.jwt.issuer)?,
            },
            session: SessionConfig {
                expire: env_or("R_SSO_SESSION_EXPIRE", defaults.session.expire)?,
            },
            login: LoginLimitConfig {
                max_attempts: env_or("R_SSO_MAX_LOGIN_ATTEMPTS", defaults.login.max_attempts)?,
                lock_seconds: env_or("R_SSO_LOGIN_LOCK_SECONDS", defaults.login.lock_seconds)?,
            },
            ticket: TicketConfig {
                expire: env_or("R_SSO_TICKET_EXPIRE", defaults.ticket.expire)?,
            },
            redis: RedisConfig {
                url: env_or("REDIS_URL", defaults.redis.url)?,
                prefix: env_or("R_SSO_PREFIX", defaults.redis.prefix)?,
                pool_size: env_or("R_SSO_REDIS_POOL_SIZE", defaults.redis.pool_size)?,
            },
            server: ServerConfig {
                host: env_or("R_SSO_HOST", defaults.server.host)?,
                port: env_or("R_SSO_PORT", defaults.server.port)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.is_empty() {
            return Err(ConfigError::Invalid("jwt secret must not be empty"));
        }
        if self.jwt.access_token_expire == 0 || self.jwt.refresh_token_expire == 0 {
            return Err(ConfigError::Invalid("token lifetimes must be positive"));
        }
        if self.session.expire == 0 {
            return Err(ConfigError::Invalid("session expiry must be positive"));
        }
        if self.login.max_attempts == 0 || self.login.lock_seconds == 0 {
            return Err(ConfigError::Invalid("login limits must be positive"));
        }
        if self.ticket.expire == 0 {
            return Err(ConfigError::Invalid("ticket expiry must be positive"));
        }
        Ok(())
    }
}
