//! Configuration for the blog-post service.
//!
//! Values come from the process environment (after `dotenvy` has loaded any
//! `.env` file). The config is built once at startup and passed explicitly to
//! the components that need it.

use std::time::Duration;

use anyhow::{anyhow, Context};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Bound on connecting and on acquiring a pooled connection.
    pub connect_timeout: Duration,
    /// Deadline applied to every store operation.
    pub query_timeout: Duration,
}

#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC key for token signing.
    pub jwt_secret: String,
    pub member_token_ttl: Duration,
    pub admin_token_ttl: Duration,
}

// Keep the signing key out of logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("member_token_ttl", &self.member_token_ttl)
            .field("admin_token_ttl", &self.admin_token_ttl)
            .finish()
    }
}

/// 10 minutes 30 seconds.
pub const DEFAULT_MEMBER_TOKEN_TTL_SECS: u64 = 630;
/// 30 days.
pub const DEFAULT_ADMIN_TOKEN_TTL_SECS: u64 = 60 * 60 * 24 * 30;

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. `from_env` uses the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;

        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("JWT_SECRET must be set and non-empty"))?;

        Ok(Config {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "SERVER_PORT", 8000)?,
            },
            database: DatabaseConfig {
                url,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
                connect_timeout: Duration::from_millis(parse_or(
                    &lookup,
                    "DATABASE_CONNECT_TIMEOUT_MS",
                    5_000,
                )?),
                query_timeout: Duration::from_millis(parse_or(
                    &lookup,
                    "DATABASE_QUERY_TIMEOUT_MS",
                    5_000,
                )?),
            },
            auth: AuthConfig {
                jwt_secret,
                member_token_ttl: Duration::from_secs(parse_or(
                    &lookup,
                    "MEMBER_TOKEN_TTL_SECS",
                    DEFAULT_MEMBER_TOKEN_TTL_SECS,
                )?),
                admin_token_ttl: Duration::from_secs(parse_or(
                    &lookup,
                    "ADMIN_TOKEN_TTL_SECS",
                    DEFAULT_ADMIN_TOKEN_TTL_SECS,
                )?),
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
