//! Process configuration resolved from the environment.
//!
//! `dotenvy` loads an optional `.env` first (see `main.rs`); everything here
//! reads the resulting process environment. Storage settings are resolved
//! separately from the service settings so the batch migration commands can
//! run without the HTTP secrets.

pub mod flags;
pub(crate) mod helpers;

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::config::helpers::{
    optional_env, optional_secret, parse_number_env, parse_string_env, required_secret,
};
use crate::error::ConfigError;

pub use flags::{Domain, FeatureFlags, FlagStatus, MigrationPhase};

/// Minimum length of `SESSION_SECRET` in bytes.
pub const MIN_SESSION_SECRET_BYTES: usize = 32;

/// Which relational backend serves the legacy side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Postgres,
    LibSql,
}

impl DatabaseBackend {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "libsql" | "sqlite" | "turso" => Ok(Self::LibSql),
            other => Err(ConfigError::InvalidValue {
                key: "DATABASE_BACKEND".to_string(),
                message: format!("unsupported backend '{other}'"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::LibSql => "libsql",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: Option<SecretString>,
    pub pool_size: usize,
    pub libsql_path: Option<PathBuf>,
    pub libsql_url: Option<String>,
    pub libsql_auth_token: Option<SecretString>,
}

impl DatabaseConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let backend = match optional_env("DATABASE_BACKEND")? {
            Some(raw) => DatabaseBackend::from_str(&raw)?,
            None if cfg!(feature = "postgres") => DatabaseBackend::Postgres,
            None => DatabaseBackend::LibSql,
        };
        let url = optional_secret("DATABASE_URL")?;
        if backend == DatabaseBackend::Postgres && url.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "DATABASE_URL".to_string(),
                hint: "set DATABASE_URL or DATABASE_BACKEND=libsql".to_string(),
            });
        }

        Ok(Self {
            backend,
            url,
            pool_size: parse_number_env("DATABASE_POOL_SIZE", 10usize)?,
            libsql_path: optional_env("LIBSQL_PATH")?.map(PathBuf::from),
            libsql_url: optional_env("LIBSQL_URL")?,
            libsql_auth_token: optional_secret("LIBSQL_AUTH_TOKEN")?,
        })
    }

    /// An embedded libSQL configuration rooted at `path`.
    pub fn local_libsql(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: DatabaseBackend::LibSql,
            url: None,
            pool_size: 1,
            libsql_path: Some(path.into()),
            libsql_url: None,
            libsql_auth_token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocStoreConfig {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub auth_token: Option<SecretString>,
}

impl DocStoreConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let url = optional_env("DOCSTORE_URL")?;
        let auth_token = optional_secret("DOCSTORE_AUTH_TOKEN")?;
        if url.is_some() && auth_token.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "DOCSTORE_AUTH_TOKEN".to_string(),
                hint: "required when DOCSTORE_URL is set".to_string(),
            });
        }
        Ok(Self {
            path: optional_env("DOCSTORE_PATH")?.map(PathBuf::from),
            url,
            auth_token,
        })
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            url: None,
            auth_token: None,
        }
    }
}

/// Default on-disk location for embedded databases.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agencyops")
}

pub fn default_libsql_path() -> PathBuf {
    default_data_dir().join("agencyops.db")
}

pub fn default_docstore_path() -> PathBuf {
    default_data_dir().join("documents.db")
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            host: parse_string_env("HTTP_HOST", "127.0.0.1")?,
            port: parse_number_env("HTTP_PORT", 3000u16)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub gateway_url: String,
    pub model: String,
    pub api_key: SecretString,
}

impl AiConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let gateway_url = validate_gateway_url(&parse_string_env(
            "AI_GATEWAY_URL",
            "https://ai-gateway.vercel.sh",
        )?)?;
        Ok(Self {
            gateway_url,
            model: parse_string_env("AI_MODEL", "openai/gpt-4o-mini")?,
            api_key: required_secret(
                "AI_GATEWAY_API_KEY",
                "lead scoring and suggestions need an AI gateway key",
            )?,
        })
    }
}

fn validate_gateway_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        key: "AI_GATEWAY_URL".to_string(),
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key: "AI_GATEWAY_URL".to_string(),
            message: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: SecretString,
    pub ttl_hours: i64,
}

impl SessionConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let secret = required_secret("SESSION_SECRET", "used to sign session tokens")?;
        validate_session_secret(&secret)?;
        let ttl_hours = parse_number_env("SESSION_TTL_HOURS", 24i64)?;
        if ttl_hours <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESSION_TTL_HOURS".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(Self { secret, ttl_hours })
    }
}

fn validate_session_secret(secret: &SecretString) -> Result<(), ConfigError> {
    let len = secret.expose_secret().len();
    if len < MIN_SESSION_SECRET_BYTES {
        return Err(ConfigError::InvalidValue {
            key: "SESSION_SECRET".to_string(),
            message: format!(
                "must be at least {MIN_SESSION_SECRET_BYTES} bytes, got {len}"
            ),
        });
    }
    Ok(())
}

/// Settings shared by every command that touches data.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database: DatabaseConfig,
    pub docstore: DocStoreConfig,
    pub flags: FeatureFlags,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            flags: FeatureFlags::from_env()?,
            database: DatabaseConfig::resolve()?,
            docstore: DocStoreConfig::resolve()?,
        })
    }
}

/// Full configuration for `agencyops serve`.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub ai: AiConfig,
    pub session: SessionConfig,
    pub view_cache_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let view_cache_capacity = parse_number_env("VIEW_CACHE_CAPACITY", 256usize)?;
        if view_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "VIEW_CACHE_CAPACITY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            storage: StorageConfig::from_env()?,
            server: ServerConfig::resolve()?,
            ai: AiConfig::resolve()?,
            session: SessionConfig::resolve()?,
            view_cache_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn backend_names_are_case_insensitive() {
        assert_eq!(
            DatabaseBackend::from_str("LibSQL").expect("libsql"),
            DatabaseBackend::LibSql
        );
        assert_eq!(
            DatabaseBackend::from_str("postgresql").expect("pg"),
            DatabaseBackend::Postgres
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = DatabaseBackend::from_str("mongo").expect_err("must reject");
        let ConfigError::InvalidValue { key, message } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "DATABASE_BACKEND");
        assert!(message.contains("mongo"), "unexpected message: {message}");
    }

    #[test]
    fn short_session_secret_is_rejected() {
        let err = validate_session_secret(&SecretString::from("too-short".to_string()))
            .expect_err("must reject");
        let ConfigError::InvalidValue { key, .. } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "SESSION_SECRET");
    }

    #[test]
    fn long_session_secret_is_accepted() {
        let secret = SecretString::from("x".repeat(MIN_SESSION_SECRET_BYTES));
        validate_session_secret(&secret).expect("32 bytes is enough");
    }

    #[test]
    fn gateway_url_is_normalized_without_trailing_slash() {
        assert_eq!(
            validate_gateway_url("https://gateway.example.com/").expect("valid"),
            "https://gateway.example.com"
        );
    }

    #[test]
    fn gateway_url_rejects_other_schemes() {
        let err = validate_gateway_url("ftp://gateway.example.com").expect_err("must reject");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
