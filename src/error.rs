//! Error types shared across the crate.
//!
//! Each layer gets its own `thiserror` enum. Conversions between layers are
//! explicit so that internal details never reach a client by accident: the
//! HTTP and action layers map everything they do not recognise to a generic
//! message after logging it.

use thiserror::Error;

/// Configuration errors raised while resolving the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration {key}: {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("feature flag '{flag}' requires '{requires}' to be enabled")]
    FlagDependency { flag: String, requires: String },
}

/// Persistence errors from either the relational store or the document store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("migration failed: {0}")]
    Migration(String),
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DatabaseError {
    fn from(e: tokio_postgres::Error) -> Self {
        if let Some(db_err) = e.as_db_error()
            && (db_err.code() == &tokio_postgres::error::SqlState::UNIQUE_VIOLATION
                || db_err.code() == &tokio_postgres::error::SqlState::FOREIGN_KEY_VIOLATION)
        {
            return Self::Constraint(db_err.message().to_string());
        }
        Self::Query(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

impl From<libsql::Error> for DatabaseError {
    fn from(e: libsql::Error) -> Self {
        let message = e.to_string();
        if message.contains("constraint failed") {
            Self::Constraint(message)
        } else {
            Self::Query(message)
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Failures talking to the AI gateway.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("AI gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("AI gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not parse model reply: {0}")]
    Parse(String),
}

/// Errors raised by the batch migration tools.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {file} line {line}: {message}")]
    Malformed {
        file: String,
        line: usize,
        message: String,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("{collection} '{supabase_id}' references missing {target} '{reference}'")]
    DanglingReference {
        collection: String,
        supabase_id: String,
        target: String,
        reference: String,
    },

    #[error("parity validation failed with {issues} issue(s)")]
    ParityFailed { issues: usize },
}
