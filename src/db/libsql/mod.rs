//! libSQL backend for the `Database` trait.
//!
//! Opens one connection per operation against a shared `libsql::Database`
//! handle. Works against a local file or an embedded Turso replica.

mod billing;
mod crm;
mod work;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use libsql::{Connection, Value};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{Database, LineItem};
use crate::error::DatabaseError;

use super::libsql_migrations::SCHEMA;

/// Embedded libSQL relational backend.
#[derive(Clone)]
pub struct LibSqlBackend {
    db: Arc<libsql::Database>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Open an embedded replica of a remote Turso database.
    pub async fn new_remote_replica(
        path: &Path,
        url: &str,
        auth_token: &str,
    ) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_remote_replica(path, url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        conn.query("PRAGMA busy_timeout = 5000", ()).await?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        Ok(conn)
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute_batch(SCHEMA)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }
}

// ==================== Row helpers ====================

type RowMapper<T> = fn(&libsql::Row) -> Result<T, DatabaseError>;

pub(crate) async fn query_opt<T>(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
    map: RowMapper<T>,
) -> Result<Option<T>, DatabaseError> {
    let mut rows = conn.query(sql, params).await?;
    match rows.next().await? {
        Some(row) => map(&row).map(Some),
        None => Ok(None),
    }
}

pub(crate) async fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
    map: RowMapper<T>,
) -> Result<Vec<T>, DatabaseError> {
    let mut rows = conn.query(sql, params).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(map(&row)?);
    }
    Ok(out)
}

/// Like `query_opt`, but a missing row is a query error.
pub(crate) async fn query_one<T>(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
    map: RowMapper<T>,
    what: &str,
) -> Result<T, DatabaseError> {
    query_opt(conn, sql, params, map)
        .await?
        .ok_or_else(|| DatabaseError::Query(format!("failed to load {what}")))
}

pub(crate) fn get_text(row: &libsql::Row, idx: i32) -> String {
    get_opt_text(row, idx).unwrap_or_default()
}

pub(crate) fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    match row.get_value(idx) {
        Ok(Value::Text(s)) => Some(s),
        Ok(Value::Integer(i)) => Some(i.to_string()),
        Ok(Value::Real(f)) => Some(f.to_string()),
        _ => None,
    }
}

pub(crate) fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    get_opt_i64(row, idx).unwrap_or_default()
}

pub(crate) fn get_opt_i64(row: &libsql::Row, idx: i32) -> Option<i64> {
    match row.get_value(idx) {
        Ok(Value::Integer(i)) => Some(i),
        Ok(Value::Real(f)) => Some(f as i64),
        Ok(Value::Text(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    match value {
        Some(v) => Value::Text(v.to_string()),
        None => Value::Null,
    }
}

pub(crate) fn opt_uuid(value: Option<Uuid>) -> Value {
    match value {
        Some(id) => Value::Text(id.to_string()),
        None => Value::Null,
    }
}

pub(crate) fn opt_date(value: Option<NaiveDate>) -> Value {
    match value {
        Some(date) => Value::Text(fmt_date(date)),
        None => Value::Null,
    }
}

pub(crate) fn opt_ts(value: Option<DateTime<Utc>>) -> Value {
    match value {
        Some(ts) => Value::Text(fmt_ts(&ts)),
        None => Value::Null,
    }
}

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub(crate) fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn now_text() -> String {
    fmt_ts(&Utc::now())
}

/// Accepts RFC 3339 as well as SQLite's `datetime('now')` layout.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("invalid timestamp '{raw}': {e}")))
}

pub(crate) fn parse_opt_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} uuid: {e}")))
}

pub(crate) fn parse_opt_uuid(raw: Option<String>, field: &str) -> Result<Option<Uuid>, DatabaseError> {
    raw.as_deref().map(|value| parse_uuid(value, field)).transpose()
}

pub(crate) fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} date '{raw}': {e}")))
}

pub(crate) fn parse_opt_date(
    raw: Option<String>,
    field: &str,
) -> Result<Option<NaiveDate>, DatabaseError> {
    raw.as_deref().map(|value| parse_date(value, field)).transpose()
}

pub(crate) fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, DatabaseError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} '{raw}': {e}")))
}

pub(crate) fn parse_line_items(raw: &str) -> Result<Vec<LineItem>, DatabaseError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timestamp_accepts_both_layouts() {
        let rfc = parse_timestamp("2026-03-01T10:20:30.123Z").expect("rfc3339");
        let sqlite = parse_timestamp("2026-03-01 10:20:30").expect("sqlite layout");
        assert_eq!(fmt_ts(&rfc), "2026-03-01T10:20:30.123Z");
        assert_eq!(fmt_ts(&sqlite), "2026-03-01T10:20:30.000Z");
    }

    #[test]
    fn parse_helpers_name_the_field() {
        let err = parse_uuid("nope", "lead.id").expect_err("must fail");
        assert!(err.to_string().contains("lead.id"), "{err}");
        let err = parse_decimal("ten", "hours").expect_err("must fail");
        assert!(err.to_string().contains("hours"), "{err}");
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let fixture = crate::testing::test_db().await;
        fixture
            .db
            .run_migrations()
            .await
            .expect("second run succeeds");

        let conn = fixture.db.connect().await.expect("connect");
        let mut rows = conn
            .query(
                "SELECT value FROM counters WHERE name = 'invoice_number'",
                (),
            )
            .await
            .expect("query");
        let row = rows.next().await.expect("row read").expect("counter row");
        assert_eq!(get_i64(&row, 0), 0);
    }
}
