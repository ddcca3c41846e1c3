//! libSQL implementation of `DocumentStore`.
//!
//! All collections share one `documents` table; bodies are JSON text queried
//! through SQLite's JSON1 functions.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Value as SqlValue, params};
use serde_json::Value;
use uuid::Uuid;

use super::{
    DELETED_AT, DocQuery, Document, DocumentStore, Fields, UPDATED_AT, now_millis,
    validate_field_name,
};
use crate::db::libsql::{get_i64, get_text, query_all, query_opt};
use crate::error::DatabaseError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    body TEXT NOT NULL CHECK (json_valid(body)),
    creation_time INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_collection
    ON documents (collection, creation_time);
CREATE INDEX IF NOT EXISTS idx_documents_supabase_id
    ON documents (collection, json_extract(body, '$.supabaseId'));
"#;

const DOC_COLUMNS: &str = "id, collection, body, creation_time";
const LIVE: &str = "json_extract(body, '$.deletedAt') IS NULL";

/// Document store on an embedded libSQL file or Turso replica.
#[derive(Clone)]
pub struct LibSqlDocumentStore {
    db: Arc<libsql::Database>,
}

impl LibSqlDocumentStore {
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

    async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        conn.query("PRAGMA busy_timeout = 5000", ()).await?;
        Ok(conn)
    }
}

fn row_to_document(row: &libsql::Row) -> Result<Document, DatabaseError> {
    let id = get_text(row, 0);
    let body = get_text(row, 2);
    let Value::Object(fields) = serde_json::from_str::<Value>(&body)? else {
        return Err(DatabaseError::Serialization(format!(
            "document {id} body is not an object"
        )));
    };
    Ok(Document {
        id,
        collection: get_text(row, 1),
        creation_time: get_i64(row, 3),
        fields,
    })
}

fn json_path(field: &str) -> Result<String, DatabaseError> {
    validate_field_name(field)?;
    Ok(format!("$.{field}"))
}

/// Scalar JSON to the SQL value `json_extract` yields for it.
fn bind_scalar(field: &str, value: &Value) -> Result<SqlValue, DatabaseError> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(SqlValue::Integer(i)),
            (None, Some(f)) => Ok(SqlValue::Real(f)),
            _ => Err(DatabaseError::Query(format!(
                "unsupported number in filter on '{field}'"
            ))),
        },
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(DatabaseError::Query(format!(
            "cannot filter on non-scalar value of '{field}'"
        ))),
    }
}

fn body_text(fields: Fields) -> String {
    Value::Object(fields).to_string()
}

#[async_trait]
impl DocumentStore for LibSqlDocumentStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute_batch(SCHEMA)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "SELECT {DOC_COLUMNS} FROM documents WHERE collection = ?1 AND id = ?2 AND {LIVE}"
            ),
            params![collection, id],
            row_to_document,
        )
        .await
    }

    async fn find(&self, query: &DocQuery) -> Result<Vec<Document>, DatabaseError> {
        let mut sql = format!("SELECT {DOC_COLUMNS} FROM documents WHERE collection = ?");
        let mut values = vec![SqlValue::Text(query.collection.clone())];

        for filter in &query.filters {
            let path = json_path(&filter.field)?;
            if filter.value.is_null() {
                sql.push_str(" AND json_extract(body, ?) IS NULL");
                values.push(SqlValue::Text(path));
            } else if filter.fold_case {
                sql.push_str(" AND lower(json_extract(body, ?)) = lower(?)");
                values.push(SqlValue::Text(path));
                values.push(bind_scalar(&filter.field, &filter.value)?);
            } else {
                sql.push_str(" AND json_extract(body, ?) = ?");
                values.push(SqlValue::Text(path));
                values.push(bind_scalar(&filter.field, &filter.value)?);
            }
        }
        if !query.include_deleted {
            sql.push_str(" AND ");
            sql.push_str(LIVE);
        }

        sql.push_str(" ORDER BY ");
        if let Some(order) = &query.order {
            let path = json_path(&order.field)?;
            if order.fold_case {
                sql.push_str("lower(json_extract(body, ?)) ");
            } else {
                sql.push_str("json_extract(body, ?) ");
            }
            values.push(SqlValue::Text(path));
            sql.push_str(order.direction.as_sql());
            sql.push_str(", ");
        }
        sql.push_str("creation_time ASC, id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.connect().await?;
        query_all(&conn, &sql, libsql::params_from_iter(values), row_to_document).await
    }

    async fn insert(&self, collection: &str, fields: Fields) -> Result<Document, DatabaseError> {
        let id = Uuid::new_v4().simple().to_string();
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "INSERT INTO documents (id, collection, body, creation_time) \
                 VALUES (?1, ?2, ?3, ?4) RETURNING {DOC_COLUMNS}"
            ),
            params![id.as_str(), collection, body_text(fields), now_millis()],
            row_to_document,
        )
        .await?
        .ok_or_else(|| DatabaseError::Query(format!("failed to insert into {collection}")))
    }

    async fn patch(
        &self,
        collection: &str,
        id: &str,
        mut fields: Fields,
    ) -> Result<Option<Document>, DatabaseError> {
        fields.remove(DELETED_AT);
        fields.insert(UPDATED_AT.to_string(), Value::from(now_millis()));
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "UPDATE documents SET body = json_patch(body, ?3) \
                 WHERE collection = ?1 AND id = ?2 AND {LIVE} RETURNING {DOC_COLUMNS}"
            ),
            params![collection, id, body_text(fields)],
            row_to_document,
        )
        .await
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<Option<Document>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "UPDATE documents SET body = ?3 \
                 WHERE collection = ?1 AND id = ?2 RETURNING {DOC_COLUMNS}"
            ),
            params![collection, id, body_text(fields)],
            row_to_document,
        )
        .await
    }

    async fn archive(&self, collection: &str, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE documents \
                     SET body = json_set(body, '$.deletedAt', ?3, '$.updatedAt', ?3) \
                     WHERE collection = ?1 AND id = ?2 AND {LIVE}"
                ),
                params![collection, id, now_millis()],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn count(&self, collection: &str, include_deleted: bool) -> Result<u64, DatabaseError> {
        let mut sql = "SELECT COUNT(*) FROM documents WHERE collection = ?1".to_string();
        if !include_deleted {
            sql.push_str(" AND ");
            sql.push_str(LIVE);
        }
        let conn = self.connect().await?;
        let count = query_opt(&conn, &sql, params![collection], |row| Ok(get_i64(row, 0)))
            .await?
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
