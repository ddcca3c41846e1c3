//! Document store.
//!
//! Collections of schemaless JSON documents. Every document has an opaque
//! string id and a creation time (epoch millis) held outside its body; body
//! fields are camelCase. Soft deletion sets `deletedAt` (epoch millis) and
//! documents that were migrated from the relational store carry the original
//! UUID in `supabaseId`.

mod libsql;

pub use self::libsql::LibSqlDocumentStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::DocStoreConfig;
use crate::db::SoftDelete;
use crate::error::DatabaseError;

/// Body of a document.
pub type Fields = Map<String, Value>;

pub const DELETED_AT: &str = "deletedAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const SUPABASE_ID: &str = "supabaseId";

/// Collection names of the migrating domains.
pub mod collections {
    pub const USERS: &str = "users";
    pub const CLIENTS: &str = "clients";
    pub const PROJECTS: &str = "projects";
    pub const TASKS: &str = "tasks";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub creation_time: i64,
    pub fields: Fields,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn supabase_id(&self) -> Option<&str> {
        self.get_str(SUPABASE_ID)
    }

    pub fn deleted_at_millis(&self) -> Option<i64> {
        self.get_i64(DELETED_AT)
    }

    pub fn updated_at_millis(&self) -> Option<i64> {
        self.get_i64(UPDATED_AT)
    }
}

impl SoftDelete for Document {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at_millis()
            .and_then(DateTime::from_timestamp_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocFilter {
    pub field: String,
    pub value: Value,
    /// Compare text case-insensitively.
    pub fold_case: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocOrder {
    pub field: String,
    pub direction: SortDirection,
    /// Compare text case-insensitively.
    pub fold_case: bool,
}

/// Query over one collection.
///
/// Filters are equality matches on top-level fields; a `Null` filter matches
/// missing fields too. Results are ordered by the requested field, then by
/// creation time and id.
#[derive(Debug, Clone, PartialEq)]
pub struct DocQuery {
    pub collection: String,
    pub filters: Vec<DocFilter>,
    pub include_deleted: bool,
    pub order: Option<DocOrder>,
    pub limit: Option<usize>,
}

impl DocQuery {
    pub fn collection(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            filters: Vec::new(),
            include_deleted: false,
            order: None,
            limit: None,
        }
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(DocFilter {
            field: field.to_string(),
            value: value.into(),
            fold_case: false,
        });
        self
    }

    pub fn eq_ignore_case(mut self, field: &str, value: &str) -> Self {
        self.filters.push(DocFilter {
            field: field.to_string(),
            value: Value::from(value),
            fold_case: true,
        });
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order = Some(DocOrder {
            field: field.to_string(),
            direction,
            fold_case: false,
        });
        self
    }

    pub fn order_by_text(mut self, field: &str, direction: SortDirection) -> Self {
        self.order = Some(DocOrder {
            field: field.to_string(),
            direction,
            fold_case: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Collection/document persistence API.
///
/// Reads skip soft-deleted documents unless the query opts in. `patch`,
/// `archive` and `get` act only on live documents; `replace` is the
/// import path and touches deleted ones too.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, DatabaseError>;

    async fn find(&self, query: &DocQuery) -> Result<Vec<Document>, DatabaseError>;

    async fn find_one(&self, query: &DocQuery) -> Result<Option<Document>, DatabaseError> {
        let query = query.clone().limit(1);
        Ok(self.find(&query).await?.into_iter().next())
    }

    async fn insert(&self, collection: &str, fields: Fields) -> Result<Document, DatabaseError>;

    /// Merge `fields` into a live document and stamp `updatedAt`. A `Null`
    /// value removes the field.
    async fn patch(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<Option<Document>, DatabaseError>;

    /// Overwrite the whole body, whether or not the document is deleted.
    async fn replace(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<Option<Document>, DatabaseError>;

    /// Set `deletedAt` on a live document. Returns `false` when nothing changed.
    async fn archive(&self, collection: &str, id: &str) -> Result<bool, DatabaseError>;

    async fn count(&self, collection: &str, include_deleted: bool) -> Result<u64, DatabaseError>;
}

/// Open the document store described by `config` and apply its schema.
pub async fn connect_from_config(
    config: &DocStoreConfig,
) -> Result<Arc<dyn DocumentStore>, DatabaseError> {
    use secrecy::ExposeSecret as _;

    let default_path = crate::config::default_docstore_path();
    let path = config.path.as_deref().unwrap_or(&default_path);
    let store = match (&config.url, &config.auth_token) {
        (Some(url), Some(token)) => {
            LibSqlDocumentStore::new_remote_replica(path, url, token.expose_secret()).await?
        }
        (Some(_), None) => {
            return Err(DatabaseError::Pool(
                "DOCSTORE_AUTH_TOKEN required when DOCSTORE_URL is set".to_string(),
            ));
        }
        (None, _) => LibSqlDocumentStore::new_local(path).await?,
    };
    store.run_migrations().await?;
    Ok(Arc::new(store))
}

/// Current time as epoch millis, the document store's timestamp unit.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Field names are interpolated into JSON paths, so only plain identifiers
/// are accepted.
pub(crate) fn validate_field_name(field: &str) -> Result<(), DatabaseError> {
    let mut chars = field.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::Query(format!("invalid document field name '{field}'")))
    }
}
