//! Shared fixtures for unit tests.

use tempfile::TempDir;
use uuid::Uuid;

use crate::db::Database;
use crate::db::libsql::{LibSqlBackend, get_opt_text};
use crate::docstore::{DocumentStore, LibSqlDocumentStore};

/// Migrated relational store in a throwaway directory.
pub(crate) struct TestDb {
    pub db: LibSqlBackend,
    _dir: TempDir,
}

pub(crate) async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = LibSqlBackend::new_local(&dir.path().join("test.db"))
        .await
        .expect("open libsql");
    db.run_migrations().await.expect("migrations");
    TestDb { db, _dir: dir }
}

/// Raw `deleted_at` of a row, read past the live-row filters.
pub(crate) async fn raw_deleted_at(
    db: &LibSqlBackend,
    table: &str,
    id: Uuid,
) -> Option<String> {
    let conn = db.connect().await.expect("connect");
    let mut rows = conn
        .query(
            &format!("SELECT deleted_at FROM {table} WHERE id = ?1"),
            libsql::params![id.to_string()],
        )
        .await
        .expect("query");
    let row = rows.next().await.expect("next").expect("row still stored");
    get_opt_text(&row, 0)
}

/// Empty document store in a throwaway directory.
pub(crate) struct TestDocStore {
    pub store: LibSqlDocumentStore,
    _dir: TempDir,
}

pub(crate) async fn test_docstore() -> TestDocStore {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LibSqlDocumentStore::new_local(&dir.path().join("documents.db"))
        .await
        .expect("open docstore");
    store.run_migrations().await.expect("docstore schema");
    TestDocStore { store, _dir: dir }
}
