//! Batch migration of the migrating domains from the relational store into
//! the document store.
//!
//! The pipeline is four steps, each runnable on its own:
//!
//! 1. `export`: relational rows (soft-deleted ones included) to
//!    `<dir>/export/<table>.jsonl`.
//! 2. `transform`: camelCase fields, epoch-millis timestamps, `supabaseId`
//!    and `<entity>SupabaseId` references, written to
//!    `<dir>/transformed/<collection>.jsonl`.
//! 3. `import`: upsert by `supabaseId` in dependency order, re-resolving
//!    references to document ids.
//! 4. `validate`: parity report between the two backends.

mod export;
mod import;
mod transform;
mod validate;

pub use export::{ExportSummary, export};
pub use import::{ImportSummary, import};
pub use transform::{TransformSummary, camel_case, transform, transform_row};
pub use validate::{CollectionParity, IssueKind, ParityIssue, ParityReport, validate};

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::db::Database;
use crate::docstore::{DocumentStore, Fields, collections};
use crate::error::MigrationError;

/// A migrating domain, listed in import (dependency) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Users,
    Clients,
    Projects,
    Tasks,
}

/// A foreign key carried across the migration.
#[derive(Debug, Clone, Copy)]
pub struct Reference {
    /// Relational column, e.g. `client_id`.
    pub column: &'static str,
    /// Transformed field carrying the relational UUID.
    pub supabase_field: &'static str,
    /// Document field holding the resolved document id.
    pub document_field: &'static str,
    pub target: Entity,
}

const PROJECT_REFERENCES: &[Reference] = &[Reference {
    column: "client_id",
    supabase_field: "clientSupabaseId",
    document_field: "clientId",
    target: Entity::Clients,
}];

const TASK_REFERENCES: &[Reference] = &[
    Reference {
        column: "project_id",
        supabase_field: "projectSupabaseId",
        document_field: "projectId",
        target: Entity::Projects,
    },
    Reference {
        column: "assignee_id",
        supabase_field: "assigneeSupabaseId",
        document_field: "assigneeId",
        target: Entity::Users,
    },
];

impl Entity {
    pub const ALL: [Entity; 4] = [Self::Users, Self::Clients, Self::Projects, Self::Tasks];

    /// Relational table name, also the export file stem.
    pub fn table(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Clients => "clients",
            Self::Projects => "projects",
            Self::Tasks => "tasks",
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            Self::Users => collections::USERS,
            Self::Clients => collections::CLIENTS,
            Self::Projects => collections::PROJECTS,
            Self::Tasks => collections::TASKS,
        }
    }

    pub fn references(self) -> &'static [Reference] {
        match self {
            Self::Projects => PROJECT_REFERENCES,
            Self::Tasks => TASK_REFERENCES,
            Self::Users | Self::Clients => &[],
        }
    }

    /// Fields every migrated document must carry.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Users => &["email", "fullName", "role", "passwordHash"],
            Self::Clients => &["name", "status"],
            Self::Projects => &["name", "status", "clientId"],
            Self::Tasks => &["title", "status", "priority"],
        }
    }

    /// Fields compared one-to-one between a row and its document.
    pub fn key_fields(self) -> &'static [&'static str] {
        match self {
            Self::Users => &["email", "fullName"],
            Self::Clients => &["name", "email", "phone", "status", "notes"],
            Self::Projects => &["name", "description", "status", "startsOn", "endsOn"],
            Self::Tasks => &["title", "description", "status", "priority", "dueOn"],
        }
    }
}

/// File layout of one migration working directory.
#[derive(Debug, Clone)]
pub struct MigrationPaths {
    root: PathBuf,
}

impl MigrationPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn export_file(&self, entity: Entity) -> PathBuf {
        self.root
            .join("export")
            .join(format!("{}.jsonl", entity.table()))
    }

    pub fn transformed_file(&self, entity: Entity) -> PathBuf {
        self.root
            .join("transformed")
            .join(format!("{}.jsonl", entity.collection()))
    }
}

/// Outcome of `migrate run`.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub export: ExportSummary,
    pub transform: TransformSummary,
    pub import: ImportSummary,
    pub validate: ParityReport,
}

/// Export, transform, import and validate in one go. Stops at the first
/// failing step; a parity failure is returned as [`MigrationError::ParityFailed`].
pub async fn run(
    db: &dyn Database,
    docs: &dyn DocumentStore,
    paths: &MigrationPaths,
) -> Result<RunSummary, MigrationError> {
    let export = export(db, paths).await?;
    let transform = transform(paths).await?;
    let import = import(docs, paths).await?;
    let validate = validate(db, docs).await?;
    validate.check()?;
    Ok(RunSummary {
        export,
        transform,
        import,
        validate,
    })
}

// ==================== JSONL ====================

fn io_error(path: &Path, source: std::io::Error) -> MigrationError {
    MigrationError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) async fn write_jsonl(path: &Path, rows: &[Value]) -> Result<(), MigrationError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    let mut out = String::new();
    for row in rows {
        out.push_str(&row.to_string());
        out.push('\n');
    }
    let mut file = fs::File::create(path).await.map_err(|e| io_error(path, e))?;
    file.write_all(out.as_bytes())
        .await
        .map_err(|e| io_error(path, e))?;
    file.flush().await.map_err(|e| io_error(path, e))
}

/// One parsed line with its 1-based line number.
pub(crate) struct JsonlRow {
    pub line: usize,
    pub fields: Fields,
}

pub(crate) async fn read_jsonl(path: &Path) -> Result<Vec<JsonlRow>, MigrationError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|e| io_error(path, e))?;
    let mut rows = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |message: String| MigrationError::Malformed {
            file: path.display().to_string(),
            line: index + 1,
            message,
        };
        match serde_json::from_str::<Value>(line).map_err(|e| malformed(e.to_string()))? {
            Value::Object(fields) => rows.push(JsonlRow {
                line: index + 1,
                fields,
            }),
            _ => return Err(malformed("expected a JSON object".to_string())),
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::auth::hash_password_with_cost;
    use crate::db::{
        ClientStatus, ClientStore, CreateClientParams, CreateProjectParams, CreateTaskParams,
        CreateUserParams, ProjectStatus, ProjectStore, TaskPriority, TaskStatus, TaskStore,
        UserRole, UserStore,
    };
    use crate::testing::{test_db, test_docstore};

    #[test]
    fn paths_follow_the_directory_layout() {
        let paths = MigrationPaths::new("/tmp/run");
        assert_eq!(
            paths.export_file(Entity::Clients),
            PathBuf::from("/tmp/run/export/clients.jsonl")
        );
        assert_eq!(
            paths.transformed_file(Entity::Tasks),
            PathBuf::from("/tmp/run/transformed/tasks.jsonl")
        );
    }

    #[tokio::test]
    async fn jsonl_reports_the_offending_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.jsonl");
        tokio::fs::write(&path, "{\"a\":1}\n\n[1,2]\n")
            .await
            .expect("write");
        match read_jsonl(&path).await {
            Err(MigrationError::Malformed { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected malformed error, got {:?}", other.map(|r| r.len())),
        }

        write_jsonl(&path, &[json!({"a": 1}), json!({"b": "x"})])
            .await
            .expect("write rows");
        let rows = read_jsonl(&path).await.expect("read");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].line, 2);
        assert_eq!(rows[1].fields.get("b"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn full_run_is_idempotent_and_reports_parity() {
        let relational = test_db().await;
        let docs = test_docstore().await;
        let db = &relational.db;

        let hash = hash_password_with_cost("password", 4).expect("hash");
        let user = db
            .create_user(&CreateUserParams {
                email: "owner@agency.test".to_string(),
                full_name: "Owner".to_string(),
                role: UserRole::Admin,
                password_hash: hash,
            })
            .await
            .expect("user");
        let client = db
            .create_client(&CreateClientParams {
                name: "Acme".to_string(),
                email: Some("ops@acme.test".to_string()),
                phone: None,
                status: ClientStatus::Active,
                notes: None,
            })
            .await
            .expect("client");
        let archived = db
            .create_client(&CreateClientParams {
                name: "Gone Ltd".to_string(),
                email: None,
                phone: None,
                status: ClientStatus::Inactive,
                notes: None,
            })
            .await
            .expect("client");
        assert!(db.archive_client(archived.id).await.expect("archive"));
        let project = db
            .create_project(&CreateProjectParams {
                client_id: client.id,
                name: "Website".to_string(),
                description: None,
                status: ProjectStatus::Active,
                starts_on: None,
                ends_on: None,
            })
            .await
            .expect("project");
        db.create_task(&CreateTaskParams {
            project_id: Some(project.id),
            title: "Wireframes".to_string(),
            description: Some("Home page".to_string()),
            status: TaskStatus::Todo,
            priority: TaskPriority::High,
            assignee_id: Some(user.id),
            due_on: None,
        })
        .await
        .expect("task");

        let dir = tempfile::tempdir().expect("tempdir");
        let paths = MigrationPaths::new(dir.path());

        let first = run(db, &docs.store, &paths).await.expect("first run");
        assert_eq!(first.export.rows(Entity::Clients), 2);
        assert_eq!(first.import.inserted, 5);
        assert!(first.validate.passed);

        let second = run(db, &docs.store, &paths).await.expect("second run");
        assert_eq!(second.import.inserted, 0);
        assert_eq!(second.import.updated, 5);
        assert_eq!(
            docs.store
                .count(collections::CLIENTS, true)
                .await
                .expect("count"),
            2
        );
    }
}
