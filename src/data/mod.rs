//! Dual-backend data access for the migrating domains.
//!
//! Each domain has one capability trait with a relational implementation
//! (over `db::Database`), a document implementation (over
//! `docstore::DocumentStore`), and a [`FlagRouted`] selector that checks the
//! domain's feature flag on every call. Both implementations return the same
//! normalized shapes, with string ids.
//!
//! Errors from the selected backend propagate as they are. There is no
//! fallback to the other backend.

mod clients;
mod projects;
mod tasks;
mod users;

pub use clients::{ClientRepository, DocumentClients, RelationalClients};
pub use projects::{DocumentProjects, ProjectRepository, RelationalProjects};
pub use tasks::{DocumentTasks, RelationalTasks, TaskRepository};
pub use users::{DocumentUsers, RelationalUsers, UserDirectory};

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::{Domain, FeatureFlags};
use crate::db::{
    ClientStatus, Database, DbEnum, HourBlockRecord, ProjectStatus, TaskPriority, TaskStatus,
    UserRole, parse_db_enum,
};
use crate::docstore::{Document, DocumentStore, Fields};
use crate::error::DatabaseError;

// ==================== Normalized shapes ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: ClientStatus,
    pub notes: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A client together with its prepaid hour blocks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientDetail {
    pub client: Client,
    pub hour_blocks: Vec<HourBlockRecord>,
    pub total_hours: Decimal,
}

impl ClientDetail {
    pub fn new(client: Client, hour_blocks: Vec<HourBlockRecord>) -> Self {
        let total_hours = hour_blocks.iter().map(|b| b.hours).sum();
        Self {
            client,
            hour_blocks,
            total_hours,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: String,
    pub client_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub client_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<String>,
    pub due_on: Option<NaiveDate>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<String>,
    pub due_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<Option<String>>,
    pub due_on: Option<Option<NaiveDate>>,
}

/// Authenticated principal as seen by the request path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppUser {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

impl AppUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

// ==================== Flag routing ====================

/// Which backend currently serves a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Relational,
    Document,
}

/// Routes each call to the relational or document implementation of `R`
/// according to the current state of one domain flag.
pub struct FlagRouted<R: ?Sized> {
    domain: Domain,
    flags: Arc<FeatureFlags>,
    relational: Arc<R>,
    document: Arc<R>,
}

impl<R: ?Sized> FlagRouted<R> {
    pub fn new(domain: Domain, flags: Arc<FeatureFlags>, relational: Arc<R>, document: Arc<R>) -> Self {
        Self {
            domain,
            flags,
            relational,
            document,
        }
    }

    pub fn backend(&self) -> Backend {
        if self.flags.is_enabled(self.domain) {
            Backend::Document
        } else {
            Backend::Relational
        }
    }

    pub(crate) fn active(&self) -> &R {
        match self.backend() {
            Backend::Document => &*self.document,
            Backend::Relational => &*self.relational,
        }
    }
}

/// The four flag-routed repositories, built once at startup.
#[derive(Clone)]
pub struct DataLayer {
    pub clients: Arc<FlagRouted<dyn ClientRepository>>,
    pub projects: Arc<FlagRouted<dyn ProjectRepository>>,
    pub tasks: Arc<FlagRouted<dyn TaskRepository>>,
    pub users: Arc<FlagRouted<dyn UserDirectory>>,
}

impl DataLayer {
    pub fn new(
        db: Arc<dyn Database>,
        docs: Arc<dyn DocumentStore>,
        flags: Arc<FeatureFlags>,
    ) -> Self {
        let relational_clients: Arc<dyn ClientRepository> =
            Arc::new(RelationalClients::new(Arc::clone(&db)));
        let document_clients: Arc<dyn ClientRepository> =
            Arc::new(DocumentClients::new(Arc::clone(&docs), Arc::clone(&db)));
        let relational_projects: Arc<dyn ProjectRepository> =
            Arc::new(RelationalProjects::new(Arc::clone(&db)));
        let document_projects: Arc<dyn ProjectRepository> =
            Arc::new(DocumentProjects::new(Arc::clone(&docs)));
        let relational_users: Arc<dyn UserDirectory> =
            Arc::new(RelationalUsers::new(Arc::clone(&db)));
        let document_users: Arc<dyn UserDirectory> =
            Arc::new(DocumentUsers::new(Arc::clone(&docs)));
        let users = Arc::new(FlagRouted::new(
            Domain::Auth,
            Arc::clone(&flags),
            relational_users,
            document_users,
        ));
        let directory: Arc<dyn UserDirectory> = users.clone();
        let relational_tasks: Arc<dyn TaskRepository> = Arc::new(RelationalTasks::new(db));
        let document_tasks: Arc<dyn TaskRepository> =
            Arc::new(DocumentTasks::new(docs, directory));

        Self {
            clients: Arc::new(FlagRouted::new(
                Domain::Clients,
                Arc::clone(&flags),
                relational_clients,
                document_clients,
            )),
            projects: Arc::new(FlagRouted::new(
                Domain::Projects,
                Arc::clone(&flags),
                relational_projects,
                document_projects,
            )),
            tasks: Arc::new(FlagRouted::new(
                Domain::Tasks,
                flags,
                relational_tasks,
                document_tasks,
            )),
            users,
        }
    }
}

// ==================== Shared conversion helpers ====================

/// Relational ids are UUIDs; anything else cannot exist there.
pub(crate) fn relational_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id.trim()).ok()
}

pub(crate) fn not_found(entity: &str, id: &str) -> DatabaseError {
    DatabaseError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

pub(crate) fn millis_to_ts(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

pub(crate) fn doc_ts(doc: &Document, field: &str) -> DateTime<Utc> {
    millis_to_ts(doc.get_i64(field).unwrap_or(doc.creation_time))
}

pub(crate) fn doc_opt_ts(doc: &Document, field: &str) -> Option<DateTime<Utc>> {
    doc.get_i64(field).map(millis_to_ts)
}

pub(crate) fn doc_text(doc: &Document, field: &str) -> Option<String> {
    doc.get_str(field).map(str::to_string)
}

pub(crate) fn doc_required_text(doc: &Document, field: &str) -> Result<String, DatabaseError> {
    doc_text(doc, field).ok_or_else(|| {
        DatabaseError::Serialization(format!(
            "{} document {} is missing '{field}'",
            doc.collection, doc.id
        ))
    })
}

pub(crate) fn doc_enum<T: DbEnum>(doc: &Document, field: &str) -> Result<T, DatabaseError> {
    parse_db_enum(&doc_required_text(doc, field)?)
}

pub(crate) fn doc_date(doc: &Document, field: &str) -> Result<Option<NaiveDate>, DatabaseError> {
    doc.get_str(field)
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                DatabaseError::Serialization(format!("invalid {field} '{raw}': {e}"))
            })
        })
        .transpose()
}

pub(crate) fn date_value(date: Option<NaiveDate>) -> Value {
    date.map(|d| Value::from(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

pub(crate) fn text_value(text: Option<&str>) -> Value {
    text.map(Value::from).unwrap_or(Value::Null)
}

/// Insert `key` only when the change set carries it.
pub(crate) fn set_change(fields: &mut Fields, key: &str, change: Option<Value>) {
    if let Some(value) = change {
        fields.insert(key.to_string(), value);
    }
}

pub(crate) fn require_name(name: &str, what: &str) -> Result<String, DatabaseError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DatabaseError::Serialization(format!(
            "{what} cannot be empty"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::db::CreateClientParams;
    use crate::testing::{test_db, test_docstore};

    type Repositories = (
        Arc<dyn ClientRepository>,
        Arc<dyn ProjectRepository>,
        Arc<dyn TaskRepository>,
    );

    fn new_project(client_id: &str) -> NewProject {
        NewProject {
            client_id: client_id.to_string(),
            name: "Website".to_string(),
            description: None,
            status: ProjectStatus::Planning,
            starts_on: None,
            ends_on: None,
        }
    }

    fn new_task(project_id: Option<&str>, assignee_id: Option<&str>) -> NewTask {
        NewTask {
            project_id: project_id.map(str::to_string),
            title: "Wireframes".to_string(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            assignee_id: assignee_id.map(str::to_string),
            due_on: None,
        }
    }

    fn assert_not_found(err: DatabaseError, expected: &str) {
        assert!(
            matches!(err, DatabaseError::NotFound { ref entity, .. } if entity == expected),
            "expected missing {expected}, got {err}"
        );
    }

    #[test]
    fn relational_ids_must_be_uuids() {
        assert!(relational_id("k57a1b2c3d4e5f6").is_none());
        assert!(relational_id("").is_none());
        let id = Uuid::new_v4();
        assert_eq!(relational_id(&id.to_string()), Some(id));
    }

    #[test]
    fn client_detail_sums_hours() {
        let client = Client {
            id: "c1".to_string(),
            name: "Acme".to_string(),
            email: None,
            phone: None,
            status: ClientStatus::Active,
            notes: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let block = |hours| HourBlockRecord {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            hours,
            description: None,
            purchased_on: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            created_at: Utc::now(),
        };
        let detail = ClientDetail::new(client, vec![block(dec!(10)), block(dec!(2.5))]);
        assert_eq!(detail.total_hours, dec!(12.5));
    }

    #[tokio::test]
    async fn flag_routing_is_evaluated_per_domain() {
        let db = test_db().await;
        let docs = test_docstore().await;
        let layer = DataLayer::new(
            Arc::new(db.db.clone()),
            Arc::new(docs.store.clone()),
            Arc::new(FeatureFlags::new([Domain::Clients, Domain::Auth]).expect("flags")),
        );
        assert_eq!(layer.clients.backend(), Backend::Document);
        assert_eq!(layer.projects.backend(), Backend::Relational);
        assert_eq!(layer.tasks.backend(), Backend::Relational);
        assert_eq!(layer.users.backend(), Backend::Document);
    }

    #[tokio::test]
    async fn both_backends_reject_archived_and_missing_parents() {
        let db = test_db().await;
        let docs = test_docstore().await;
        let relational: Arc<dyn Database> = Arc::new(db.db.clone());
        let store: Arc<dyn DocumentStore> = Arc::new(docs.store.clone());
        let backends: [(&str, Repositories); 2] = [
            (
                "relational",
                (
                    Arc::new(RelationalClients::new(Arc::clone(&relational))),
                    Arc::new(RelationalProjects::new(Arc::clone(&relational))),
                    Arc::new(RelationalTasks::new(Arc::clone(&relational))),
                ),
            ),
            (
                "document",
                (
                    Arc::new(DocumentClients::new(Arc::clone(&store), Arc::clone(&relational))),
                    Arc::new(DocumentProjects::new(Arc::clone(&store))),
                    Arc::new(DocumentTasks::new(
                        Arc::clone(&store),
                        Arc::new(DocumentUsers::new(Arc::clone(&store))),
                    )),
                ),
            ),
        ];

        for (backend, (clients, projects, tasks)) in backends {
            let client = clients
                .create_client(&CreateClientParams {
                    name: "Acme".to_string(),
                    email: None,
                    phone: None,
                    status: ClientStatus::Active,
                    notes: None,
                })
                .await
                .expect(backend);
            let project = projects
                .create_project(&new_project(&client.id))
                .await
                .expect(backend);
            assert!(projects.archive_project(&project.id).await.expect(backend));
            assert!(clients.archive_client(&client.id).await.expect(backend));

            let err = projects
                .create_project(&new_project(&client.id))
                .await
                .expect_err(backend);
            assert_not_found(err, "client");

            let unknown = Uuid::new_v4().to_string();
            let err = projects
                .create_project(&new_project(&unknown))
                .await
                .expect_err(backend);
            assert_not_found(err, "client");

            let err = tasks
                .create_task(&new_task(Some(&project.id), None))
                .await
                .expect_err(backend);
            assert_not_found(err, "project");

            let err = tasks
                .create_task(&new_task(None, Some(&unknown)))
                .await
                .expect_err(backend);
            assert_not_found(err, "user");

            assert!(tasks.list_tasks(None).await.expect(backend).is_empty(), "{backend}");
        }
    }
}
