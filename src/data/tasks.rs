use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{
    FlagRouted, NewTask, Task, TaskChanges, UserDirectory, date_value, doc_date, doc_enum,
    doc_opt_ts, doc_required_text, doc_text, doc_ts, not_found, relational_id, require_name,
    set_change, text_value,
};
use crate::db::{CreateTaskParams, Database, TaskRecord, UpdateTaskParams};
use crate::docstore::{
    Document, DocumentStore, DocQuery, Fields, SortDirection, collections, now_millis,
};
use crate::error::DatabaseError;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn list_tasks(&self, project_id: Option<&str>) -> Result<Vec<Task>, DatabaseError>;
    async fn get_task(&self, id: &str) -> Result<Option<Task>, DatabaseError>;
    async fn create_task(&self, input: &NewTask) -> Result<Task, DatabaseError>;
    async fn update_task(
        &self,
        id: &str,
        input: &TaskChanges,
    ) -> Result<Option<Task>, DatabaseError>;
    async fn archive_task(&self, id: &str) -> Result<bool, DatabaseError>;
}

// ==================== Relational ====================

pub struct RelationalTasks {
    db: Arc<dyn Database>,
}

impl RelationalTasks {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    // Foreign keys accept soft-deleted rows, so parents are checked first.
    async fn live_project(&self, raw: Option<&str>) -> Result<Option<Uuid>, DatabaseError> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let id = relational_id(raw).ok_or_else(|| not_found("project", raw))?;
        match self.db.get_project(id).await? {
            Some(_) => Ok(Some(id)),
            None => Err(not_found("project", raw)),
        }
    }

    async fn live_assignee(&self, raw: Option<&str>) -> Result<Option<Uuid>, DatabaseError> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let id = relational_id(raw).ok_or_else(|| not_found("user", raw))?;
        match self.db.get_user(id).await? {
            Some(_) => Ok(Some(id)),
            None => Err(not_found("user", raw)),
        }
    }
}

fn from_record(record: TaskRecord) -> Task {
    Task {
        id: record.id.to_string(),
        project_id: record.project_id.map(|id| id.to_string()),
        title: record.title,
        description: record.description,
        status: record.status,
        priority: record.priority,
        assignee_id: record.assignee_id.map(|id| id.to_string()),
        due_on: record.due_on,
        deleted_at: record.deleted_at,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

#[async_trait]
impl TaskRepository for RelationalTasks {
    async fn list_tasks(&self, project_id: Option<&str>) -> Result<Vec<Task>, DatabaseError> {
        let project_id = match project_id {
            Some(raw) => match relational_id(raw) {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        Ok(self
            .db
            .list_tasks(project_id)
            .await?
            .into_iter()
            .map(from_record)
            .collect())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        let Some(id) = relational_id(id) else {
            return Ok(None);
        };
        Ok(self.db.get_task(id).await?.map(from_record))
    }

    async fn create_task(&self, input: &NewTask) -> Result<Task, DatabaseError> {
        let record = self
            .db
            .create_task(&CreateTaskParams {
                project_id: self.live_project(input.project_id.as_deref()).await?,
                title: require_name(&input.title, "task title")?,
                description: input.description.clone(),
                status: input.status,
                priority: input.priority,
                assignee_id: self.live_assignee(input.assignee_id.as_deref()).await?,
                due_on: input.due_on,
            })
            .await?;
        Ok(from_record(record))
    }

    async fn update_task(
        &self,
        id: &str,
        input: &TaskChanges,
    ) -> Result<Option<Task>, DatabaseError> {
        let Some(id) = relational_id(id) else {
            return Ok(None);
        };
        let assignee_id = match &input.assignee_id {
            Some(raw) => Some(self.live_assignee(raw.as_deref()).await?),
            None => None,
        };
        let params = UpdateTaskParams {
            title: input.title.clone(),
            description: input.description.clone(),
            status: input.status,
            priority: input.priority,
            assignee_id,
            due_on: input.due_on,
        };
        Ok(self.db.update_task(id, &params).await?.map(from_record))
    }

    async fn archive_task(&self, id: &str) -> Result<bool, DatabaseError> {
        match relational_id(id) {
            Some(id) => self.db.archive_task(id).await,
            None => Ok(false),
        }
    }
}

// ==================== Document ====================

/// Tasks as documents. `projectId` points at a project document and
/// `assigneeId` holds the id the user directory handed out, so assignees are
/// checked against whichever directory is active.
pub struct DocumentTasks {
    docs: Arc<dyn DocumentStore>,
    users: Arc<dyn UserDirectory>,
}

impl DocumentTasks {
    pub fn new(docs: Arc<dyn DocumentStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { docs, users }
    }

    async fn check_assignee(&self, assignee_id: Option<&str>) -> Result<(), DatabaseError> {
        if let Some(id) = assignee_id
            && self.users.get_user(id).await?.is_none()
        {
            return Err(not_found("user", id));
        }
        Ok(())
    }
}

pub(crate) fn from_document(doc: &Document) -> Result<Task, DatabaseError> {
    Ok(Task {
        id: doc.id.clone(),
        project_id: doc_text(doc, "projectId"),
        title: doc_required_text(doc, "title")?,
        description: doc_text(doc, "description"),
        status: doc_enum(doc, "status")?,
        priority: doc_enum(doc, "priority")?,
        assignee_id: doc_text(doc, "assigneeId"),
        due_on: doc_date(doc, "dueOn")?,
        deleted_at: doc_opt_ts(doc, "deletedAt"),
        created_at: doc_ts(doc, "createdAt"),
        updated_at: doc_ts(doc, "updatedAt"),
    })
}

#[async_trait]
impl TaskRepository for DocumentTasks {
    async fn list_tasks(&self, project_id: Option<&str>) -> Result<Vec<Task>, DatabaseError> {
        let mut query = DocQuery::collection(collections::TASKS);
        if let Some(project_id) = project_id {
            query = query.eq("projectId", project_id);
        }
        let query = query.order_by("createdAt", SortDirection::Asc);
        self.docs.find(&query).await?.iter().map(from_document).collect()
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        self.docs
            .get(collections::TASKS, id)
            .await?
            .as_ref()
            .map(from_document)
            .transpose()
    }

    async fn create_task(&self, input: &NewTask) -> Result<Task, DatabaseError> {
        let title = require_name(&input.title, "task title")?;
        if let Some(project_id) = &input.project_id
            && self.docs.get(collections::PROJECTS, project_id).await?.is_none()
        {
            return Err(not_found("project", project_id));
        }
        self.check_assignee(input.assignee_id.as_deref()).await?;

        let now = now_millis();
        let mut fields = Fields::new();
        fields.insert(
            "projectId".to_string(),
            text_value(input.project_id.as_deref()),
        );
        fields.insert("title".to_string(), Value::from(title));
        fields.insert(
            "description".to_string(),
            text_value(input.description.as_deref()),
        );
        fields.insert("status".to_string(), Value::from(input.status.as_str()));
        fields.insert("priority".to_string(), Value::from(input.priority.as_str()));
        fields.insert(
            "assigneeId".to_string(),
            text_value(input.assignee_id.as_deref()),
        );
        fields.insert("dueOn".to_string(), date_value(input.due_on));
        fields.insert("createdAt".to_string(), Value::from(now));
        fields.insert("updatedAt".to_string(), Value::from(now));
        let doc = self.docs.insert(collections::TASKS, fields).await?;
        from_document(&doc)
    }

    async fn update_task(
        &self,
        id: &str,
        input: &TaskChanges,
    ) -> Result<Option<Task>, DatabaseError> {
        if let Some(assignee_id) = &input.assignee_id {
            self.check_assignee(assignee_id.as_deref()).await?;
        }
        let mut fields = Fields::new();
        if let Some(title) = &input.title {
            fields.insert(
                "title".to_string(),
                Value::from(require_name(title, "task title")?),
            );
        }
        set_change(
            &mut fields,
            "description",
            input.description.as_ref().map(|v| text_value(v.as_deref())),
        );
        set_change(
            &mut fields,
            "status",
            input.status.map(|s| Value::from(s.as_str())),
        );
        set_change(
            &mut fields,
            "priority",
            input.priority.map(|p| Value::from(p.as_str())),
        );
        set_change(
            &mut fields,
            "assigneeId",
            input.assignee_id.as_ref().map(|v| text_value(v.as_deref())),
        );
        set_change(&mut fields, "dueOn", input.due_on.map(date_value));
        self.docs
            .patch(collections::TASKS, id, fields)
            .await?
            .as_ref()
            .map(from_document)
            .transpose()
    }

    async fn archive_task(&self, id: &str) -> Result<bool, DatabaseError> {
        self.docs.archive(collections::TASKS, id).await
    }
}

// ==================== Flag-routed ====================

#[async_trait]
impl TaskRepository for FlagRouted<dyn TaskRepository> {
    async fn list_tasks(&self, project_id: Option<&str>) -> Result<Vec<Task>, DatabaseError> {
        self.active().list_tasks(project_id).await
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        self.active().get_task(id).await
    }

    async fn create_task(&self, input: &NewTask) -> Result<Task, DatabaseError> {
        self.active().create_task(input).await
    }

    async fn update_task(
        &self,
        id: &str,
        input: &TaskChanges,
    ) -> Result<Option<Task>, DatabaseError> {
        self.active().update_task(id, input).await
    }

    async fn archive_task(&self, id: &str) -> Result<bool, DatabaseError> {
        self.active().archive_task(id).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{Domain, FeatureFlags};
    use crate::data::{DocumentUsers, RelationalUsers};
    use crate::db::{TaskPriority, TaskStatus};
    use crate::testing::{test_db, test_docstore};

    fn loose_task(title: &str) -> NewTask {
        NewTask {
            project_id: None,
            title: title.to_string(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            assignee_id: None,
            due_on: None,
        }
    }

    #[tokio::test]
    async fn relational_rejects_non_uuid_references() {
        let fixture = test_db().await;
        let repo = RelationalTasks::new(Arc::new(fixture.db.clone()));
        let mut input = loose_task("Call back");
        input.assignee_id = Some("u_doc".to_string());
        let err = repo.create_task(&input).await.expect_err("bad assignee");
        assert!(
            matches!(err, DatabaseError::NotFound { ref entity, .. } if entity == "user"),
            "{err}"
        );

        let task = repo.create_task(&loose_task("Call back")).await.expect("create");
        let moved = repo
            .update_task(
                &task.id,
                &TaskChanges {
                    status: Some(TaskStatus::Done),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("live");
        assert_eq!(moved.status, TaskStatus::Done);
        assert_eq!(moved.title, "Call back");
    }

    #[tokio::test]
    async fn document_tasks_require_existing_project_documents() {
        let docs = test_docstore().await;
        let store: Arc<dyn DocumentStore> = Arc::new(docs.store.clone());
        let repo = DocumentTasks::new(Arc::clone(&store), Arc::new(DocumentUsers::new(store)));
        let mut input = loose_task("Design");
        input.project_id = Some("missing".to_string());
        let err = repo.create_task(&input).await.expect_err("missing project");
        assert!(matches!(err, DatabaseError::NotFound { .. }), "{err}");

        let first = repo.create_task(&loose_task("First")).await.expect("first");
        repo.create_task(&loose_task("Second")).await.expect("second");
        let titles: Vec<String> = repo
            .list_tasks(None)
            .await
            .expect("list")
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["First".to_string(), "Second".to_string()]);

        assert!(repo.archive_task(&first.id).await.expect("archive"));
        assert!(repo.get_task(&first.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn routed_tasks_switch_backend_with_the_flag() {
        let db = test_db().await;
        let docs = test_docstore().await;
        let relational: Arc<dyn TaskRepository> =
            Arc::new(RelationalTasks::new(Arc::new(db.db.clone())));
        let document: Arc<dyn TaskRepository> =
            Arc::new(DocumentTasks::new(
                Arc::new(docs.store.clone()),
                Arc::new(RelationalUsers::new(Arc::new(db.db.clone()))),
            ));

        let migrated = FlagRouted::new(
            Domain::Tasks,
            Arc::new(
                FeatureFlags::new([Domain::Clients, Domain::Projects, Domain::Tasks])
                    .expect("flags"),
            ),
            Arc::clone(&relational),
            Arc::clone(&document),
        );
        let task = migrated.create_task(&loose_task("Doc task")).await.expect("create");
        assert!(!task.id.contains('-'), "document ids are not hyphenated UUIDs");
        assert!(relational.list_tasks(None).await.expect("list").is_empty());
        assert_eq!(document.list_tasks(None).await.expect("list").len(), 1);
    }
}
