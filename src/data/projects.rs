use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    FlagRouted, NewProject, Project, date_value, doc_date, doc_enum, doc_opt_ts,
    doc_required_text, doc_text, doc_ts, not_found, relational_id, require_name, set_change,
    text_value,
};
use crate::db::{CreateProjectParams, Database, ProjectRecord, UpdateProjectParams};
use crate::docstore::{
    Document, DocumentStore, DocQuery, Fields, SortDirection, collections, now_millis,
};
use crate::error::DatabaseError;

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn list_projects(&self, client_id: Option<&str>) -> Result<Vec<Project>, DatabaseError>;
    async fn get_project(&self, id: &str) -> Result<Option<Project>, DatabaseError>;
    /// Fails with `NotFound` when the owning client is missing or archived
    /// in the active backend.
    async fn create_project(&self, input: &NewProject) -> Result<Project, DatabaseError>;
    async fn update_project(
        &self,
        id: &str,
        input: &UpdateProjectParams,
    ) -> Result<Option<Project>, DatabaseError>;
    async fn archive_project(&self, id: &str) -> Result<bool, DatabaseError>;
}

// ==================== Relational ====================

pub struct RelationalProjects {
    db: Arc<dyn Database>,
}

impl RelationalProjects {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

fn from_record(record: ProjectRecord) -> Project {
    Project {
        id: record.id.to_string(),
        client_id: record.client_id.to_string(),
        name: record.name,
        description: record.description,
        status: record.status,
        starts_on: record.starts_on,
        ends_on: record.ends_on,
        deleted_at: record.deleted_at,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

#[async_trait]
impl ProjectRepository for RelationalProjects {
    async fn list_projects(&self, client_id: Option<&str>) -> Result<Vec<Project>, DatabaseError> {
        let client_id = match client_id {
            Some(raw) => match relational_id(raw) {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        Ok(self
            .db
            .list_projects(client_id)
            .await?
            .into_iter()
            .map(from_record)
            .collect())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, DatabaseError> {
        let Some(id) = relational_id(id) else {
            return Ok(None);
        };
        Ok(self.db.get_project(id).await?.map(from_record))
    }

    async fn create_project(&self, input: &NewProject) -> Result<Project, DatabaseError> {
        let client_id =
            relational_id(&input.client_id).ok_or_else(|| not_found("client", &input.client_id))?;
        // The foreign key alone accepts soft-deleted clients.
        if self.db.get_client(client_id).await?.is_none() {
            return Err(not_found("client", &input.client_id));
        }
        let record = self
            .db
            .create_project(&CreateProjectParams {
                client_id,
                name: require_name(&input.name, "project name")?,
                description: input.description.clone(),
                status: input.status,
                starts_on: input.starts_on,
                ends_on: input.ends_on,
            })
            .await?;
        Ok(from_record(record))
    }

    async fn update_project(
        &self,
        id: &str,
        input: &UpdateProjectParams,
    ) -> Result<Option<Project>, DatabaseError> {
        let Some(id) = relational_id(id) else {
            return Ok(None);
        };
        Ok(self.db.update_project(id, input).await?.map(from_record))
    }

    async fn archive_project(&self, id: &str) -> Result<bool, DatabaseError> {
        match relational_id(id) {
            Some(id) => self.db.archive_project(id).await,
            None => Ok(false),
        }
    }
}

// ==================== Document ====================

pub struct DocumentProjects {
    docs: Arc<dyn DocumentStore>,
}

impl DocumentProjects {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }
}

pub(crate) fn from_document(doc: &Document) -> Result<Project, DatabaseError> {
    Ok(Project {
        id: doc.id.clone(),
        client_id: doc_required_text(doc, "clientId")?,
        name: doc_required_text(doc, "name")?,
        description: doc_text(doc, "description"),
        status: doc_enum(doc, "status")?,
        starts_on: doc_date(doc, "startsOn")?,
        ends_on: doc_date(doc, "endsOn")?,
        deleted_at: doc_opt_ts(doc, "deletedAt"),
        created_at: doc_ts(doc, "createdAt"),
        updated_at: doc_ts(doc, "updatedAt"),
    })
}

#[async_trait]
impl ProjectRepository for DocumentProjects {
    async fn list_projects(&self, client_id: Option<&str>) -> Result<Vec<Project>, DatabaseError> {
        let mut query = DocQuery::collection(collections::PROJECTS);
        if let Some(client_id) = client_id {
            query = query.eq("clientId", client_id);
        }
        let query = query.order_by_text("name", SortDirection::Asc);
        self.docs.find(&query).await?.iter().map(from_document).collect()
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, DatabaseError> {
        self.docs
            .get(collections::PROJECTS, id)
            .await?
            .as_ref()
            .map(from_document)
            .transpose()
    }

    async fn create_project(&self, input: &NewProject) -> Result<Project, DatabaseError> {
        let name = require_name(&input.name, "project name")?;
        if self
            .docs
            .get(collections::CLIENTS, &input.client_id)
            .await?
            .is_none()
        {
            return Err(not_found("client", &input.client_id));
        }

        let now = now_millis();
        let mut fields = Fields::new();
        fields.insert("clientId".to_string(), Value::from(input.client_id.as_str()));
        fields.insert("name".to_string(), Value::from(name));
        fields.insert(
            "description".to_string(),
            text_value(input.description.as_deref()),
        );
        fields.insert("status".to_string(), Value::from(input.status.as_str()));
        fields.insert("startsOn".to_string(), date_value(input.starts_on));
        fields.insert("endsOn".to_string(), date_value(input.ends_on));
        fields.insert("createdAt".to_string(), Value::from(now));
        fields.insert("updatedAt".to_string(), Value::from(now));
        let doc = self.docs.insert(collections::PROJECTS, fields).await?;
        from_document(&doc)
    }

    async fn update_project(
        &self,
        id: &str,
        input: &UpdateProjectParams,
    ) -> Result<Option<Project>, DatabaseError> {
        let mut fields = Fields::new();
        if let Some(name) = &input.name {
            fields.insert(
                "name".to_string(),
                Value::from(require_name(name, "project name")?),
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
        set_change(&mut fields, "startsOn", input.starts_on.map(date_value));
        set_change(&mut fields, "endsOn", input.ends_on.map(date_value));
        self.docs
            .patch(collections::PROJECTS, id, fields)
            .await?
            .as_ref()
            .map(from_document)
            .transpose()
    }

    async fn archive_project(&self, id: &str) -> Result<bool, DatabaseError> {
        self.docs.archive(collections::PROJECTS, id).await
    }
}

// ==================== Flag-routed ====================

#[async_trait]
impl ProjectRepository for FlagRouted<dyn ProjectRepository> {
    async fn list_projects(&self, client_id: Option<&str>) -> Result<Vec<Project>, DatabaseError> {
        self.active().list_projects(client_id).await
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, DatabaseError> {
        self.active().get_project(id).await
    }

    async fn create_project(&self, input: &NewProject) -> Result<Project, DatabaseError> {
        self.active().create_project(input).await
    }

    async fn update_project(
        &self,
        id: &str,
        input: &UpdateProjectParams,
    ) -> Result<Option<Project>, DatabaseError> {
        self.active().update_project(id, input).await
    }

    async fn archive_project(&self, id: &str) -> Result<bool, DatabaseError> {
        self.active().archive_project(id).await
    }
}
