use libsql::params;
use uuid::Uuid;

use crate::db::{
    ClientRecord, CreateProjectParams, CreateTaskParams, ExportStore, ProjectRecord,
    ProjectStore, TaskRecord, TaskStore, UpdateProjectParams, UpdateTaskParams, UserRecord,
    parse_db_enum,
};
use crate::error::DatabaseError;

use super::crm::{CLIENT_COLUMNS, USER_COLUMNS, row_to_client_record, row_to_user_record};
use super::{
    LibSqlBackend, get_opt_text, get_text, now_text, opt_date, opt_text, opt_uuid,
    parse_opt_date, parse_opt_timestamp, parse_opt_uuid, parse_timestamp, parse_uuid, query_all,
    query_one, query_opt,
};

const PROJECT_COLUMNS: &str = "id, client_id, name, description, status, starts_on, ends_on, \
     deleted_at, created_at, updated_at";
const TASK_COLUMNS: &str = "id, project_id, title, description, status, priority, assignee_id, \
     due_on, deleted_at, created_at, updated_at";

fn row_to_project_record(row: &libsql::Row) -> Result<ProjectRecord, DatabaseError> {
    Ok(ProjectRecord {
        id: parse_uuid(&get_text(row, 0), "project.id")?,
        client_id: parse_uuid(&get_text(row, 1), "project.client_id")?,
        name: get_text(row, 2),
        description: get_opt_text(row, 3),
        status: parse_db_enum(&get_text(row, 4))?,
        starts_on: parse_opt_date(get_opt_text(row, 5), "starts_on")?,
        ends_on: parse_opt_date(get_opt_text(row, 6), "ends_on")?,
        deleted_at: parse_opt_timestamp(get_opt_text(row, 7))?,
        created_at: parse_timestamp(&get_text(row, 8))?,
        updated_at: parse_timestamp(&get_text(row, 9))?,
    })
}

fn row_to_task_record(row: &libsql::Row) -> Result<TaskRecord, DatabaseError> {
    Ok(TaskRecord {
        id: parse_uuid(&get_text(row, 0), "task.id")?,
        project_id: parse_opt_uuid(get_opt_text(row, 1), "task.project_id")?,
        title: get_text(row, 2),
        description: get_opt_text(row, 3),
        status: parse_db_enum(&get_text(row, 4))?,
        priority: parse_db_enum(&get_text(row, 5))?,
        assignee_id: parse_opt_uuid(get_opt_text(row, 6), "task.assignee_id")?,
        due_on: parse_opt_date(get_opt_text(row, 7), "due_on")?,
        deleted_at: parse_opt_timestamp(get_opt_text(row, 8))?,
        created_at: parse_timestamp(&get_text(row, 9))?,
        updated_at: parse_timestamp(&get_text(row, 10))?,
    })
}

#[async_trait::async_trait]
impl ProjectStore for LibSqlBackend {
    async fn create_project(
        &self,
        input: &CreateProjectParams,
    ) -> Result<ProjectRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO projects (id, client_id, name, description, status, starts_on, ends_on) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.as_str(),
                input.client_id.to_string(),
                input.name.trim(),
                opt_text(input.description.as_deref()),
                input.status.as_str(),
                opt_date(input.starts_on),
                opt_date(input.ends_on),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            params![id.as_str()],
            row_to_project_record,
            "created project",
        )
        .await
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<ProjectRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1 AND deleted_at IS NULL"
            ),
            params![id.to_string()],
            row_to_project_record,
        )
        .await
    }

    async fn list_projects(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<ProjectRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {PROJECT_COLUMNS} FROM projects \
                 WHERE deleted_at IS NULL AND (?1 IS NULL OR client_id = ?1) \
                 ORDER BY lower(name) ASC, id ASC"
            ),
            params![opt_uuid(client_id)],
            row_to_project_record,
        )
        .await
    }

    async fn update_project(
        &self,
        id: Uuid,
        input: &UpdateProjectParams,
    ) -> Result<Option<ProjectRecord>, DatabaseError> {
        let Some(existing) = self.get_project(id).await? else {
            return Ok(None);
        };
        let name = input.name.clone().unwrap_or(existing.name);
        let description = input.description.clone().unwrap_or(existing.description);
        let status = input.status.unwrap_or(existing.status);
        let starts_on = input.starts_on.unwrap_or(existing.starts_on);
        let ends_on = input.ends_on.unwrap_or(existing.ends_on);

        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE projects SET \
                   name = ?2, description = ?3, status = ?4, starts_on = ?5, ends_on = ?6, \
                   updated_at = ?7 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    id.to_string(),
                    name.trim(),
                    opt_text(description.as_deref()),
                    status.as_str(),
                    opt_date(starts_on),
                    opt_date(ends_on),
                    now_text(),
                ],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_project(id).await
    }

    async fn archive_project(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let archived = conn
            .execute(
                "UPDATE projects SET deleted_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), now_text()],
            )
            .await?;
        Ok(archived > 0)
    }
}

#[async_trait::async_trait]
impl TaskStore for LibSqlBackend {
    async fn create_task(&self, input: &CreateTaskParams) -> Result<TaskRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO tasks (id, project_id, title, description, status, priority, assignee_id, due_on) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.as_str(),
                opt_uuid(input.project_id),
                input.title.trim(),
                opt_text(input.description.as_deref()),
                input.status.as_str(),
                input.priority.as_str(),
                opt_uuid(input.assignee_id),
                opt_date(input.due_on),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id.as_str()],
            row_to_task_record,
            "created task",
        )
        .await
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<TaskRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND deleted_at IS NULL"),
            params![id.to_string()],
            row_to_task_record,
        )
        .await
    }

    async fn list_tasks(&self, project_id: Option<Uuid>) -> Result<Vec<TaskRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE deleted_at IS NULL AND (?1 IS NULL OR project_id = ?1) \
                 ORDER BY created_at ASC, id ASC"
            ),
            params![opt_uuid(project_id)],
            row_to_task_record,
        )
        .await
    }

    async fn update_task(
        &self,
        id: Uuid,
        input: &UpdateTaskParams,
    ) -> Result<Option<TaskRecord>, DatabaseError> {
        let Some(existing) = self.get_task(id).await? else {
            return Ok(None);
        };
        let title = input.title.clone().unwrap_or(existing.title);
        let description = input.description.clone().unwrap_or(existing.description);
        let status = input.status.unwrap_or(existing.status);
        let priority = input.priority.unwrap_or(existing.priority);
        let assignee_id = input.assignee_id.unwrap_or(existing.assignee_id);
        let due_on = input.due_on.unwrap_or(existing.due_on);

        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE tasks SET \
                   title = ?2, description = ?3, status = ?4, priority = ?5, assignee_id = ?6, \
                   due_on = ?7, updated_at = ?8 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    id.to_string(),
                    title.trim(),
                    opt_text(description.as_deref()),
                    status.as_str(),
                    priority.as_str(),
                    opt_uuid(assignee_id),
                    opt_date(due_on),
                    now_text(),
                ],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_task(id).await
    }

    async fn archive_task(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let archived = conn
            .execute(
                "UPDATE tasks SET deleted_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), now_text()],
            )
            .await?;
        Ok(archived > 0)
    }
}

#[async_trait::async_trait]
impl ExportStore for LibSqlBackend {
    async fn export_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC"),
            (),
            row_to_user_record,
        )
        .await
    }

    async fn export_clients(&self) -> Result<Vec<ClientRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!("SELECT {CLIENT_COLUMNS} FROM clients ORDER BY created_at ASC, id ASC"),
            (),
            row_to_client_record,
        )
        .await
    }

    async fn export_projects(&self) -> Result<Vec<ProjectRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at ASC, id ASC"),
            (),
            row_to_project_record,
        )
        .await
    }

    async fn export_tasks(&self) -> Result<Vec<TaskRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, id ASC"),
            (),
            row_to_task_record,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::db::{
        ClientStatus, ClientStore, CreateClientParams, ProjectStatus, TaskPriority, TaskStatus,
    };
    use crate::testing::test_db;

    async fn seed_client(db: &LibSqlBackend, name: &str) -> ClientRecord {
        db.create_client(&CreateClientParams {
            name: name.to_string(),
            email: None,
            phone: None,
            status: ClientStatus::Active,
            notes: None,
        })
        .await
        .expect("create client")
    }

    fn project_params(client_id: Uuid, name: &str) -> CreateProjectParams {
        CreateProjectParams {
            client_id,
            name: name.to_string(),
            description: None,
            status: ProjectStatus::Planning,
            starts_on: NaiveDate::from_ymd_opt(2026, 2, 1),
            ends_on: None,
        }
    }

    fn task_params(project_id: Option<Uuid>, title: &str) -> CreateTaskParams {
        CreateTaskParams {
            project_id,
            title: title.to_string(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            assignee_id: None,
            due_on: None,
        }
    }

    #[tokio::test]
    async fn projects_filter_by_client() {
        let fixture = test_db().await;
        let acme = seed_client(&fixture.db, "Acme").await;
        let globex = seed_client(&fixture.db, "Globex").await;
        fixture
            .db
            .create_project(&project_params(acme.id, "Website"))
            .await
            .expect("project");
        fixture
            .db
            .create_project(&project_params(globex.id, "Audit"))
            .await
            .expect("project");

        let acme_projects = fixture
            .db
            .list_projects(Some(acme.id))
            .await
            .expect("list");
        assert_eq!(acme_projects.len(), 1);
        assert_eq!(acme_projects[0].name, "Website");
        assert_eq!(acme_projects[0].starts_on, NaiveDate::from_ymd_opt(2026, 2, 1));
        assert_eq!(fixture.db.list_projects(None).await.expect("all").len(), 2);
    }

    #[tokio::test]
    async fn project_requires_existing_client() {
        let fixture = test_db().await;
        let err = fixture
            .db
            .create_project(&project_params(Uuid::new_v4(), "Orphan"))
            .await
            .expect_err("foreign key enforced");
        assert!(matches!(err, DatabaseError::Constraint(_)), "{err}");
    }

    #[tokio::test]
    async fn task_updates_merge_and_archive_is_guarded() {
        let fixture = test_db().await;
        let client = seed_client(&fixture.db, "Acme").await;
        let project = fixture
            .db
            .create_project(&project_params(client.id, "Website"))
            .await
            .expect("project");
        let task = fixture
            .db
            .create_task(&task_params(Some(project.id), "Wireframes"))
            .await
            .expect("task");

        let updated = fixture
            .db
            .update_task(
                task.id,
                &UpdateTaskParams {
                    status: Some(TaskStatus::InProgress),
                    due_on: Some(NaiveDate::from_ymd_opt(2026, 3, 1)),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("task exists");
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(updated.title, "Wireframes");
        assert_eq!(updated.due_on, NaiveDate::from_ymd_opt(2026, 3, 1));

        assert!(fixture.db.archive_task(task.id).await.expect("archive"));
        assert!(!fixture.db.archive_task(task.id).await.expect("again"));
        assert!(
            fixture
                .db
                .list_tasks(Some(project.id))
                .await
                .expect("list")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn export_includes_archived_rows() {
        let fixture = test_db().await;
        let client = seed_client(&fixture.db, "Acme").await;
        seed_client(&fixture.db, "Initech").await;
        fixture.db.archive_client(client.id).await.expect("archive");

        let exported = fixture.db.export_clients().await.expect("export");
        assert_eq!(exported.len(), 2);
        let archived = exported
            .iter()
            .find(|c| c.id == client.id)
            .expect("archived client exported");
        assert!(archived.deleted_at.is_some());
        assert_eq!(fixture.db.list_clients().await.expect("live").len(), 1);
    }
}
