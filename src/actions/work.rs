//! Project and task actions. Both domains go through the flag-routed
//! repositories.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};

use super::validate::{Check, owned, present};
use super::{ActionError, IdInput, to_data};
use crate::app::AppContext;
use crate::cache::paths;
use crate::data::{NewProject, NewTask, ProjectRepository, TaskChanges, TaskRepository};
use crate::db::{ProjectStatus, TaskPriority, TaskStatus};

/// `None` when absent, `Some(Err(()))` when malformed.
fn parse_date(raw: &Option<String>) -> Option<Result<NaiveDate, ()>> {
    present(raw).map(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|_| ()))
}

fn date_ok(parsed: &Option<Result<NaiveDate, ()>>) -> bool {
    !matches!(parsed, Some(Err(())))
}

fn date_value(parsed: Option<Result<NaiveDate, ()>>) -> Option<NaiveDate> {
    parsed.and_then(Result::ok)
}

/// Parse an optional enum, falling back to `default` when absent.
fn enum_or<T>(raw: &Option<String>, default: T, parse: fn(&str) -> Option<T>) -> Option<T> {
    match present(raw) {
        Some(value) => parse(value),
        None => Some(default),
    }
}

// ==================== Projects ====================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CreateProjectInput {
    pub client_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub starts_on: Option<String>,
    pub ends_on: Option<String>,
}

pub(crate) async fn create_project(
    ctx: &AppContext,
    input: CreateProjectInput,
) -> Result<Value, ActionError> {
    let name = input.name.trim();
    let status = enum_or(
        &input.status,
        ProjectStatus::Planning,
        ProjectStatus::from_db_value,
    );
    let starts_on = parse_date(&input.starts_on);
    let ends_on = parse_date(&input.ends_on);
    Check::new()
        .rule(!input.client_id.trim().is_empty(), "Client is required.")
        .rule(!name.is_empty(), "Project name is required.")
        .rule(status.is_some(), "Status is invalid.")
        .rule(date_ok(&starts_on), "Start date must be YYYY-MM-DD.")
        .rule(date_ok(&ends_on), "End date must be YYYY-MM-DD.")
        .then(|check| {
            let ordered = match (&starts_on, &ends_on) {
                (Some(Ok(start)), Some(Ok(end))) => end >= start,
                _ => true,
            };
            check.rule(ordered, "End date cannot be before the start date.")
        })
        .finish()?;

    let project = ctx
        .data
        .projects
        .create_project(&NewProject {
            client_id: input.client_id.trim().to_string(),
            name: name.to_string(),
            description: owned(&input.description),
            status: status.unwrap_or(ProjectStatus::Planning),
            starts_on: date_value(starts_on),
            ends_on: date_value(ends_on),
        })
        .await?;
    ctx.cache.revalidate_path(paths::PROJECTS);
    ctx.cache.revalidate_path(paths::CLIENTS);
    to_data(&project)
}

pub(crate) async fn archive_project(
    ctx: &AppContext,
    input: IdInput,
) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Project id is required.")
        .finish()?;
    let id = input.id.trim();
    if !ctx.data.projects.archive_project(id).await? {
        return Err(ActionError::not_found("Project"));
    }
    ctx.cache.revalidate_path(paths::PROJECTS);
    ctx.cache.revalidate_path(paths::TASKS);
    Ok(json!({ "id": id }))
}

// ==================== Tasks ====================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CreateTaskInput {
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee_id: Option<String>,
    pub due_on: Option<String>,
}

pub(crate) async fn create_task(
    ctx: &AppContext,
    input: CreateTaskInput,
) -> Result<Value, ActionError> {
    let title = input.title.trim();
    let status = enum_or(&input.status, TaskStatus::Todo, TaskStatus::from_db_value);
    let priority = enum_or(
        &input.priority,
        TaskPriority::Medium,
        TaskPriority::from_db_value,
    );
    let due_on = parse_date(&input.due_on);
    Check::new()
        .rule(!title.is_empty(), "Task title is required.")
        .rule(title.chars().count() <= 200, "Task title is too long.")
        .rule(status.is_some(), "Status is invalid.")
        .rule(priority.is_some(), "Priority is invalid.")
        .rule(date_ok(&due_on), "Due date must be YYYY-MM-DD.")
        .finish()?;

    let task = ctx
        .data
        .tasks
        .create_task(&NewTask {
            project_id: owned(&input.project_id),
            title: title.to_string(),
            description: owned(&input.description),
            status: status.unwrap_or(TaskStatus::Todo),
            priority: priority.unwrap_or(TaskPriority::Medium),
            assignee_id: owned(&input.assignee_id),
            due_on: date_value(due_on),
        })
        .await?;
    ctx.cache.revalidate_path(paths::TASKS);
    to_data(&task)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UpdateTaskStatusInput {
    pub id: String,
    pub status: String,
}

pub(crate) async fn update_task_status(
    ctx: &AppContext,
    input: UpdateTaskStatusInput,
) -> Result<Value, ActionError> {
    let status = TaskStatus::from_db_value(input.status.trim());
    Check::new()
        .rule(!input.id.trim().is_empty(), "Task id is required.")
        .rule(status.is_some(), "Status is invalid.")
        .finish()?;

    let changes = TaskChanges {
        status,
        ..TaskChanges::default()
    };
    let task = ctx
        .data
        .tasks
        .update_task(input.id.trim(), &changes)
        .await?
        .ok_or_else(|| ActionError::not_found("Task"))?;
    ctx.cache.revalidate_path(paths::TASKS);
    to_data(&task)
}

pub(crate) async fn archive_task(ctx: &AppContext, input: IdInput) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Task id is required.")
        .finish()?;
    let id = input.id.trim();
    if !ctx.data.tasks.archive_task(id).await? {
        return Err(ActionError::not_found("Task"));
    }
    ctx.cache.revalidate_path(paths::TASKS);
    Ok(json!({ "id": id }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::super::test_support::{Harness, harness, harness_with_flags};
    use super::super::{ActionResult, run_action};
    use crate::config::{Domain, FeatureFlags};

    async fn client_id(h: &Harness) -> String {
        let (_, created) = run_action(
            &h.ctx,
            "create_client",
            Some(&h.member_token),
            json!({"name": "Northwind"}),
        )
        .await;
        created.data.expect("data")["id"]
            .as_str()
            .expect("id")
            .to_string()
    }

    #[tokio::test]
    async fn project_dates_are_checked_in_order() {
        let h = harness().await;
        let client = client_id(&h).await;
        let (_, bad_date) = run_action(
            &h.ctx,
            "create_project",
            Some(&h.member_token),
            json!({"client_id": client, "name": "Site", "starts_on": "03/01/2025"}),
        )
        .await;
        assert_eq!(
            bad_date,
            ActionResult::failure("Start date must be YYYY-MM-DD.")
        );

        let (_, reversed) = run_action(
            &h.ctx,
            "create_project",
            Some(&h.member_token),
            json!({
                "client_id": client,
                "name": "Site",
                "starts_on": "2025-03-10",
                "ends_on": "2025-03-01",
            }),
        )
        .await;
        assert_eq!(
            reversed,
            ActionResult::failure("End date cannot be before the start date.")
        );
    }

    #[tokio::test]
    async fn project_for_unknown_client_is_not_found() {
        let h = harness().await;
        let (_, result) = run_action(
            &h.ctx,
            "create_project",
            Some(&h.member_token),
            json!({"client_id": "missing", "name": "Site"}),
        )
        .await;
        assert_eq!(result, ActionResult::failure("Client not found."));
    }

    #[tokio::test]
    async fn task_lifecycle_on_the_document_backend() {
        let flags =
            FeatureFlags::new([Domain::Clients, Domain::Projects, Domain::Tasks]).expect("flags");
        let h = harness_with_flags(flags).await;
        let client = client_id(&h).await;
        let (_, project) = run_action(
            &h.ctx,
            "create_project",
            Some(&h.member_token),
            json!({"client_id": client, "name": "Site"}),
        )
        .await;
        let project_id = project.data.expect("data")["id"].clone();

        let (_, task) = run_action(
            &h.ctx,
            "create_task",
            Some(&h.member_token),
            json!({"project_id": project_id, "title": "Wireframes", "priority": "high"}),
        )
        .await;
        let task = task.data.expect("data");
        assert_eq!(task["status"], "todo");
        assert_eq!(task["priority"], "high");

        let (_, moved) = run_action(
            &h.ctx,
            "update_task_status",
            Some(&h.member_token),
            json!({"id": task["id"], "status": "in_progress"}),
        )
        .await;
        assert_eq!(moved.data.expect("data")["status"], "in_progress");

        let (_, archived) = run_action(
            &h.ctx,
            "archive_task",
            Some(&h.member_token),
            json!({"id": task["id"]}),
        )
        .await;
        assert!(archived.success);
        let (_, again) = run_action(
            &h.ctx,
            "update_task_status",
            Some(&h.member_token),
            json!({"id": task["id"], "status": "done"}),
        )
        .await;
        assert_eq!(again, ActionResult::failure("Task not found."));
    }

    #[tokio::test]
    async fn invalid_task_status_is_rejected_before_lookup() {
        let h = harness().await;
        let (_, result) = run_action(
            &h.ctx,
            "update_task_status",
            Some(&h.member_token),
            json!({"id": "whatever", "status": "finished"}),
        )
        .await;
        assert_eq!(result, ActionResult::failure("Status is invalid."));
    }
}
