//! Lead, email template and client actions.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use super::validate::{
    Check, existing_id, optional_email_ok, optional_phone, optional_phone_ok, owned, present,
};
use super::{ActionError, IdInput, to_data};
use crate::app::AppContext;
use crate::cache::paths;
use crate::data::ClientRepository;
use crate::db::{
    ClientStatus, CreateClientParams, CreateEmailTemplateParams, CreateLeadParams,
    EmailTemplateStore, LeadStatus, LeadStore, UpdateEmailTemplateParams,
};

const LEAD_NOT_FOUND: &str = "Lead not found.";
const TEMPLATE_NOT_FOUND: &str = "Template not found.";
const MAX_NAME_LEN: usize = 200;

fn lead_not_found() -> ActionError {
    ActionError::NotFound(LEAD_NOT_FOUND.to_string())
}

fn template_not_found() -> ActionError {
    ActionError::NotFound(TEMPLATE_NOT_FOUND.to_string())
}

fn template_parses(source: &str) -> bool {
    tera::Tera::default().add_raw_template("check", source).is_ok()
}

// ==================== Leads ====================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CreateLeadInput {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
}

pub(crate) async fn create_lead(
    ctx: &AppContext,
    input: CreateLeadInput,
) -> Result<Value, ActionError> {
    let name = input.name.trim();
    Check::new()
        .rule(!name.is_empty(), "Name is required.")
        .rule(name.chars().count() <= MAX_NAME_LEN, "Name is too long.")
        .rule(optional_email_ok(&input.email), "Email is invalid.")
        .rule(
            optional_phone_ok(&input.phone),
            "Phone must be a 10-digit US number.",
        )
        .finish()?;

    let lead = ctx
        .db
        .create_lead(&CreateLeadParams {
            name: name.to_string(),
            email: owned(&input.email),
            phone: optional_phone(&input.phone),
            company: owned(&input.company),
            source: owned(&input.source),
            notes: owned(&input.notes),
        })
        .await?;
    ctx.cache.revalidate_path(paths::LEADS);
    to_data(&lead)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UpdateLeadStatusInput {
    pub id: String,
    pub status: String,
}

pub(crate) async fn update_lead_status(
    ctx: &AppContext,
    input: UpdateLeadStatusInput,
) -> Result<Value, ActionError> {
    let status = LeadStatus::from_db_value(input.status.trim());
    Check::new()
        .rule(!input.id.trim().is_empty(), "Lead id is required.")
        .rule(status.is_some(), "Status is invalid.")
        .finish()?;
    let id = existing_id(&input.id, "Lead").map_err(|_| lead_not_found())?;
    let status = status.ok_or_else(|| ActionError::Validation("Status is invalid.".to_string()))?;

    let lead = ctx
        .db
        .update_lead_status(id, status)
        .await?
        .ok_or_else(lead_not_found)?;
    ctx.cache.revalidate_path(paths::LEADS);
    to_data(&lead)
}

pub(crate) async fn archive_lead(ctx: &AppContext, input: IdInput) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Lead id is required.")
        .finish()?;
    let id = existing_id(&input.id, "Lead").map_err(|_| lead_not_found())?;
    if !ctx.db.archive_lead(id).await? {
        return Err(lead_not_found());
    }
    ctx.cache.revalidate_path(paths::LEADS);
    Ok(json!({ "id": id }))
}

/// Score a lead with the AI gateway and store the result.
pub(crate) async fn rescore_lead(ctx: &AppContext, input: IdInput) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Lead id is required.")
        .finish()?;
    let id = existing_id(&input.id, "Lead").map_err(|_| lead_not_found())?;
    let lead = ctx.db.get_lead(id).await?.ok_or_else(lead_not_found)?;

    let scored = ctx.scorer.score_lead(&lead).await.map_err(|e| {
        error!(lead_id = %id, error = %e, "Lead scoring failed");
        ActionError::Validation("Lead scoring is unavailable right now.".to_string())
    })?;
    let lead = ctx
        .db
        .update_lead_score(id, scored.score, &scored.reasoning)
        .await?
        .ok_or_else(lead_not_found)?;
    ctx.cache.revalidate_path(paths::LEADS);
    to_data(&lead)
}

// ==================== Email templates ====================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CreateTemplateInput {
    pub name: String,
    pub subject: String,
    pub body: String,
    pub category: Option<String>,
}

pub(crate) async fn create_template(
    ctx: &AppContext,
    input: CreateTemplateInput,
) -> Result<Value, ActionError> {
    let name = input.name.trim();
    Check::new()
        .rule(!name.is_empty(), "Template name is required.")
        .rule(!input.subject.trim().is_empty(), "Subject is required.")
        .rule(!input.body.trim().is_empty(), "Body is required.")
        .rule(template_parses(&input.subject), "Subject is not a valid template.")
        .rule(template_parses(&input.body), "Body is not a valid template.")
        .finish()?;

    let template = ctx
        .db
        .create_template(&CreateEmailTemplateParams {
            name: name.to_string(),
            subject: input.subject.trim().to_string(),
            body: input.body,
            category: owned(&input.category),
        })
        .await?;
    ctx.cache.revalidate_path(paths::TEMPLATES);
    to_data(&template)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UpdateTemplateInput {
    pub id: String,
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// `Some(None)` clears the category.
    #[serde(deserialize_with = "double_option")]
    pub category: Option<Option<String>>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

pub(crate) async fn update_template(
    ctx: &AppContext,
    input: UpdateTemplateInput,
) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Template id is required.")
        .rule(
            input.name.as_deref().is_none_or(|n| !n.trim().is_empty()),
            "Template name cannot be empty.",
        )
        .rule(
            input.subject.as_deref().is_none_or(template_parses),
            "Subject is not a valid template.",
        )
        .rule(
            input.body.as_deref().is_none_or(template_parses),
            "Body is not a valid template.",
        )
        .finish()?;
    let id = existing_id(&input.id, "Template").map_err(|_| template_not_found())?;

    let template = ctx
        .db
        .update_template(
            id,
            &UpdateEmailTemplateParams {
                name: input.name.map(|n| n.trim().to_string()),
                subject: input.subject,
                body: input.body,
                category: input
                    .category
                    .map(|c| c.filter(|v| !v.trim().is_empty())),
            },
        )
        .await?
        .ok_or_else(template_not_found)?;
    ctx.cache.revalidate_path(paths::TEMPLATES);
    to_data(&template)
}

pub(crate) async fn delete_template(
    ctx: &AppContext,
    input: IdInput,
) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Template id is required.")
        .finish()?;
    let id = existing_id(&input.id, "Template").map_err(|_| template_not_found())?;
    if !ctx.db.archive_template(id).await? {
        return Err(template_not_found());
    }
    ctx.cache.revalidate_path(paths::TEMPLATES);
    Ok(json!({ "id": id }))
}

// ==================== Clients ====================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CreateClientInput {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

pub(crate) async fn create_client(
    ctx: &AppContext,
    input: CreateClientInput,
) -> Result<Value, ActionError> {
    let name = input.name.trim();
    let status = match present(&input.status) {
        Some(raw) => ClientStatus::from_db_value(raw),
        None => Some(ClientStatus::Active),
    };
    Check::new()
        .rule(!name.is_empty(), "Client name is required.")
        .rule(name.chars().count() <= MAX_NAME_LEN, "Client name is too long.")
        .rule(optional_email_ok(&input.email), "Email is invalid.")
        .rule(
            optional_phone_ok(&input.phone),
            "Phone must be a 10-digit US number.",
        )
        .rule(status.is_some(), "Status is invalid.")
        .finish()?;

    let client = ctx
        .data
        .clients
        .create_client(&CreateClientParams {
            name: name.to_string(),
            email: owned(&input.email),
            phone: optional_phone(&input.phone),
            status: status.unwrap_or(ClientStatus::Active),
            notes: owned(&input.notes),
        })
        .await?;
    ctx.cache.revalidate_path(paths::CLIENTS);
    to_data(&client)
}

pub(crate) async fn archive_client(
    ctx: &AppContext,
    input: IdInput,
) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Client id is required.")
        .finish()?;
    let id = input.id.trim();
    if !ctx.data.clients.archive_client(id).await? {
        return Err(ActionError::not_found("Client"));
    }
    ctx.cache.revalidate_path(paths::CLIENTS);
    ctx.cache.revalidate_path(paths::PROJECTS);
    Ok(json!({ "id": id }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::super::ActionResult;
    use super::super::run_action;
    use super::super::test_support::{harness, harness_with_flags};
    use crate::config::{Domain, FeatureFlags};
    use crate::data::ClientRepository;
    use crate::db::LeadStore;
    use crate::testing::raw_deleted_at;

    #[tokio::test]
    async fn create_lead_reports_first_failing_rule() {
        let h = harness().await;
        let (_, result) = run_action(
            &h.ctx,
            "create_lead",
            Some(&h.member_token),
            json!({"name": "  ", "email": "broken"}),
        )
        .await;
        assert_eq!(result, ActionResult::failure("Name is required."));

        let (_, result) = run_action(
            &h.ctx,
            "create_lead",
            Some(&h.member_token),
            json!({"name": "Dana", "email": "broken", "phone": "123"}),
        )
        .await;
        assert_eq!(result, ActionResult::failure("Email is invalid."));
    }

    #[tokio::test]
    async fn create_lead_stores_bare_phone_digits() {
        let h = harness().await;
        let (status, result) = run_action(
            &h.ctx,
            "create_lead",
            Some(&h.member_token),
            json!({"name": "Dana", "phone": "(555) 123-4567", "company": "Northwind"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(result.success, "{result:?}");
        let data = result.data.expect("data");
        assert_eq!(data["phone"], "5551234567");
        assert_eq!(data["status"], "new");
    }

    #[tokio::test]
    async fn archiving_a_lead_twice_reports_not_found() {
        let h = harness().await;
        let (_, created) = run_action(
            &h.ctx,
            "create_lead",
            Some(&h.member_token),
            json!({"name": "Dana"}),
        )
        .await;
        let id = created.data.expect("data")["id"].clone();

        let (_, first) =
            run_action(&h.ctx, "archive_lead", Some(&h.admin_token), json!({ "id": id })).await;
        assert!(first.success, "{first:?}");
        let lead_id = uuid::Uuid::parse_str(id.as_str().expect("id")).expect("uuid");
        assert!(h.ctx.db.get_lead(lead_id).await.expect("get").is_none());
        assert!(
            raw_deleted_at(&h.relational.db, "leads", lead_id)
                .await
                .is_some(),
            "archiving keeps the row and stamps deleted_at"
        );

        let (status, second) =
            run_action(&h.ctx, "archive_lead", Some(&h.admin_token), json!({ "id": id })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second, ActionResult::failure("Lead not found."));
    }

    #[tokio::test]
    async fn rescore_uses_the_scorer_and_unknown_leads_fail() {
        let h = harness().await;
        let (_, created) = run_action(
            &h.ctx,
            "create_lead",
            Some(&h.member_token),
            json!({"name": "Dana"}),
        )
        .await;
        let id = created.data.expect("data")["id"].clone();

        let (_, scored) =
            run_action(&h.ctx, "rescore_lead", Some(&h.member_token), json!({ "id": id })).await;
        let data = scored.data.expect("data");
        assert_eq!(data["score"], 64);
        assert_eq!(data["score_reasoning"], "Budget confirmed");

        let (_, missing) = run_action(
            &h.ctx,
            "rescore_lead",
            Some(&h.member_token),
            json!({"id": "not-a-uuid"}),
        )
        .await;
        assert_eq!(missing, ActionResult::failure("Lead not found."));
    }

    #[tokio::test]
    async fn deleting_an_unknown_template_is_not_found() {
        let h = harness().await;
        for id in [uuid::Uuid::new_v4().to_string(), "bogus".to_string()] {
            let (status, result) = run_action(
                &h.ctx,
                "delete_template",
                Some(&h.admin_token),
                json!({ "id": id }),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(result, ActionResult::failure("Template not found."));
        }
    }

    #[tokio::test]
    async fn templates_are_syntax_checked_and_deleted_once() {
        let h = harness().await;
        let (_, bad) = run_action(
            &h.ctx,
            "create_template",
            Some(&h.member_token),
            json!({"name": "Intro", "subject": "Hi", "body": "{% if %}"}),
        )
        .await;
        assert_eq!(bad, ActionResult::failure("Body is not a valid template."));

        let (_, created) = run_action(
            &h.ctx,
            "create_template",
            Some(&h.member_token),
            json!({"name": "Intro", "subject": "Hi {{ lead.name }}", "body": "Hello"}),
        )
        .await;
        let id = created.data.expect("data")["id"].clone();

        let (_, updated) = run_action(
            &h.ctx,
            "update_template",
            Some(&h.member_token),
            json!({"id": id, "category": "outreach"}),
        )
        .await;
        assert_eq!(updated.data.expect("data")["category"], "outreach");

        let (_, deleted) =
            run_action(&h.ctx, "delete_template", Some(&h.admin_token), json!({ "id": id }))
                .await;
        assert!(deleted.success);
        let (_, again) =
            run_action(&h.ctx, "delete_template", Some(&h.admin_token), json!({ "id": id }))
                .await;
        assert_eq!(again, ActionResult::failure("Template not found."));
    }

    #[tokio::test]
    async fn create_client_follows_the_clients_flag() {
        let h = harness_with_flags(FeatureFlags::new([Domain::Clients]).expect("flags")).await;
        let (_, created) = run_action(
            &h.ctx,
            "create_client",
            Some(&h.member_token),
            json!({"name": "Northwind"}),
        )
        .await;
        let data = created.data.expect("data");
        let id = data["id"].as_str().expect("id").to_string();
        assert!(!id.contains('-'), "document ids are not hyphenated UUIDs: {id}");
        assert!(h.ctx.data.clients.get_client(&id).await.expect("get").is_some());

        let (_, archived) =
            run_action(&h.ctx, "archive_client", Some(&h.admin_token), json!({ "id": id }))
                .await;
        assert!(archived.success);
        let (_, again) =
            run_action(&h.ctx, "archive_client", Some(&h.admin_token), json!({ "id": id }))
                .await;
        assert_eq!(again, ActionResult::failure("Client not found."));
    }
}
