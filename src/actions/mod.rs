//! Server actions: authenticated, validated mutations.
//!
//! Every action follows the same sequence: authenticate the session,
//! check the role, validate the input (the first failing rule is reported),
//! run a guarded mutation, revalidate the affected cached views, and respond
//! with `{success, error?, data?}`. Unexpected failures are logged and
//! replaced by a generic message.

mod billing;
mod crm;
mod validate;
mod work;

use axum::http::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::app::AppContext;
use crate::auth::resolve_session;
use crate::data::AppUser;
use crate::error::DatabaseError;

const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// Uniform action response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActionResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("You must be signed in.")]
    Unauthorized,

    #[error("You do not have permission to do that.")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unknown action '{0}'.")]
    UnknownAction(String),

    /// Logged, never shown.
    #[error("{0}")]
    Internal(String),
}

impl ActionError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::UnknownAction(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::NotFound(_) | Self::Internal(_) => StatusCode::OK,
        }
    }

    /// Message safe to return to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => GENERIC_FAILURE.to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found."))
    }
}

impl From<DatabaseError> for ActionError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, .. } => Self::not_found(&capitalize(&entity)),
            DatabaseError::Constraint(detail) => {
                tracing::debug!(%detail, "Action hit a constraint");
                Self::Validation("That conflicts with an existing record.".to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Names accepted by [`run_action`] and [`execute`].
pub const ACTION_NAMES: &[&str] = &[
    "create_lead",
    "update_lead_status",
    "archive_lead",
    "rescore_lead",
    "create_template",
    "update_template",
    "delete_template",
    "create_client",
    "archive_client",
    "create_project",
    "archive_project",
    "create_task",
    "update_task_status",
    "archive_task",
    "create_proposal",
    "send_proposal",
    "archive_proposal",
    "create_invoice",
    "mark_invoice_paid",
    "archive_invoice",
    "update_billing_settings",
];

const ADMIN_ONLY: &[&str] = &[
    "archive_lead",
    "delete_template",
    "archive_client",
    "archive_project",
    "archive_proposal",
    "archive_invoice",
    "update_billing_settings",
];

pub fn is_admin_only(name: &str) -> bool {
    ADMIN_ONLY.contains(&name)
}

/// Run an action by name and convert the outcome into a status and body.
pub async fn run_action(
    ctx: &AppContext,
    name: &str,
    token: Option<&str>,
    input: Value,
) -> (StatusCode, ActionResult) {
    match execute(ctx, name, token, input).await {
        Ok(data) => (StatusCode::OK, ActionResult::ok(data)),
        Err(e) => {
            if let ActionError::Internal(detail) = &e {
                error!(action = name, error = %detail, "Action failed");
            }
            (e.status(), ActionResult::failure(e.public_message()))
        }
    }
}

/// Authenticate, authorize and run an action, returning its data.
pub async fn execute(
    ctx: &AppContext,
    name: &str,
    token: Option<&str>,
    input: Value,
) -> Result<Value, ActionError> {
    if !ACTION_NAMES.contains(&name) {
        return Err(ActionError::UnknownAction(name.to_string()));
    }
    let user = authenticate(ctx, token).await?;
    if is_admin_only(name) && !user.is_admin() {
        return Err(ActionError::Forbidden);
    }

    match name {
        "create_lead" => crm::create_lead(ctx, parse_input(input)?).await,
        "update_lead_status" => crm::update_lead_status(ctx, parse_input(input)?).await,
        "archive_lead" => crm::archive_lead(ctx, parse_input(input)?).await,
        "rescore_lead" => crm::rescore_lead(ctx, parse_input(input)?).await,
        "create_template" => crm::create_template(ctx, parse_input(input)?).await,
        "update_template" => crm::update_template(ctx, parse_input(input)?).await,
        "delete_template" => crm::delete_template(ctx, parse_input(input)?).await,
        "create_client" => crm::create_client(ctx, parse_input(input)?).await,
        "archive_client" => crm::archive_client(ctx, parse_input(input)?).await,
        "create_project" => work::create_project(ctx, parse_input(input)?).await,
        "archive_project" => work::archive_project(ctx, parse_input(input)?).await,
        "create_task" => work::create_task(ctx, parse_input(input)?).await,
        "update_task_status" => work::update_task_status(ctx, parse_input(input)?).await,
        "archive_task" => work::archive_task(ctx, parse_input(input)?).await,
        "create_proposal" => billing::create_proposal(ctx, parse_input(input)?).await,
        "send_proposal" => billing::send_proposal(ctx, parse_input(input)?).await,
        "archive_proposal" => billing::archive_proposal(ctx, parse_input(input)?).await,
        "create_invoice" => billing::create_invoice(ctx, parse_input(input)?).await,
        "mark_invoice_paid" => billing::mark_invoice_paid(ctx, parse_input(input)?).await,
        "archive_invoice" => billing::archive_invoice(ctx, parse_input(input)?).await,
        "update_billing_settings" => {
            billing::update_billing_settings(ctx, parse_input(input)?).await
        }
        other => Err(ActionError::UnknownAction(other.to_string())),
    }
}

async fn authenticate(ctx: &AppContext, token: Option<&str>) -> Result<AppUser, ActionError> {
    let token = token.ok_or(ActionError::Unauthorized)?;
    resolve_session(ctx.data.users.as_ref(), &ctx.sessions, token)
        .await?
        .ok_or(ActionError::Unauthorized)
}

/// A missing body counts as an empty object.
fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T, ActionError> {
    let input = if input.is_null() {
        Value::Object(Default::default())
    } else {
        input
    };
    serde_json::from_value(input).map_err(|e| {
        tracing::debug!(error = %e, "Rejected action input");
        ActionError::Validation("Invalid input.".to_string())
    })
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, ActionError> {
    serde_json::to_value(value).map_err(|e| ActionError::Internal(e.to_string()))
}

/// Input of the single-id actions.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub(crate) struct IdInput {
    pub id: String,
}


#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::test_support::harness;
    use super::*;

    #[tokio::test]
    async fn unauthenticated_calls_are_rejected() {
        let h = harness().await;
        let (status, result) = run_action(&h.ctx, "create_lead", None, json!({"name": "A"})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!result.success);

        let (status, _) =
            run_action(&h.ctx, "create_lead", Some("forged.token"), json!({"name": "A"})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_only_actions_reject_members() {
        let h = harness().await;
        let (status, result) = run_action(
            &h.ctx,
            "archive_lead",
            Some(&h.member_token),
            json!({"id": uuid::Uuid::new_v4().to_string()}),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            result.error.as_deref(),
            Some("You do not have permission to do that.")
        );
    }

    #[tokio::test]
    async fn unknown_actions_are_not_found() {
        let h = harness().await;
        let (status, result) =
            run_action(&h.ctx, "drop_tables", Some(&h.admin_token), json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(result.error.as_deref(), Some("Unknown action 'drop_tables'."));
    }

    #[tokio::test]
    async fn wrongly_typed_input_is_a_validation_failure() {
        let h = harness().await;
        let (status, result) =
            run_action(&h.ctx, "create_lead", Some(&h.member_token), json!({"name": 42})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            result,
            ActionResult::failure("Invalid input.")
        );
    }

    #[test]
    fn every_admin_action_is_a_known_action() {
        for name in ADMIN_ONLY {
            assert!(ACTION_NAMES.contains(name), "{name}");
        }
        assert_eq!(ACTION_NAMES.len(), 21);
    }

    #[test]
    fn database_errors_map_to_safe_messages() {
        let e: ActionError = DatabaseError::NotFound {
            entity: "client".to_string(),
            id: "x".to_string(),
        }
        .into();
        assert_eq!(e.public_message(), "Client not found.");
        let e: ActionError = DatabaseError::Query("syntax error near SELECT".to_string()).into();
        assert_eq!(e.public_message(), GENERIC_FAILURE);
    }
}
