//! Request and response DTOs for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::FlagStatus;
use crate::data::{AppUser, Backend};
use crate::db::{EmailMessageRecord, EmailThreadRecord, InvoiceRecord, ProposalRecord};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

// --- Sessions ---

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AppUser,
}

// --- Flags ---

#[derive(Debug, Serialize)]
pub struct DomainBackends {
    pub clients: Backend,
    pub projects: Backend,
    pub tasks: Backend,
    pub auth: Backend,
}

#[derive(Debug, Serialize)]
pub struct FlagsResponse {
    #[serde(flatten)]
    pub status: FlagStatus,
    pub backends: DomainBackends,
}

// --- Query strings ---

#[derive(Debug, Default, Deserialize)]
pub struct LeadsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectsQuery {
    pub client_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TasksQuery {
    pub project_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeadFilterQuery {
    pub lead_id: Option<String>,
}

// --- Templates ---

#[derive(Debug, Deserialize)]
pub struct RenderTemplateRequest {
    pub lead_id: String,
    /// Name used for `{{ sender }}`; defaults to the signed-in user's name.
    pub sender: Option<String>,
    /// Extra values exposed as `{{ extra.* }}`.
    pub extra: Option<Value>,
}

// --- Meetings ---

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    pub lead_id: Option<String>,
    pub client_id: Option<String>,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

// --- Suggestions ---

#[derive(Debug, Deserialize)]
pub struct GenerateSuggestionsRequest {
    pub lead_id: String,
}

// --- Threads ---

#[derive(Debug, Deserialize)]
pub struct CreateThreadRequest {
    pub lead_id: Option<String>,
    pub contact_id: Option<String>,
    pub subject: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    /// "inbound" or "outbound".
    pub direction: String,
    pub sender: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct ThreadDetail {
    pub thread: EmailThreadRecord,
    pub messages: Vec<EmailMessageRecord>,
}

// --- Share links ---

#[derive(Debug, Serialize)]
pub struct SharedProposal {
    #[serde(flatten)]
    pub proposal: ProposalRecord,
    pub password_protected: bool,
}

#[derive(Debug, Serialize)]
pub struct SharedInvoice {
    #[serde(flatten)]
    pub invoice: InvoiceRecord,
}
