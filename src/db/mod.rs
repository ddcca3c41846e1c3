//! Relational persistence layer.
//!
//! Provides a backend-agnostic `Database` trait composed of one sub-trait per
//! entity. Two implementations exist:
//!
//! - `postgres` (default feature): `deadpool-postgres` + `tokio-postgres`,
//!   schema managed by `refinery` migrations under `migrations/`.
//! - `libsql`: embedded libSQL file (or a Turso replica) for local
//!   deployments and tests.
//!
//! Reads never return soft-deleted rows unless the method says otherwise, and
//! every list has a deterministic order with the id as the final tiebreak.

#[cfg(feature = "postgres")]
pub mod postgres;

pub mod libsql;
mod libsql_migrations;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Create a relational backend from configuration, run migrations, and
/// return it.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    match config.backend {
        crate::config::DatabaseBackend::LibSql => {
            use secrecy::ExposeSecret as _;

            let default_path = crate::config::default_libsql_path();
            let db_path = config.libsql_path.as_deref().unwrap_or(&default_path);

            let backend = if let Some(ref url) = config.libsql_url {
                let token = config.libsql_auth_token.as_ref().ok_or_else(|| {
                    DatabaseError::Pool(
                        "LIBSQL_AUTH_TOKEN required when LIBSQL_URL is set".to_string(),
                    )
                })?;
                libsql::LibSqlBackend::new_remote_replica(db_path, url, token.expose_secret())
                    .await?
            } else {
                libsql::LibSqlBackend::new_local(db_path).await?
            };
            backend.run_migrations().await?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "postgres")]
        crate::config::DatabaseBackend::Postgres => {
            let pg = postgres::PgBackend::new(config).await?;
            pg.run_migrations().await?;
            Ok(Arc::new(pg))
        }
        #[cfg(not(feature = "postgres"))]
        crate::config::DatabaseBackend::Postgres => Err(DatabaseError::Pool(
            "PostgreSQL support is not compiled in; rebuild with the 'postgres' feature"
                .to_string(),
        )),
    }
}

/// Records that are soft-deleted through a nullable deletion timestamp.
pub trait SoftDelete {
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}

macro_rules! soft_delete {
    ($($record:ty),+ $(,)?) => {
        $(impl SoftDelete for $record {
            fn deleted_at(&self) -> Option<DateTime<Utc>> {
                self.deleted_at
            }
        })+
    };
}

/// Text-backed enum columns.
pub trait DbEnum: Sized + Copy {
    const COLUMN: &'static str;

    fn as_str(self) -> &'static str;
    fn from_db_value(value: &str) -> Option<Self>;
}

macro_rules! db_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($column:literal) { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn from_db_value(value: &str) -> Option<Self> {
                match value {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl DbEnum for $name {
            const COLUMN: &'static str = $column;

            fn as_str(self) -> &'static str {
                $name::as_str(self)
            }

            fn from_db_value(value: &str) -> Option<Self> {
                $name::from_db_value(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Parse a text column into a `DbEnum`, naming the column on failure.
pub(crate) fn parse_db_enum<T: DbEnum>(raw: &str) -> Result<T, DatabaseError> {
    T::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid {} '{}'", T::COLUMN, raw)))
}

db_enum! {
    /// Application role. Admin-only actions check for `Admin`.
    UserRole("role") { Admin => "admin", Member => "member" }
}

db_enum! {
    /// Sales pipeline stage of a lead.
    LeadStatus("lead status") {
        New => "new",
        Contacted => "contacted",
        Qualified => "qualified",
        Proposal => "proposal",
        Won => "won",
        Lost => "lost",
    }
}

db_enum! {
    ClientStatus("client status") { Active => "active", Inactive => "inactive" }
}

db_enum! {
    ProjectStatus("project status") {
        Planning => "planning",
        Active => "active",
        OnHold => "on_hold",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

db_enum! {
    TaskStatus("task status") {
        Todo => "todo",
        InProgress => "in_progress",
        Review => "review",
        Done => "done",
        Blocked => "blocked",
    }
}

db_enum! {
    TaskPriority("task priority") {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

db_enum! {
    ProposalStatus("proposal status") {
        Draft => "draft",
        Sent => "sent",
        Viewed => "viewed",
        Accepted => "accepted",
        Rejected => "rejected",
    }
}

db_enum! {
    InvoiceStatus("invoice status") {
        Draft => "draft",
        Sent => "sent",
        Paid => "paid",
        Void => "void",
    }
}

db_enum! {
    SuggestionKind("suggestion kind") {
        FollowUp => "follow_up",
        Call => "call",
        Email => "email",
        Proposal => "proposal",
    }
}

db_enum! {
    SuggestionStatus("suggestion status") {
        Pending => "pending",
        Accepted => "accepted",
        Dismissed => "dismissed",
    }
}

db_enum! {
    MessageDirection("message direction") { Inbound => "inbound", Outbound => "outbound" }
}

db_enum! {
    MeetingStatus("meeting status") {
        Scheduled => "scheduled",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

// ==================== Users ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub password_hash: String,
}

// ==================== Leads & contacts ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub status: LeadStatus,
    pub score: Option<i32>,
    pub score_reasoning: Option<String>,
    pub scored_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateLeadParams {
    pub name: String,
    pub email: Option<String>,
    /// Digits only.
    pub phone: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateContactParams {
    pub client_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
}

// ==================== Clients & hour blocks ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: ClientStatus,
    pub notes: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateClientParams {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: ClientStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateClientParams {
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub status: Option<ClientStatus>,
    pub notes: Option<Option<String>>,
}

/// Prepaid block of support hours purchased by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourBlockRecord {
    pub id: Uuid,
    pub client_id: Uuid,
    pub hours: Decimal,
    pub description: Option<String>,
    pub purchased_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateHourBlockParams {
    pub client_id: Uuid,
    pub hours: Decimal,
    pub description: Option<String>,
    pub purchased_on: NaiveDate,
}

// ==================== Projects & tasks ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub client_id: Uuid,
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
pub struct CreateProjectParams {
    pub client_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProjectParams {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<ProjectStatus>,
    pub starts_on: Option<Option<NaiveDate>>,
    pub ends_on: Option<Option<NaiveDate>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<Uuid>,
    pub due_on: Option<NaiveDate>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTaskParams {
    pub project_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<Uuid>,
    pub due_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskParams {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<Option<Uuid>>,
    pub due_on: Option<Option<NaiveDate>>,
}

// ==================== Proposals & invoices ====================

/// Priced line on a proposal or invoice. Stored as a JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn amount(&self) -> Decimal {
        (self.quantity * self.unit_price).round_dp(2)
    }
}

pub fn line_items_total(items: &[LineItem]) -> Decimal {
    items.iter().map(LineItem::amount).sum()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: Uuid,
    pub lead_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub status: ProposalStatus,
    pub line_items: Vec<LineItem>,
    pub total: Decimal,
    pub share_token: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProposalRecord {
    pub fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct CreateProposalParams {
    pub lead_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub line_items: Vec<LineItem>,
    pub total: Decimal,
    pub share_token: String,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub invoice_number: String,
    pub client_id: Option<Uuid>,
    pub proposal_id: Option<Uuid>,
    pub status: InvoiceStatus,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub issued_on: NaiveDate,
    pub due_on: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub share_token: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateInvoiceParams {
    pub invoice_number: String,
    pub client_id: Option<Uuid>,
    pub proposal_id: Option<Uuid>,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub issued_on: NaiveDate,
    pub due_on: NaiveDate,
    pub share_token: String,
}

/// Singleton billing configuration row (id `default`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingSettingsRecord {
    pub business_name: String,
    pub business_email: Option<String>,
    pub business_address: Option<String>,
    pub invoice_prefix: String,
    pub payment_terms_days: i32,
    pub default_tax_rate: Decimal,
    pub default_hourly_rate: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for BillingSettingsRecord {
    fn default() -> Self {
        Self {
            business_name: String::new(),
            business_email: None,
            business_address: None,
            invoice_prefix: "INV".to_string(),
            payment_terms_days: 30,
            default_tax_rate: Decimal::ZERO,
            default_hourly_rate: Decimal::ZERO,
            updated_at: None,
        }
    }
}

/// Sentinel primary key of the billing settings row.
pub const BILLING_SETTINGS_ID: &str = "default";

#[derive(Debug, Clone)]
pub struct UpsertBillingSettingsParams {
    pub business_name: String,
    pub business_email: Option<String>,
    pub business_address: Option<String>,
    pub invoice_prefix: String,
    pub payment_terms_days: i32,
    pub default_tax_rate: Decimal,
    pub default_hourly_rate: Decimal,
}

// ==================== Templates, suggestions, threads, meetings ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplateRecord {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub category: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateEmailTemplateParams {
    pub name: String,
    pub subject: String,
    pub body: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateEmailTemplateParams {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub category: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionRecord {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub kind: SuggestionKind,
    pub content: String,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailThreadRecord {
    pub id: Uuid,
    pub lead_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub subject: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateThreadParams {
    pub lead_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub subject: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessageRecord {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub direction: MessageDirection,
    pub sender: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMessageParams {
    pub direction: MessageDirection,
    pub sender: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub id: Uuid,
    pub lead_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub status: MeetingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMeetingParams {
    pub lead_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

soft_delete!(
    UserRecord,
    LeadRecord,
    ContactRecord,
    ClientRecord,
    ProjectRecord,
    TaskRecord,
    ProposalRecord,
    InvoiceRecord,
    EmailTemplateRecord,
);

// ==================== Store traits ====================

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, input: &CreateUserParams) -> Result<UserRecord, DatabaseError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, DatabaseError>;
    /// Case-insensitive lookup of a live user.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, DatabaseError>;
    async fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError>;
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn create_lead(&self, input: &CreateLeadParams) -> Result<LeadRecord, DatabaseError>;
    async fn get_lead(&self, id: Uuid) -> Result<Option<LeadRecord>, DatabaseError>;
    async fn list_leads(
        &self,
        status: Option<LeadStatus>,
    ) -> Result<Vec<LeadRecord>, DatabaseError>;
    async fn update_lead_status(
        &self,
        id: Uuid,
        status: LeadStatus,
    ) -> Result<Option<LeadRecord>, DatabaseError>;
    async fn update_lead_score(
        &self,
        id: Uuid,
        score: i32,
        reasoning: &str,
    ) -> Result<Option<LeadRecord>, DatabaseError>;
    /// Soft-delete a live lead. Returns `false` when nothing changed.
    async fn archive_lead(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn create_contact(
        &self,
        input: &CreateContactParams,
    ) -> Result<ContactRecord, DatabaseError>;
    async fn get_contact(&self, id: Uuid) -> Result<Option<ContactRecord>, DatabaseError>;
    async fn list_contacts(
        &self,
        client_id: Option<Uuid>,
        lead_id: Option<Uuid>,
    ) -> Result<Vec<ContactRecord>, DatabaseError>;
    async fn archive_contact(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn create_client(&self, input: &CreateClientParams)
    -> Result<ClientRecord, DatabaseError>;
    async fn get_client(&self, id: Uuid) -> Result<Option<ClientRecord>, DatabaseError>;
    async fn list_clients(&self) -> Result<Vec<ClientRecord>, DatabaseError>;
    async fn update_client(
        &self,
        id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError>;
    async fn archive_client(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait HourBlockStore: Send + Sync {
    async fn add_hour_block(
        &self,
        input: &CreateHourBlockParams,
    ) -> Result<HourBlockRecord, DatabaseError>;
    async fn list_hour_blocks(&self, client_id: Uuid)
    -> Result<Vec<HourBlockRecord>, DatabaseError>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create_project(
        &self,
        input: &CreateProjectParams,
    ) -> Result<ProjectRecord, DatabaseError>;
    async fn get_project(&self, id: Uuid) -> Result<Option<ProjectRecord>, DatabaseError>;
    async fn list_projects(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<ProjectRecord>, DatabaseError>;
    async fn update_project(
        &self,
        id: Uuid,
        input: &UpdateProjectParams,
    ) -> Result<Option<ProjectRecord>, DatabaseError>;
    async fn archive_project(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, input: &CreateTaskParams) -> Result<TaskRecord, DatabaseError>;
    async fn get_task(&self, id: Uuid) -> Result<Option<TaskRecord>, DatabaseError>;
    async fn list_tasks(&self, project_id: Option<Uuid>)
    -> Result<Vec<TaskRecord>, DatabaseError>;
    async fn update_task(
        &self,
        id: Uuid,
        input: &UpdateTaskParams,
    ) -> Result<Option<TaskRecord>, DatabaseError>;
    async fn archive_task(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn create_proposal(
        &self,
        input: &CreateProposalParams,
    ) -> Result<ProposalRecord, DatabaseError>;
    async fn get_proposal(&self, id: Uuid) -> Result<Option<ProposalRecord>, DatabaseError>;
    async fn get_proposal_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<ProposalRecord>, DatabaseError>;
    async fn list_proposals(&self) -> Result<Vec<ProposalRecord>, DatabaseError>;
    /// Move a live proposal to `to` if its current status is one of `from`.
    ///
    /// Stamps `sent_at` / `accepted_at` when entering those states. Returns
    /// `None` when the guard did not match.
    async fn transition_proposal(
        &self,
        id: Uuid,
        from: &[ProposalStatus],
        to: ProposalStatus,
    ) -> Result<Option<ProposalRecord>, DatabaseError>;
    async fn archive_proposal(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Next value of the invoice number sequence.
    async fn next_invoice_sequence(&self) -> Result<i64, DatabaseError>;
    async fn create_invoice(
        &self,
        input: &CreateInvoiceParams,
    ) -> Result<InvoiceRecord, DatabaseError>;
    async fn get_invoice(&self, id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError>;
    async fn get_invoice_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<InvoiceRecord>, DatabaseError>;
    async fn list_invoices(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<InvoiceRecord>, DatabaseError>;
    /// Mark a live draft or sent invoice as paid.
    async fn mark_invoice_paid(&self, id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError>;
    async fn archive_invoice(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait BillingSettingsStore: Send + Sync {
    async fn get_billing_settings(&self) -> Result<Option<BillingSettingsRecord>, DatabaseError>;
    async fn upsert_billing_settings(
        &self,
        input: &UpsertBillingSettingsParams,
    ) -> Result<BillingSettingsRecord, DatabaseError>;
}

#[async_trait]
pub trait EmailTemplateStore: Send + Sync {
    async fn create_template(
        &self,
        input: &CreateEmailTemplateParams,
    ) -> Result<EmailTemplateRecord, DatabaseError>;
    async fn get_template(&self, id: Uuid) -> Result<Option<EmailTemplateRecord>, DatabaseError>;
    async fn list_templates(&self) -> Result<Vec<EmailTemplateRecord>, DatabaseError>;
    async fn update_template(
        &self,
        id: Uuid,
        input: &UpdateEmailTemplateParams,
    ) -> Result<Option<EmailTemplateRecord>, DatabaseError>;
    async fn archive_template(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait SuggestionStore: Send + Sync {
    async fn create_suggestion(
        &self,
        lead_id: Uuid,
        kind: SuggestionKind,
        content: &str,
    ) -> Result<SuggestionRecord, DatabaseError>;
    async fn list_suggestions(&self, lead_id: Uuid)
    -> Result<Vec<SuggestionRecord>, DatabaseError>;
    /// Resolve a pending suggestion. Returns `None` if it is not pending.
    async fn resolve_suggestion(
        &self,
        id: Uuid,
        status: SuggestionStatus,
    ) -> Result<Option<SuggestionRecord>, DatabaseError>;
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create_thread(
        &self,
        input: &CreateThreadParams,
    ) -> Result<EmailThreadRecord, DatabaseError>;
    async fn get_thread(&self, id: Uuid) -> Result<Option<EmailThreadRecord>, DatabaseError>;
    async fn list_threads(
        &self,
        lead_id: Option<Uuid>,
    ) -> Result<Vec<EmailThreadRecord>, DatabaseError>;
    /// Append a message and bump the thread's `last_message_at`.
    async fn add_message(
        &self,
        thread_id: Uuid,
        input: &CreateMessageParams,
    ) -> Result<EmailMessageRecord, DatabaseError>;
    async fn list_messages(&self, thread_id: Uuid)
    -> Result<Vec<EmailMessageRecord>, DatabaseError>;
}

#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn create_meeting(
        &self,
        input: &CreateMeetingParams,
    ) -> Result<MeetingRecord, DatabaseError>;
    async fn get_meeting(&self, id: Uuid) -> Result<Option<MeetingRecord>, DatabaseError>;
    async fn list_meetings(&self) -> Result<Vec<MeetingRecord>, DatabaseError>;
    /// Cancel a scheduled meeting. Returns `None` if it is not scheduled.
    async fn cancel_meeting(&self, id: Uuid) -> Result<Option<MeetingRecord>, DatabaseError>;
}

/// Full-table reads for the migration tools. Soft-deleted rows included.
#[async_trait]
pub trait ExportStore: Send + Sync {
    async fn export_users(&self) -> Result<Vec<UserRecord>, DatabaseError>;
    async fn export_clients(&self) -> Result<Vec<ClientRecord>, DatabaseError>;
    async fn export_projects(&self) -> Result<Vec<ProjectRecord>, DatabaseError>;
    async fn export_tasks(&self) -> Result<Vec<TaskRecord>, DatabaseError>;
}

/// Backend-agnostic relational database supertrait.
#[async_trait]
pub trait Database:
    UserStore
    + LeadStore
    + ContactStore
    + ClientStore
    + HourBlockStore
    + ProjectStore
    + TaskStore
    + ProposalStore
    + InvoiceStore
    + BillingSettingsStore
    + EmailTemplateStore
    + SuggestionStore
    + ThreadStore
    + MeetingStore
    + ExportStore
    + Send
    + Sync
{
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn db_enums_round_trip_through_text() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_db_value(status.as_str()), Some(*status));
        }
        assert_eq!(ProjectStatus::OnHold.as_str(), "on_hold");
        assert_eq!(SuggestionKind::FollowUp.as_str(), "follow_up");
        assert_eq!(LeadStatus::from_db_value("archived"), None);
    }

    #[test]
    fn db_enum_serde_matches_column_text() {
        let json = serde_json::to_string(&TaskStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"in_progress\"");
        let parsed: ProjectStatus = serde_json::from_str("\"on_hold\"").expect("deserialize");
        assert_eq!(parsed, ProjectStatus::OnHold);
    }

    #[test]
    fn parse_db_enum_names_the_column() {
        let err = parse_db_enum::<LeadStatus>("bogus").expect_err("must fail");
        assert!(err.to_string().contains("lead status"), "{err}");
    }

    #[test]
    fn line_item_amounts_round_to_cents() {
        let items = vec![
            LineItem {
                description: "Design".to_string(),
                quantity: dec!(1.5),
                unit_price: dec!(120),
            },
            LineItem {
                description: "Hosting".to_string(),
                quantity: dec!(3),
                unit_price: dec!(9.999),
            },
        ];
        assert_eq!(items[1].amount(), dec!(30.00));
        assert_eq!(line_items_total(&items), dec!(210.00));
    }

    #[test]
    fn password_hashes_are_never_serialized() {
        let user = UserRecord {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            full_name: "A".to_string(),
            role: UserRole::Member,
            password_hash: "$2b$04$secret".to_string(),
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).expect("serialize");
        assert!(json.get("password_hash").is_none());
        assert!(!user.is_deleted());
    }
}
