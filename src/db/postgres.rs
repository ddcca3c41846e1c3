//! PostgreSQL backend for the `Database` trait.
//!
//! Connections come from a `deadpool-postgres` pool; the schema is managed by
//! `refinery` migrations embedded from `migrations/`.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool, PoolConfig, Runtime};
use postgres_types::Json;
use secrecy::ExposeSecret;
use tokio_postgres::NoTls;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::{
    BILLING_SETTINGS_ID, BillingSettingsRecord, BillingSettingsStore, ClientRecord, ClientStore,
    ContactRecord, ContactStore, CreateClientParams, CreateContactParams,
    CreateEmailTemplateParams, CreateHourBlockParams, CreateInvoiceParams, CreateLeadParams,
    CreateMeetingParams, CreateMessageParams, CreateProjectParams, CreateProposalParams,
    CreateTaskParams, CreateThreadParams, CreateUserParams, Database, DbEnum, EmailMessageRecord,
    EmailTemplateRecord, EmailTemplateStore, EmailThreadRecord, ExportStore, HourBlockRecord,
    HourBlockStore, InvoiceRecord, LineItem, InvoiceStatus, InvoiceStore, LeadRecord, LeadStatus,
    LeadStore, MeetingRecord, MeetingStatus, MeetingStore, ProjectRecord, ProjectStore,
    ProposalRecord, ProposalStatus, ProposalStore, SuggestionKind, SuggestionRecord,
    SuggestionStatus, SuggestionStore, TaskRecord, TaskStore, ThreadStore, UpdateClientParams,
    UpdateEmailTemplateParams, UpdateProjectParams, UpdateTaskParams,
    UpsertBillingSettingsParams, UserRecord, UserStore, parse_db_enum,
};
use crate::error::DatabaseError;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// PostgreSQL database backend.
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config.url.as_ref().ok_or_else(|| {
            DatabaseError::Pool("DATABASE_URL is required for the postgres backend".to_string())
        })?;
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(url.expose_secret().to_string());
        cfg.pool = Some(PoolConfig::new(config.pool_size.max(1)));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        // Fail at startup rather than on the first request.
        drop(pool.get().await?);
        Ok(Self { pool })
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    async fn conn(&self) -> Result<Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

const USER_COLUMNS: &str =
    "id, email, full_name, role, password_hash, deleted_at, created_at, updated_at";
const LEAD_COLUMNS: &str = "id, name, email, phone, company, source, status, score, \
     score_reasoning, scored_at, notes, deleted_at, created_at, updated_at";
const CONTACT_COLUMNS: &str =
    "id, client_id, lead_id, name, email, phone, title, deleted_at, created_at, updated_at";
const CLIENT_COLUMNS: &str =
    "id, name, email, phone, status, notes, deleted_at, created_at, updated_at";
const HOUR_BLOCK_COLUMNS: &str = "id, client_id, hours, description, purchased_on, created_at";
const PROJECT_COLUMNS: &str = "id, client_id, name, description, status, starts_on, ends_on, \
     deleted_at, created_at, updated_at";
const TASK_COLUMNS: &str = "id, project_id, title, description, status, priority, assignee_id, \
     due_on, deleted_at, created_at, updated_at";
const PROPOSAL_COLUMNS: &str = "id, lead_id, client_id, title, status, line_items, total, \
     share_token, password_hash, sent_at, accepted_at, deleted_at, created_at, updated_at";
const INVOICE_COLUMNS: &str = "id, invoice_number, client_id, proposal_id, status, line_items, \
     subtotal, tax_rate, tax, total, issued_on, due_on, paid_at, share_token, deleted_at, \
     created_at, updated_at";
const BILLING_COLUMNS: &str = "business_name, business_email, business_address, invoice_prefix, \
     payment_terms_days, default_tax_rate, default_hourly_rate, updated_at";
const TEMPLATE_COLUMNS: &str =
    "id, name, subject, body, category, deleted_at, created_at, updated_at";
const SUGGESTION_COLUMNS: &str = "id, lead_id, kind, content, status, created_at, resolved_at";
const THREAD_COLUMNS: &str = "id, lead_id, contact_id, subject, last_message_at, created_at";
const MESSAGE_COLUMNS: &str = "id, thread_id, direction, sender, body, sent_at";
const MEETING_COLUMNS: &str = "id, lead_id, client_id, title, starts_at, ends_at, location, \
     notes, status, created_at, updated_at";

fn text_enum<T: DbEnum>(row: &tokio_postgres::Row, column: &str) -> Result<T, DatabaseError> {
    let raw: String = row.get(column);
    parse_db_enum(&raw)
}

fn json_line_items(row: &tokio_postgres::Row) -> Result<Vec<LineItem>, DatabaseError> {
    let Json(items) = row
        .try_get::<_, Json<Vec<LineItem>>>("line_items")
        .map_err(|e| DatabaseError::Serialization(format!("line_items: {e}")))?;
    Ok(items)
}

fn row_to_user_record(row: &tokio_postgres::Row) -> Result<UserRecord, DatabaseError> {
    Ok(UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        role: text_enum(row, "role")?,
        password_hash: row.get("password_hash"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_lead_record(row: &tokio_postgres::Row) -> Result<LeadRecord, DatabaseError> {
    Ok(LeadRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        company: row.get("company"),
        source: row.get("source"),
        status: text_enum(row, "status")?,
        score: row.get("score"),
        score_reasoning: row.get("score_reasoning"),
        scored_at: row.get("scored_at"),
        notes: row.get("notes"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_contact_record(row: &tokio_postgres::Row) -> Result<ContactRecord, DatabaseError> {
    Ok(ContactRecord {
        id: row.get("id"),
        client_id: row.get("client_id"),
        lead_id: row.get("lead_id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        title: row.get("title"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_client_record(row: &tokio_postgres::Row) -> Result<ClientRecord, DatabaseError> {
    Ok(ClientRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        status: text_enum(row, "status")?,
        notes: row.get("notes"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_hour_block_record(row: &tokio_postgres::Row) -> Result<HourBlockRecord, DatabaseError> {
    Ok(HourBlockRecord {
        id: row.get("id"),
        client_id: row.get("client_id"),
        hours: row.get("hours"),
        description: row.get("description"),
        purchased_on: row.get("purchased_on"),
        created_at: row.get("created_at"),
    })
}

fn row_to_project_record(row: &tokio_postgres::Row) -> Result<ProjectRecord, DatabaseError> {
    Ok(ProjectRecord {
        id: row.get("id"),
        client_id: row.get("client_id"),
        name: row.get("name"),
        description: row.get("description"),
        status: text_enum(row, "status")?,
        starts_on: row.get("starts_on"),
        ends_on: row.get("ends_on"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_task_record(row: &tokio_postgres::Row) -> Result<TaskRecord, DatabaseError> {
    Ok(TaskRecord {
        id: row.get("id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: text_enum(row, "status")?,
        priority: text_enum(row, "priority")?,
        assignee_id: row.get("assignee_id"),
        due_on: row.get("due_on"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_proposal_record(row: &tokio_postgres::Row) -> Result<ProposalRecord, DatabaseError> {
    Ok(ProposalRecord {
        id: row.get("id"),
        lead_id: row.get("lead_id"),
        client_id: row.get("client_id"),
        title: row.get("title"),
        status: text_enum(row, "status")?,
        line_items: json_line_items(row)?,
        total: row.get("total"),
        share_token: row.get("share_token"),
        password_hash: row.get("password_hash"),
        sent_at: row.get("sent_at"),
        accepted_at: row.get("accepted_at"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_invoice_record(row: &tokio_postgres::Row) -> Result<InvoiceRecord, DatabaseError> {
    Ok(InvoiceRecord {
        id: row.get("id"),
        invoice_number: row.get("invoice_number"),
        client_id: row.get("client_id"),
        proposal_id: row.get("proposal_id"),
        status: text_enum(row, "status")?,
        line_items: json_line_items(row)?,
        subtotal: row.get("subtotal"),
        tax_rate: row.get("tax_rate"),
        tax: row.get("tax"),
        total: row.get("total"),
        issued_on: row.get("issued_on"),
        due_on: row.get("due_on"),
        paid_at: row.get("paid_at"),
        share_token: row.get("share_token"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_billing_settings(
    row: &tokio_postgres::Row,
) -> Result<BillingSettingsRecord, DatabaseError> {
    Ok(BillingSettingsRecord {
        business_name: row.get("business_name"),
        business_email: row.get("business_email"),
        business_address: row.get("business_address"),
        invoice_prefix: row.get("invoice_prefix"),
        payment_terms_days: row.get("payment_terms_days"),
        default_tax_rate: row.get("default_tax_rate"),
        default_hourly_rate: row.get("default_hourly_rate"),
        updated_at: Some(row.get("updated_at")),
    })
}

fn row_to_template_record(
    row: &tokio_postgres::Row,
) -> Result<EmailTemplateRecord, DatabaseError> {
    Ok(EmailTemplateRecord {
        id: row.get("id"),
        name: row.get("name"),
        subject: row.get("subject"),
        body: row.get("body"),
        category: row.get("category"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_suggestion_record(row: &tokio_postgres::Row) -> Result<SuggestionRecord, DatabaseError> {
    Ok(SuggestionRecord {
        id: row.get("id"),
        lead_id: row.get("lead_id"),
        kind: text_enum(row, "kind")?,
        content: row.get("content"),
        status: text_enum(row, "status")?,
        created_at: row.get("created_at"),
        resolved_at: row.get("resolved_at"),
    })
}

fn row_to_thread_record(row: &tokio_postgres::Row) -> Result<EmailThreadRecord, DatabaseError> {
    Ok(EmailThreadRecord {
        id: row.get("id"),
        lead_id: row.get("lead_id"),
        contact_id: row.get("contact_id"),
        subject: row.get("subject"),
        last_message_at: row.get("last_message_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_message_record(row: &tokio_postgres::Row) -> Result<EmailMessageRecord, DatabaseError> {
    Ok(EmailMessageRecord {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        direction: text_enum(row, "direction")?,
        sender: row.get("sender"),
        body: row.get("body"),
        sent_at: row.get("sent_at"),
    })
}

fn row_to_meeting_record(row: &tokio_postgres::Row) -> Result<MeetingRecord, DatabaseError> {
    Ok(MeetingRecord {
        id: row.get("id"),
        lead_id: row.get("lead_id"),
        client_id: row.get("client_id"),
        title: row.get("title"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        location: row.get("location"),
        notes: row.get("notes"),
        status: text_enum(row, "status")?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_rows<T>(
    rows: Vec<tokio_postgres::Row>,
    map: fn(&tokio_postgres::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    rows.iter().map(map).collect()
}

#[async_trait]
impl Database for PgBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut client = self.conn().await?;
        embedded::migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }
}

// ==================== UserStore ====================

#[async_trait]
impl UserStore for PgBackend {
    async fn create_user(&self, input: &CreateUserParams) -> Result<UserRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO users (id, email, full_name, role, password_hash) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.email.trim(),
                    &input.full_name.trim(),
                    &input.role.as_str(),
                    &input.password_hash,
                ],
            )
            .await?;
        row_to_user_record(&row)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_user_record(&row)).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users \
                     WHERE lower(email) = lower($1) AND deleted_at IS NULL"
                ),
                &[&email.trim()],
            )
            .await?;
        row.map(|row| row_to_user_record(&row)).transpose()
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL \
                     ORDER BY lower(email) ASC, id ASC"
                ),
                &[],
            )
            .await?;
        map_rows(rows, row_to_user_record)
    }
}

// ==================== LeadStore ====================

#[async_trait]
impl LeadStore for PgBackend {
    async fn create_lead(&self, input: &CreateLeadParams) -> Result<LeadRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO leads (id, name, email, phone, company, source, status, notes) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {LEAD_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.name.trim(),
                    &input.email,
                    &input.phone,
                    &input.company,
                    &input.source,
                    &LeadStatus::New.as_str(),
                    &input.notes,
                ],
            )
            .await?;
        row_to_lead_record(&row)
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<LeadRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = $1 AND deleted_at IS NULL"),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_lead_record(&row)).transpose()
    }

    async fn list_leads(
        &self,
        status: Option<LeadStatus>,
    ) -> Result<Vec<LeadRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let status = status.map(LeadStatus::as_str);
        let rows = conn
            .query(
                &format!(
                    "SELECT {LEAD_COLUMNS} FROM leads \
                     WHERE deleted_at IS NULL AND ($1::text IS NULL OR status = $1) \
                     ORDER BY created_at DESC, id ASC"
                ),
                &[&status],
            )
            .await?;
        map_rows(rows, row_to_lead_record)
    }

    async fn update_lead_status(
        &self,
        id: Uuid,
        status: LeadStatus,
    ) -> Result<Option<LeadRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE leads SET status = $2, updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL RETURNING {LEAD_COLUMNS}"
                ),
                &[&id, &status.as_str()],
            )
            .await?;
        row.map(|row| row_to_lead_record(&row)).transpose()
    }

    async fn update_lead_score(
        &self,
        id: Uuid,
        score: i32,
        reasoning: &str,
    ) -> Result<Option<LeadRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE leads SET score = $2, score_reasoning = $3, scored_at = NOW(), \
                       updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL RETURNING {LEAD_COLUMNS}"
                ),
                &[&id, &score, &reasoning],
            )
            .await?;
        row.map(|row| row_to_lead_record(&row)).transpose()
    }

    async fn archive_lead(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let archived = conn
            .execute(
                "UPDATE leads SET deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;
        Ok(archived > 0)
    }
}

// ==================== ContactStore ====================

#[async_trait]
impl ContactStore for PgBackend {
    async fn create_contact(
        &self,
        input: &CreateContactParams,
    ) -> Result<ContactRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO contacts (id, client_id, lead_id, name, email, phone, title) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {CONTACT_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.client_id,
                    &input.lead_id,
                    &input.name.trim(),
                    &input.email,
                    &input.phone,
                    &input.title,
                ],
            )
            .await?;
        row_to_contact_record(&row)
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<ContactRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1 AND deleted_at IS NULL"
                ),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_contact_record(&row)).transpose()
    }

    async fn list_contacts(
        &self,
        client_id: Option<Uuid>,
        lead_id: Option<Uuid>,
    ) -> Result<Vec<ContactRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts \
                     WHERE deleted_at IS NULL \
                       AND ($1::uuid IS NULL OR client_id = $1) \
                       AND ($2::uuid IS NULL OR lead_id = $2) \
                     ORDER BY lower(name) ASC, id ASC"
                ),
                &[&client_id, &lead_id],
            )
            .await?;
        map_rows(rows, row_to_contact_record)
    }

    async fn archive_contact(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let archived = conn
            .execute(
                "UPDATE contacts SET deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;
        Ok(archived > 0)
    }
}

// ==================== ClientStore ====================

#[async_trait]
impl ClientStore for PgBackend {
    async fn create_client(
        &self,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DatabaseError::Serialization(
                "client name cannot be empty".to_string(),
            ));
        }

        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO clients (id, name, email, phone, status, notes) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING {CLIENT_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &name,
                    &input.email,
                    &input.phone,
                    &input.status.as_str(),
                    &input.notes,
                ],
            )
            .await?;
        row_to_client_record(&row)
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<ClientRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1 AND deleted_at IS NULL"
                ),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_client_record(&row)).transpose()
    }

    async fn list_clients(&self) -> Result<Vec<ClientRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients WHERE deleted_at IS NULL \
                     ORDER BY lower(name) ASC, id ASC"
                ),
                &[],
            )
            .await?;
        map_rows(rows, row_to_client_record)
    }

    async fn update_client(
        &self,
        id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError> {
        let Some(existing) = self.get_client(id).await? else {
            return Ok(None);
        };

        let merged_name = input
            .name
            .as_deref()
            .unwrap_or(existing.name.as_str())
            .trim()
            .to_string();
        if merged_name.is_empty() {
            return Err(DatabaseError::Serialization(
                "client name cannot be empty".to_string(),
            ));
        }
        let merged_email = input.email.clone().unwrap_or(existing.email);
        let merged_phone = input.phone.clone().unwrap_or(existing.phone);
        let merged_status = input.status.unwrap_or(existing.status);
        let merged_notes = input.notes.clone().unwrap_or(existing.notes);

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE clients SET \
                       name = $2, email = $3, phone = $4, status = $5, notes = $6, \
                       updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL RETURNING {CLIENT_COLUMNS}"
                ),
                &[
                    &id,
                    &merged_name,
                    &merged_email,
                    &merged_phone,
                    &merged_status.as_str(),
                    &merged_notes,
                ],
            )
            .await?;
        row.map(|row| row_to_client_record(&row)).transpose()
    }

    async fn archive_client(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let archived = conn
            .execute(
                "UPDATE clients SET deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;
        Ok(archived > 0)
    }
}

// ==================== HourBlockStore ====================

#[async_trait]
impl HourBlockStore for PgBackend {
    async fn add_hour_block(
        &self,
        input: &CreateHourBlockParams,
    ) -> Result<HourBlockRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO hour_blocks (id, client_id, hours, description, purchased_on) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING {HOUR_BLOCK_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.client_id,
                    &input.hours,
                    &input.description,
                    &input.purchased_on,
                ],
            )
            .await?;
        row_to_hour_block_record(&row)
    }

    async fn list_hour_blocks(
        &self,
        client_id: Uuid,
    ) -> Result<Vec<HourBlockRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {HOUR_BLOCK_COLUMNS} FROM hour_blocks WHERE client_id = $1 \
                     ORDER BY purchased_on ASC, id ASC"
                ),
                &[&client_id],
            )
            .await?;
        map_rows(rows, row_to_hour_block_record)
    }
}

// ==================== ProjectStore ====================

#[async_trait]
impl ProjectStore for PgBackend {
    async fn create_project(
        &self,
        input: &CreateProjectParams,
    ) -> Result<ProjectRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO projects (id, client_id, name, description, status, starts_on, ends_on) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {PROJECT_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.client_id,
                    &input.name.trim(),
                    &input.description,
                    &input.status.as_str(),
                    &input.starts_on,
                    &input.ends_on,
                ],
            )
            .await?;
        row_to_project_record(&row)
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<ProjectRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1 AND deleted_at IS NULL"
                ),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_project_record(&row)).transpose()
    }

    async fn list_projects(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<ProjectRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {PROJECT_COLUMNS} FROM projects \
                     WHERE deleted_at IS NULL AND ($1::uuid IS NULL OR client_id = $1) \
                     ORDER BY lower(name) ASC, id ASC"
                ),
                &[&client_id],
            )
            .await?;
        map_rows(rows, row_to_project_record)
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

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE projects SET \
                       name = $2, description = $3, status = $4, starts_on = $5, ends_on = $6, \
                       updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL RETURNING {PROJECT_COLUMNS}"
                ),
                &[
                    &id,
                    &name.trim(),
                    &description,
                    &status.as_str(),
                    &starts_on,
                    &ends_on,
                ],
            )
            .await?;
        row.map(|row| row_to_project_record(&row)).transpose()
    }

    async fn archive_project(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let archived = conn
            .execute(
                "UPDATE projects SET deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;
        Ok(archived > 0)
    }
}

// ==================== TaskStore ====================

#[async_trait]
impl TaskStore for PgBackend {
    async fn create_task(&self, input: &CreateTaskParams) -> Result<TaskRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO tasks (id, project_id, title, description, status, priority, assignee_id, due_on) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {TASK_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.project_id,
                    &input.title.trim(),
                    &input.description,
                    &input.status.as_str(),
                    &input.priority.as_str(),
                    &input.assignee_id,
                    &input.due_on,
                ],
            )
            .await?;
        row_to_task_record(&row)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<TaskRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND deleted_at IS NULL"),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_task_record(&row)).transpose()
    }

    async fn list_tasks(&self, project_id: Option<Uuid>) -> Result<Vec<TaskRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE deleted_at IS NULL AND ($1::uuid IS NULL OR project_id = $1) \
                     ORDER BY created_at ASC, id ASC"
                ),
                &[&project_id],
            )
            .await?;
        map_rows(rows, row_to_task_record)
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

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE tasks SET \
                       title = $2, description = $3, status = $4, priority = $5, \
                       assignee_id = $6, due_on = $7, updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL RETURNING {TASK_COLUMNS}"
                ),
                &[
                    &id,
                    &title.trim(),
                    &description,
                    &status.as_str(),
                    &priority.as_str(),
                    &assignee_id,
                    &due_on,
                ],
            )
            .await?;
        row.map(|row| row_to_task_record(&row)).transpose()
    }

    async fn archive_task(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let archived = conn
            .execute(
                "UPDATE tasks SET deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;
        Ok(archived > 0)
    }
}

// ==================== ProposalStore ====================

#[async_trait]
impl ProposalStore for PgBackend {
    async fn create_proposal(
        &self,
        input: &CreateProposalParams,
    ) -> Result<ProposalRecord, DatabaseError> {
        let line_items = Json(&input.line_items);
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO proposals \
                     (id, lead_id, client_id, title, status, line_items, total, share_token, password_hash) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {PROPOSAL_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.lead_id,
                    &input.client_id,
                    &input.title.trim(),
                    &ProposalStatus::Draft.as_str(),
                    &line_items,
                    &input.total,
                    &input.share_token,
                    &input.password_hash,
                ],
            )
            .await?;
        row_to_proposal_record(&row)
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<ProposalRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = $1 AND deleted_at IS NULL"
                ),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_proposal_record(&row)).transpose()
    }

    async fn get_proposal_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<ProposalRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM proposals \
                     WHERE share_token = $1 AND deleted_at IS NULL"
                ),
                &[&token],
            )
            .await?;
        row.map(|row| row_to_proposal_record(&row)).transpose()
    }

    async fn list_proposals(&self) -> Result<Vec<ProposalRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE deleted_at IS NULL \
                     ORDER BY created_at DESC, id ASC"
                ),
                &[],
            )
            .await?;
        map_rows(rows, row_to_proposal_record)
    }

    async fn transition_proposal(
        &self,
        id: Uuid,
        from: &[ProposalStatus],
        to: ProposalStatus,
    ) -> Result<Option<ProposalRecord>, DatabaseError> {
        let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE proposals SET \
                       status = $2, \
                       sent_at = CASE WHEN $2 = 'sent' THEN NOW() ELSE sent_at END, \
                       accepted_at = CASE WHEN $2 = 'accepted' THEN NOW() ELSE accepted_at END, \
                       updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL AND status = ANY($3::text[]) \
                     RETURNING {PROPOSAL_COLUMNS}"
                ),
                &[&id, &to.as_str(), &from],
            )
            .await?;
        row.map(|row| row_to_proposal_record(&row)).transpose()
    }

    async fn archive_proposal(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let archived = conn
            .execute(
                "UPDATE proposals SET deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;
        Ok(archived > 0)
    }
}

// ==================== InvoiceStore ====================

#[async_trait]
impl InvoiceStore for PgBackend {
    async fn next_invoice_sequence(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one("SELECT nextval('invoice_number_seq')", &[])
            .await?;
        Ok(row.get(0))
    }

    async fn create_invoice(
        &self,
        input: &CreateInvoiceParams,
    ) -> Result<InvoiceRecord, DatabaseError> {
        let line_items = Json(&input.line_items);
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO invoices \
                     (id, invoice_number, client_id, proposal_id, status, line_items, subtotal, \
                      tax_rate, tax, total, issued_on, due_on, share_token) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
                     RETURNING {INVOICE_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.invoice_number,
                    &input.client_id,
                    &input.proposal_id,
                    &InvoiceStatus::Draft.as_str(),
                    &line_items,
                    &input.subtotal,
                    &input.tax_rate,
                    &input.tax,
                    &input.total,
                    &input.issued_on,
                    &input.due_on,
                    &input.share_token,
                ],
            )
            .await?;
        row_to_invoice_record(&row)
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 AND deleted_at IS NULL"
                ),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_invoice_record(&row)).transpose()
    }

    async fn get_invoice_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices \
                     WHERE share_token = $1 AND deleted_at IS NULL"
                ),
                &[&token],
            )
            .await?;
        row.map(|row| row_to_invoice_record(&row)).transpose()
    }

    async fn list_invoices(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<InvoiceRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices \
                     WHERE deleted_at IS NULL AND ($1::uuid IS NULL OR client_id = $1) \
                     ORDER BY created_at DESC, id ASC"
                ),
                &[&client_id],
            )
            .await?;
        map_rows(rows, row_to_invoice_record)
    }

    async fn mark_invoice_paid(&self, id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE invoices SET status = 'paid', paid_at = NOW(), updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL AND status IN ('draft', 'sent') \
                     RETURNING {INVOICE_COLUMNS}"
                ),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_invoice_record(&row)).transpose()
    }

    async fn archive_invoice(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let archived = conn
            .execute(
                "UPDATE invoices SET deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;
        Ok(archived > 0)
    }
}

// ==================== BillingSettingsStore ====================

#[async_trait]
impl BillingSettingsStore for PgBackend {
    async fn get_billing_settings(&self) -> Result<Option<BillingSettingsRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {BILLING_COLUMNS} FROM billing_settings WHERE id = $1"),
                &[&BILLING_SETTINGS_ID],
            )
            .await?;
        row.map(|row| row_to_billing_settings(&row)).transpose()
    }

    async fn upsert_billing_settings(
        &self,
        input: &UpsertBillingSettingsParams,
    ) -> Result<BillingSettingsRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO billing_settings \
                     (id, business_name, business_email, business_address, invoice_prefix, \
                      payment_terms_days, default_tax_rate, default_hourly_rate) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     ON CONFLICT (id) DO UPDATE SET \
                        business_name = EXCLUDED.business_name, \
                        business_email = EXCLUDED.business_email, \
                        business_address = EXCLUDED.business_address, \
                        invoice_prefix = EXCLUDED.invoice_prefix, \
                        payment_terms_days = EXCLUDED.payment_terms_days, \
                        default_tax_rate = EXCLUDED.default_tax_rate, \
                        default_hourly_rate = EXCLUDED.default_hourly_rate, \
                        updated_at = NOW() \
                     RETURNING {BILLING_COLUMNS}"
                ),
                &[
                    &BILLING_SETTINGS_ID,
                    &input.business_name.trim(),
                    &input.business_email,
                    &input.business_address,
                    &input.invoice_prefix.trim(),
                    &input.payment_terms_days,
                    &input.default_tax_rate,
                    &input.default_hourly_rate,
                ],
            )
            .await?;
        row_to_billing_settings(&row)
    }
}

// ==================== EmailTemplateStore ====================

#[async_trait]
impl EmailTemplateStore for PgBackend {
    async fn create_template(
        &self,
        input: &CreateEmailTemplateParams,
    ) -> Result<EmailTemplateRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO email_templates (id, name, subject, body, category) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING {TEMPLATE_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.name.trim(),
                    &input.subject,
                    &input.body,
                    &input.category,
                ],
            )
            .await?;
        row_to_template_record(&row)
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<EmailTemplateRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM email_templates \
                     WHERE id = $1 AND deleted_at IS NULL"
                ),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_template_record(&row)).transpose()
    }

    async fn list_templates(&self) -> Result<Vec<EmailTemplateRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM email_templates WHERE deleted_at IS NULL \
                     ORDER BY lower(name) ASC, id ASC"
                ),
                &[],
            )
            .await?;
        map_rows(rows, row_to_template_record)
    }

    async fn update_template(
        &self,
        id: Uuid,
        input: &UpdateEmailTemplateParams,
    ) -> Result<Option<EmailTemplateRecord>, DatabaseError> {
        let Some(existing) = self.get_template(id).await? else {
            return Ok(None);
        };
        let name = input.name.clone().unwrap_or(existing.name);
        let subject = input.subject.clone().unwrap_or(existing.subject);
        let body = input.body.clone().unwrap_or(existing.body);
        let category = input.category.clone().unwrap_or(existing.category);

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE email_templates SET \
                       name = $2, subject = $3, body = $4, category = $5, updated_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL RETURNING {TEMPLATE_COLUMNS}"
                ),
                &[&id, &name.trim(), &subject, &body, &category],
            )
            .await?;
        row.map(|row| row_to_template_record(&row)).transpose()
    }

    async fn archive_template(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let archived = conn
            .execute(
                "UPDATE email_templates SET deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;
        Ok(archived > 0)
    }
}

// ==================== SuggestionStore ====================

#[async_trait]
impl SuggestionStore for PgBackend {
    async fn create_suggestion(
        &self,
        lead_id: Uuid,
        kind: SuggestionKind,
        content: &str,
    ) -> Result<SuggestionRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO suggestions (id, lead_id, kind, content, status) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING {SUGGESTION_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &lead_id,
                    &kind.as_str(),
                    &content,
                    &SuggestionStatus::Pending.as_str(),
                ],
            )
            .await?;
        row_to_suggestion_record(&row)
    }

    async fn list_suggestions(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<SuggestionRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {SUGGESTION_COLUMNS} FROM suggestions WHERE lead_id = $1 \
                     ORDER BY created_at DESC, id ASC"
                ),
                &[&lead_id],
            )
            .await?;
        map_rows(rows, row_to_suggestion_record)
    }

    async fn resolve_suggestion(
        &self,
        id: Uuid,
        status: SuggestionStatus,
    ) -> Result<Option<SuggestionRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE suggestions SET status = $2, resolved_at = NOW() \
                     WHERE id = $1 AND status = 'pending' RETURNING {SUGGESTION_COLUMNS}"
                ),
                &[&id, &status.as_str()],
            )
            .await?;
        row.map(|row| row_to_suggestion_record(&row)).transpose()
    }
}

// ==================== ThreadStore ====================

#[async_trait]
impl ThreadStore for PgBackend {
    async fn create_thread(
        &self,
        input: &CreateThreadParams,
    ) -> Result<EmailThreadRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO email_threads (id, lead_id, contact_id, subject) \
                     VALUES ($1, $2, $3, $4) RETURNING {THREAD_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.lead_id,
                    &input.contact_id,
                    &input.subject.trim(),
                ],
            )
            .await?;
        row_to_thread_record(&row)
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<EmailThreadRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {THREAD_COLUMNS} FROM email_threads WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_thread_record(&row)).transpose()
    }

    async fn list_threads(
        &self,
        lead_id: Option<Uuid>,
    ) -> Result<Vec<EmailThreadRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {THREAD_COLUMNS} FROM email_threads \
                     WHERE ($1::uuid IS NULL OR lead_id = $1) \
                     ORDER BY COALESCE(last_message_at, created_at) DESC, id ASC"
                ),
                &[&lead_id],
            )
            .await?;
        map_rows(rows, row_to_thread_record)
    }

    async fn add_message(
        &self,
        thread_id: Uuid,
        input: &CreateMessageParams,
    ) -> Result<EmailMessageRecord, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let touched = tx
            .execute(
                "UPDATE email_threads SET last_message_at = NOW() WHERE id = $1",
                &[&thread_id],
            )
            .await?;
        if touched == 0 {
            return Err(DatabaseError::NotFound {
                entity: "thread".to_string(),
                id: thread_id.to_string(),
            });
        }
        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO email_messages (id, thread_id, direction, sender, body, sent_at) \
                     SELECT $1, $2, $3, $4, $5, last_message_at FROM email_threads WHERE id = $2 \
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &thread_id,
                    &input.direction.as_str(),
                    &input.sender,
                    &input.body,
                ],
            )
            .await?;
        tx.commit().await?;
        row_to_message_record(&row)
    }

    async fn list_messages(
        &self,
        thread_id: Uuid,
    ) -> Result<Vec<EmailMessageRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM email_messages WHERE thread_id = $1 \
                     ORDER BY sent_at ASC, id ASC"
                ),
                &[&thread_id],
            )
            .await?;
        map_rows(rows, row_to_message_record)
    }
}

// ==================== MeetingStore ====================

#[async_trait]
impl MeetingStore for PgBackend {
    async fn create_meeting(
        &self,
        input: &CreateMeetingParams,
    ) -> Result<MeetingRecord, DatabaseError> {
        if input.ends_at < input.starts_at {
            return Err(DatabaseError::Serialization(
                "meeting cannot end before it starts".to_string(),
            ));
        }
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO meetings \
                     (id, lead_id, client_id, title, starts_at, ends_at, location, notes, status) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {MEETING_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.lead_id,
                    &input.client_id,
                    &input.title.trim(),
                    &input.starts_at,
                    &input.ends_at,
                    &input.location,
                    &input.notes,
                    &MeetingStatus::Scheduled.as_str(),
                ],
            )
            .await?;
        row_to_meeting_record(&row)
    }

    async fn get_meeting(&self, id: Uuid) -> Result<Option<MeetingRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_meeting_record(&row)).transpose()
    }

    async fn list_meetings(&self) -> Result<Vec<MeetingRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {MEETING_COLUMNS} FROM meetings ORDER BY starts_at ASC, id ASC"),
                &[],
            )
            .await?;
        map_rows(rows, row_to_meeting_record)
    }

    async fn cancel_meeting(&self, id: Uuid) -> Result<Option<MeetingRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE meetings SET status = 'cancelled', updated_at = NOW() \
                     WHERE id = $1 AND status = 'scheduled' RETURNING {MEETING_COLUMNS}"
                ),
                &[&id],
            )
            .await?;
        row.map(|row| row_to_meeting_record(&row)).transpose()
    }
}

// ==================== ExportStore ====================

#[async_trait]
impl ExportStore for PgBackend {
    async fn export_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC"),
                &[],
            )
            .await?;
        map_rows(rows, row_to_user_record)
    }

    async fn export_clients(&self) -> Result<Vec<ClientRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients ORDER BY created_at ASC, id ASC"),
                &[],
            )
            .await?;
        map_rows(rows, row_to_client_record)
    }

    async fn export_projects(&self) -> Result<Vec<ProjectRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at ASC, id ASC"),
                &[],
            )
            .await?;
        map_rows(rows, row_to_project_record)
    }

    async fn export_tasks(&self) -> Result<Vec<TaskRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, id ASC"),
                &[],
            )
            .await?;
        map_rows(rows, row_to_task_record)
    }
}
