use libsql::params;
use uuid::Uuid;

use crate::db::{
    ClientRecord, ClientStore, ContactRecord, ContactStore, CreateClientParams,
    CreateContactParams, CreateEmailTemplateParams, CreateHourBlockParams, CreateLeadParams,
    CreateMeetingParams, CreateMessageParams, CreateThreadParams, CreateUserParams,
    EmailMessageRecord, EmailTemplateRecord, EmailTemplateStore, EmailThreadRecord,
    HourBlockRecord, HourBlockStore, LeadRecord, LeadStatus, LeadStore, MeetingRecord,
    MeetingStatus, MeetingStore, SuggestionKind, SuggestionRecord, SuggestionStatus,
    SuggestionStore, ThreadStore, UpdateClientParams, UpdateEmailTemplateParams, UserRecord,
    UserStore, parse_db_enum,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_date, fmt_ts, get_opt_i64, get_opt_text, get_text, now_text, opt_text,
    opt_uuid, parse_date, parse_decimal, parse_opt_timestamp, parse_opt_uuid, parse_timestamp,
    parse_uuid, query_all, query_one, query_opt,
};

pub(super) const USER_COLUMNS: &str =
    "id, email, full_name, role, password_hash, deleted_at, created_at, updated_at";
const LEAD_COLUMNS: &str = "id, name, email, phone, company, source, status, score, \
     score_reasoning, scored_at, notes, deleted_at, created_at, updated_at";
const CONTACT_COLUMNS: &str =
    "id, client_id, lead_id, name, email, phone, title, deleted_at, created_at, updated_at";
pub(super) const CLIENT_COLUMNS: &str =
    "id, name, email, phone, status, notes, deleted_at, created_at, updated_at";
const HOUR_BLOCK_COLUMNS: &str = "id, client_id, hours, description, purchased_on, created_at";
const TEMPLATE_COLUMNS: &str =
    "id, name, subject, body, category, deleted_at, created_at, updated_at";
const SUGGESTION_COLUMNS: &str = "id, lead_id, kind, content, status, created_at, resolved_at";
const THREAD_COLUMNS: &str = "id, lead_id, contact_id, subject, last_message_at, created_at";
const MESSAGE_COLUMNS: &str = "id, thread_id, direction, sender, body, sent_at";
const MEETING_COLUMNS: &str = "id, lead_id, client_id, title, starts_at, ends_at, location, \
     notes, status, created_at, updated_at";

pub(super) fn row_to_user_record(row: &libsql::Row) -> Result<UserRecord, DatabaseError> {
    Ok(UserRecord {
        id: parse_uuid(&get_text(row, 0), "user.id")?,
        email: get_text(row, 1),
        full_name: get_text(row, 2),
        role: parse_db_enum(&get_text(row, 3))?,
        password_hash: get_text(row, 4),
        deleted_at: parse_opt_timestamp(get_opt_text(row, 5))?,
        created_at: parse_timestamp(&get_text(row, 6))?,
        updated_at: parse_timestamp(&get_text(row, 7))?,
    })
}

fn row_to_lead_record(row: &libsql::Row) -> Result<LeadRecord, DatabaseError> {
    let score = get_opt_i64(row, 7)
        .map(|value| {
            i32::try_from(value)
                .map_err(|_| DatabaseError::Serialization(format!("invalid lead score {value}")))
        })
        .transpose()?;
    Ok(LeadRecord {
        id: parse_uuid(&get_text(row, 0), "lead.id")?,
        name: get_text(row, 1),
        email: get_opt_text(row, 2),
        phone: get_opt_text(row, 3),
        company: get_opt_text(row, 4),
        source: get_opt_text(row, 5),
        status: parse_db_enum(&get_text(row, 6))?,
        score,
        score_reasoning: get_opt_text(row, 8),
        scored_at: parse_opt_timestamp(get_opt_text(row, 9))?,
        notes: get_opt_text(row, 10),
        deleted_at: parse_opt_timestamp(get_opt_text(row, 11))?,
        created_at: parse_timestamp(&get_text(row, 12))?,
        updated_at: parse_timestamp(&get_text(row, 13))?,
    })
}

fn row_to_contact_record(row: &libsql::Row) -> Result<ContactRecord, DatabaseError> {
    Ok(ContactRecord {
        id: parse_uuid(&get_text(row, 0), "contact.id")?,
        client_id: parse_opt_uuid(get_opt_text(row, 1), "contact.client_id")?,
        lead_id: parse_opt_uuid(get_opt_text(row, 2), "contact.lead_id")?,
        name: get_text(row, 3),
        email: get_opt_text(row, 4),
        phone: get_opt_text(row, 5),
        title: get_opt_text(row, 6),
        deleted_at: parse_opt_timestamp(get_opt_text(row, 7))?,
        created_at: parse_timestamp(&get_text(row, 8))?,
        updated_at: parse_timestamp(&get_text(row, 9))?,
    })
}

pub(super) fn row_to_client_record(row: &libsql::Row) -> Result<ClientRecord, DatabaseError> {
    Ok(ClientRecord {
        id: parse_uuid(&get_text(row, 0), "client.id")?,
        name: get_text(row, 1),
        email: get_opt_text(row, 2),
        phone: get_opt_text(row, 3),
        status: parse_db_enum(&get_text(row, 4))?,
        notes: get_opt_text(row, 5),
        deleted_at: parse_opt_timestamp(get_opt_text(row, 6))?,
        created_at: parse_timestamp(&get_text(row, 7))?,
        updated_at: parse_timestamp(&get_text(row, 8))?,
    })
}

fn row_to_hour_block_record(row: &libsql::Row) -> Result<HourBlockRecord, DatabaseError> {
    Ok(HourBlockRecord {
        id: parse_uuid(&get_text(row, 0), "hour_block.id")?,
        client_id: parse_uuid(&get_text(row, 1), "hour_block.client_id")?,
        hours: parse_decimal(&get_text(row, 2), "hours")?,
        description: get_opt_text(row, 3),
        purchased_on: parse_date(&get_text(row, 4), "purchased_on")?,
        created_at: parse_timestamp(&get_text(row, 5))?,
    })
}

fn row_to_template_record(row: &libsql::Row) -> Result<EmailTemplateRecord, DatabaseError> {
    Ok(EmailTemplateRecord {
        id: parse_uuid(&get_text(row, 0), "email_template.id")?,
        name: get_text(row, 1),
        subject: get_text(row, 2),
        body: get_text(row, 3),
        category: get_opt_text(row, 4),
        deleted_at: parse_opt_timestamp(get_opt_text(row, 5))?,
        created_at: parse_timestamp(&get_text(row, 6))?,
        updated_at: parse_timestamp(&get_text(row, 7))?,
    })
}

fn row_to_suggestion_record(row: &libsql::Row) -> Result<SuggestionRecord, DatabaseError> {
    Ok(SuggestionRecord {
        id: parse_uuid(&get_text(row, 0), "suggestion.id")?,
        lead_id: parse_uuid(&get_text(row, 1), "suggestion.lead_id")?,
        kind: parse_db_enum(&get_text(row, 2))?,
        content: get_text(row, 3),
        status: parse_db_enum(&get_text(row, 4))?,
        created_at: parse_timestamp(&get_text(row, 5))?,
        resolved_at: parse_opt_timestamp(get_opt_text(row, 6))?,
    })
}

fn row_to_thread_record(row: &libsql::Row) -> Result<EmailThreadRecord, DatabaseError> {
    Ok(EmailThreadRecord {
        id: parse_uuid(&get_text(row, 0), "thread.id")?,
        lead_id: parse_opt_uuid(get_opt_text(row, 1), "thread.lead_id")?,
        contact_id: parse_opt_uuid(get_opt_text(row, 2), "thread.contact_id")?,
        subject: get_text(row, 3),
        last_message_at: parse_opt_timestamp(get_opt_text(row, 4))?,
        created_at: parse_timestamp(&get_text(row, 5))?,
    })
}

fn row_to_message_record(row: &libsql::Row) -> Result<EmailMessageRecord, DatabaseError> {
    Ok(EmailMessageRecord {
        id: parse_uuid(&get_text(row, 0), "message.id")?,
        thread_id: parse_uuid(&get_text(row, 1), "message.thread_id")?,
        direction: parse_db_enum(&get_text(row, 2))?,
        sender: get_text(row, 3),
        body: get_text(row, 4),
        sent_at: parse_timestamp(&get_text(row, 5))?,
    })
}

fn row_to_meeting_record(row: &libsql::Row) -> Result<MeetingRecord, DatabaseError> {
    Ok(MeetingRecord {
        id: parse_uuid(&get_text(row, 0), "meeting.id")?,
        lead_id: parse_opt_uuid(get_opt_text(row, 1), "meeting.lead_id")?,
        client_id: parse_opt_uuid(get_opt_text(row, 2), "meeting.client_id")?,
        title: get_text(row, 3),
        starts_at: parse_timestamp(&get_text(row, 4))?,
        ends_at: parse_timestamp(&get_text(row, 5))?,
        location: get_opt_text(row, 6),
        notes: get_opt_text(row, 7),
        status: parse_db_enum(&get_text(row, 8))?,
        created_at: parse_timestamp(&get_text(row, 9))?,
        updated_at: parse_timestamp(&get_text(row, 10))?,
    })
}

#[async_trait::async_trait]
impl UserStore for LibSqlBackend {
    async fn create_user(&self, input: &CreateUserParams) -> Result<UserRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO users (id, email, full_name, role, password_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                input.email.trim(),
                input.full_name.trim(),
                input.role.as_str(),
                input.password_hash.as_str(),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id.as_str()],
            row_to_user_record,
            "created user",
        )
        .await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1 AND deleted_at IS NULL"),
            params![id.to_string()],
            row_to_user_record,
        )
        .await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "SELECT {USER_COLUMNS} FROM users \
                 WHERE lower(email) = lower(?1) AND deleted_at IS NULL"
            ),
            params![email.trim()],
            row_to_user_record,
        )
        .await
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL \
                 ORDER BY lower(email) ASC, id ASC"
            ),
            (),
            row_to_user_record,
        )
        .await
    }
}

#[async_trait::async_trait]
impl LeadStore for LibSqlBackend {
    async fn create_lead(&self, input: &CreateLeadParams) -> Result<LeadRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO leads (id, name, email, phone, company, source, status, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.as_str(),
                input.name.trim(),
                opt_text(input.email.as_deref()),
                opt_text(input.phone.as_deref()),
                opt_text(input.company.as_deref()),
                opt_text(input.source.as_deref()),
                LeadStatus::New.as_str(),
                opt_text(input.notes.as_deref()),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
            params![id.as_str()],
            row_to_lead_record,
            "created lead",
        )
        .await
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<LeadRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1 AND deleted_at IS NULL"),
            params![id.to_string()],
            row_to_lead_record,
        )
        .await
    }

    async fn list_leads(
        &self,
        status: Option<LeadStatus>,
    ) -> Result<Vec<LeadRecord>, DatabaseError> {
        let conn = self.connect().await?;
        match status {
            Some(status) => {
                query_all(
                    &conn,
                    &format!(
                        "SELECT {LEAD_COLUMNS} FROM leads \
                         WHERE deleted_at IS NULL AND status = ?1 \
                         ORDER BY created_at DESC, id ASC"
                    ),
                    params![status.as_str()],
                    row_to_lead_record,
                )
                .await
            }
            None => {
                query_all(
                    &conn,
                    &format!(
                        "SELECT {LEAD_COLUMNS} FROM leads WHERE deleted_at IS NULL \
                         ORDER BY created_at DESC, id ASC"
                    ),
                    (),
                    row_to_lead_record,
                )
                .await
            }
        }
    }

    async fn update_lead_status(
        &self,
        id: Uuid,
        status: LeadStatus,
    ) -> Result<Option<LeadRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE leads SET status = ?2, updated_at = ?3 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), status.as_str(), now_text()],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_lead(id).await
    }

    async fn update_lead_score(
        &self,
        id: Uuid,
        score: i32,
        reasoning: &str,
    ) -> Result<Option<LeadRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let now = now_text();
        let updated = conn
            .execute(
                "UPDATE leads SET score = ?2, score_reasoning = ?3, scored_at = ?4, updated_at = ?4 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), i64::from(score), reasoning, now],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_lead(id).await
    }

    async fn archive_lead(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let now = now_text();
        let archived = conn
            .execute(
                "UPDATE leads SET deleted_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), now],
            )
            .await?;
        Ok(archived > 0)
    }
}

#[async_trait::async_trait]
impl ContactStore for LibSqlBackend {
    async fn create_contact(
        &self,
        input: &CreateContactParams,
    ) -> Result<ContactRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO contacts (id, client_id, lead_id, name, email, phone, title) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.as_str(),
                opt_uuid(input.client_id),
                opt_uuid(input.lead_id),
                input.name.trim(),
                opt_text(input.email.as_deref()),
                opt_text(input.phone.as_deref()),
                opt_text(input.title.as_deref()),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
            params![id.as_str()],
            row_to_contact_record,
            "created contact",
        )
        .await
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<ContactRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1 AND deleted_at IS NULL"
            ),
            params![id.to_string()],
            row_to_contact_record,
        )
        .await
    }

    async fn list_contacts(
        &self,
        client_id: Option<Uuid>,
        lead_id: Option<Uuid>,
    ) -> Result<Vec<ContactRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts \
                 WHERE deleted_at IS NULL \
                   AND (?1 IS NULL OR client_id = ?1) \
                   AND (?2 IS NULL OR lead_id = ?2) \
                 ORDER BY lower(name) ASC, id ASC"
            ),
            params![opt_uuid(client_id), opt_uuid(lead_id)],
            row_to_contact_record,
        )
        .await
    }

    async fn archive_contact(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let archived = conn
            .execute(
                "UPDATE contacts SET deleted_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), now_text()],
            )
            .await?;
        Ok(archived > 0)
    }
}

#[async_trait::async_trait]
impl ClientStore for LibSqlBackend {
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

        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO clients (id, name, email, phone, status, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.as_str(),
                name,
                opt_text(input.email.as_deref()),
                opt_text(input.phone.as_deref()),
                input.status.as_str(),
                opt_text(input.notes.as_deref()),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1"),
            params![id.as_str()],
            row_to_client_record,
            "created client",
        )
        .await
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<ClientRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1 AND deleted_at IS NULL"),
            params![id.to_string()],
            row_to_client_record,
        )
        .await
    }

    async fn list_clients(&self) -> Result<Vec<ClientRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {CLIENT_COLUMNS} FROM clients WHERE deleted_at IS NULL \
                 ORDER BY lower(name) ASC, id ASC"
            ),
            (),
            row_to_client_record,
        )
        .await
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
            .trim();
        if merged_name.is_empty() {
            return Err(DatabaseError::Serialization(
                "client name cannot be empty".to_string(),
            ));
        }
        let merged_email = input.email.clone().unwrap_or(existing.email);
        let merged_phone = input.phone.clone().unwrap_or(existing.phone);
        let merged_status = input.status.unwrap_or(existing.status);
        let merged_notes = input.notes.clone().unwrap_or(existing.notes);

        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE clients SET \
                   name = ?2, email = ?3, phone = ?4, status = ?5, notes = ?6, updated_at = ?7 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    id.to_string(),
                    merged_name,
                    opt_text(merged_email.as_deref()),
                    opt_text(merged_phone.as_deref()),
                    merged_status.as_str(),
                    opt_text(merged_notes.as_deref()),
                    now_text(),
                ],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_client(id).await
    }

    async fn archive_client(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let archived = conn
            .execute(
                "UPDATE clients SET deleted_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), now_text()],
            )
            .await?;
        Ok(archived > 0)
    }
}

#[async_trait::async_trait]
impl HourBlockStore for LibSqlBackend {
    async fn add_hour_block(
        &self,
        input: &CreateHourBlockParams,
    ) -> Result<HourBlockRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO hour_blocks (id, client_id, hours, description, purchased_on) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                input.client_id.to_string(),
                input.hours.to_string(),
                opt_text(input.description.as_deref()),
                fmt_date(input.purchased_on),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {HOUR_BLOCK_COLUMNS} FROM hour_blocks WHERE id = ?1"),
            params![id.as_str()],
            row_to_hour_block_record,
            "created hour block",
        )
        .await
    }

    async fn list_hour_blocks(
        &self,
        client_id: Uuid,
    ) -> Result<Vec<HourBlockRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {HOUR_BLOCK_COLUMNS} FROM hour_blocks WHERE client_id = ?1 \
                 ORDER BY purchased_on ASC, id ASC"
            ),
            params![client_id.to_string()],
            row_to_hour_block_record,
        )
        .await
    }
}

#[async_trait::async_trait]
impl EmailTemplateStore for LibSqlBackend {
    async fn create_template(
        &self,
        input: &CreateEmailTemplateParams,
    ) -> Result<EmailTemplateRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO email_templates (id, name, subject, body, category) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                input.name.trim(),
                input.subject.as_str(),
                input.body.as_str(),
                opt_text(input.category.as_deref()),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {TEMPLATE_COLUMNS} FROM email_templates WHERE id = ?1"),
            params![id.as_str()],
            row_to_template_record,
            "created email template",
        )
        .await
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<EmailTemplateRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "SELECT {TEMPLATE_COLUMNS} FROM email_templates \
                 WHERE id = ?1 AND deleted_at IS NULL"
            ),
            params![id.to_string()],
            row_to_template_record,
        )
        .await
    }

    async fn list_templates(&self) -> Result<Vec<EmailTemplateRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {TEMPLATE_COLUMNS} FROM email_templates WHERE deleted_at IS NULL \
                 ORDER BY lower(name) ASC, id ASC"
            ),
            (),
            row_to_template_record,
        )
        .await
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

        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE email_templates SET \
                   name = ?2, subject = ?3, body = ?4, category = ?5, updated_at = ?6 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    id.to_string(),
                    name.trim(),
                    subject,
                    body,
                    opt_text(category.as_deref()),
                    now_text(),
                ],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_template(id).await
    }

    async fn archive_template(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let archived = conn
            .execute(
                "UPDATE email_templates SET deleted_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), now_text()],
            )
            .await?;
        Ok(archived > 0)
    }
}

#[async_trait::async_trait]
impl SuggestionStore for LibSqlBackend {
    async fn create_suggestion(
        &self,
        lead_id: Uuid,
        kind: SuggestionKind,
        content: &str,
    ) -> Result<SuggestionRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO suggestions (id, lead_id, kind, content, status) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                lead_id.to_string(),
                kind.as_str(),
                content,
                SuggestionStatus::Pending.as_str(),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {SUGGESTION_COLUMNS} FROM suggestions WHERE id = ?1"),
            params![id.as_str()],
            row_to_suggestion_record,
            "created suggestion",
        )
        .await
    }

    async fn list_suggestions(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<SuggestionRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {SUGGESTION_COLUMNS} FROM suggestions WHERE lead_id = ?1 \
                 ORDER BY created_at DESC, id ASC"
            ),
            params![lead_id.to_string()],
            row_to_suggestion_record,
        )
        .await
    }

    async fn resolve_suggestion(
        &self,
        id: Uuid,
        status: SuggestionStatus,
    ) -> Result<Option<SuggestionRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE suggestions SET status = ?2, resolved_at = ?3 \
                 WHERE id = ?1 AND status = 'pending'",
                params![id.to_string(), status.as_str(), now_text()],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        query_opt(
            &conn,
            &format!("SELECT {SUGGESTION_COLUMNS} FROM suggestions WHERE id = ?1"),
            params![id.to_string()],
            row_to_suggestion_record,
        )
        .await
    }
}

#[async_trait::async_trait]
impl ThreadStore for LibSqlBackend {
    async fn create_thread(
        &self,
        input: &CreateThreadParams,
    ) -> Result<EmailThreadRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO email_threads (id, lead_id, contact_id, subject) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.as_str(),
                opt_uuid(input.lead_id),
                opt_uuid(input.contact_id),
                input.subject.trim(),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {THREAD_COLUMNS} FROM email_threads WHERE id = ?1"),
            params![id.as_str()],
            row_to_thread_record,
            "created thread",
        )
        .await
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<EmailThreadRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!("SELECT {THREAD_COLUMNS} FROM email_threads WHERE id = ?1"),
            params![id.to_string()],
            row_to_thread_record,
        )
        .await
    }

    async fn list_threads(
        &self,
        lead_id: Option<Uuid>,
    ) -> Result<Vec<EmailThreadRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {THREAD_COLUMNS} FROM email_threads \
                 WHERE (?1 IS NULL OR lead_id = ?1) \
                 ORDER BY COALESCE(last_message_at, created_at) DESC, id ASC"
            ),
            params![opt_uuid(lead_id)],
            row_to_thread_record,
        )
        .await
    }

    async fn add_message(
        &self,
        thread_id: Uuid,
        input: &CreateMessageParams,
    ) -> Result<EmailMessageRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        let sent_at = now_text();
        conn.execute("BEGIN", ()).await?;
        let result = async {
            let touched = conn
                .execute(
                    "UPDATE email_threads SET last_message_at = ?2 WHERE id = ?1",
                    params![thread_id.to_string(), sent_at.as_str()],
                )
                .await?;
            if touched == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "thread".to_string(),
                    id: thread_id.to_string(),
                });
            }
            conn.execute(
                "INSERT INTO email_messages (id, thread_id, direction, sender, body, sent_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.as_str(),
                    thread_id.to_string(),
                    input.direction.as_str(),
                    input.sender.as_str(),
                    input.body.as_str(),
                    sent_at.as_str(),
                ],
            )
            .await?;
            query_one(
                &conn,
                &format!("SELECT {MESSAGE_COLUMNS} FROM email_messages WHERE id = ?1"),
                params![id.as_str()],
                row_to_message_record,
                "created message",
            )
            .await
        }
        .await;

        match result {
            Ok(record) => {
                conn.execute("COMMIT", ()).await?;
                Ok(record)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn list_messages(
        &self,
        thread_id: Uuid,
    ) -> Result<Vec<EmailMessageRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM email_messages WHERE thread_id = ?1 \
                 ORDER BY sent_at ASC, id ASC"
            ),
            params![thread_id.to_string()],
            row_to_message_record,
        )
        .await
    }
}

#[async_trait::async_trait]
impl MeetingStore for LibSqlBackend {
    async fn create_meeting(
        &self,
        input: &CreateMeetingParams,
    ) -> Result<MeetingRecord, DatabaseError> {
        if input.ends_at < input.starts_at {
            return Err(DatabaseError::Serialization(
                "meeting cannot end before it starts".to_string(),
            ));
        }
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO meetings (id, lead_id, client_id, title, starts_at, ends_at, location, notes, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.as_str(),
                opt_uuid(input.lead_id),
                opt_uuid(input.client_id),
                input.title.trim(),
                fmt_ts(&input.starts_at),
                fmt_ts(&input.ends_at),
                opt_text(input.location.as_deref()),
                opt_text(input.notes.as_deref()),
                MeetingStatus::Scheduled.as_str(),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?1"),
            params![id.as_str()],
            row_to_meeting_record,
            "created meeting",
        )
        .await
    }

    async fn get_meeting(&self, id: Uuid) -> Result<Option<MeetingRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?1"),
            params![id.to_string()],
            row_to_meeting_record,
        )
        .await
    }

    async fn list_meetings(&self) -> Result<Vec<MeetingRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!("SELECT {MEETING_COLUMNS} FROM meetings ORDER BY starts_at ASC, id ASC"),
            (),
            row_to_meeting_record,
        )
        .await
    }

    async fn cancel_meeting(&self, id: Uuid) -> Result<Option<MeetingRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE meetings SET status = ?2, updated_at = ?3 \
                 WHERE id = ?1 AND status = ?4",
                params![
                    id.to_string(),
                    MeetingStatus::Cancelled.as_str(),
                    now_text(),
                    MeetingStatus::Scheduled.as_str(),
                ],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_meeting(id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::db::{ClientStatus, MessageDirection, UserRole};
    use crate::testing::{raw_deleted_at, test_db};

    fn lead_params(name: &str) -> CreateLeadParams {
        CreateLeadParams {
            name: name.to_string(),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            phone: Some("5551234567".to_string()),
            company: Some("Acme".to_string()),
            source: Some("referral".to_string()),
            notes: None,
        }
    }

    #[tokio::test]
    async fn archive_lead_is_guarded() {
        let fixture = test_db().await;
        let lead = fixture
            .db
            .create_lead(&lead_params("Dana"))
            .await
            .expect("create lead");
        assert_eq!(lead.status, LeadStatus::New);

        assert!(fixture.db.archive_lead(lead.id).await.expect("archive"));
        let archived_at = raw_deleted_at(&fixture.db, "leads", lead.id)
            .await
            .expect("deleted_at is set");
        parse_timestamp(&archived_at).expect("timestamp");

        assert!(!fixture.db.archive_lead(lead.id).await.expect("re-archive"));
        assert_eq!(
            raw_deleted_at(&fixture.db, "leads", lead.id).await,
            Some(archived_at)
        );
        assert!(fixture.db.get_lead(lead.id).await.expect("get").is_none());
        assert!(fixture.db.list_leads(None).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn lead_score_and_status_updates_skip_archived_leads() {
        let fixture = test_db().await;
        let lead = fixture
            .db
            .create_lead(&lead_params("Ezra"))
            .await
            .expect("create lead");

        let scored = fixture
            .db
            .update_lead_score(lead.id, 82, "warm referral")
            .await
            .expect("score")
            .expect("lead is live");
        assert_eq!(scored.score, Some(82));
        assert!(scored.scored_at.is_some());

        let qualified = fixture
            .db
            .update_lead_status(lead.id, LeadStatus::Qualified)
            .await
            .expect("status")
            .expect("lead is live");
        assert_eq!(qualified.status, LeadStatus::Qualified);
        let filtered = fixture
            .db
            .list_leads(Some(LeadStatus::Qualified))
            .await
            .expect("filtered list");
        assert_eq!(filtered.len(), 1);

        fixture.db.archive_lead(lead.id).await.expect("archive");
        let missing = fixture
            .db
            .update_lead_status(lead.id, LeadStatus::Won)
            .await
            .expect("status on archived");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn clients_list_by_name_and_hide_archived() {
        let fixture = test_db().await;
        for name in ["zeta", "Alpha", "mu"] {
            fixture
                .db
                .create_client(&CreateClientParams {
                    name: name.to_string(),
                    email: None,
                    phone: None,
                    status: ClientStatus::Active,
                    notes: None,
                })
                .await
                .expect("create client");
        }
        let names: Vec<String> = fixture
            .db
            .list_clients()
            .await
            .expect("list")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "mu", "zeta"]);

        let mu = fixture.db.list_clients().await.expect("list")[1].clone();
        let updated = fixture
            .db
            .update_client(
                mu.id,
                &UpdateClientParams {
                    status: Some(ClientStatus::Inactive),
                    notes: Some(Some("paused".to_string())),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("client exists");
        assert_eq!(updated.status, ClientStatus::Inactive);
        assert_eq!(updated.notes.as_deref(), Some("paused"));
        assert_eq!(updated.name, "mu");

        assert!(fixture.db.archive_client(mu.id).await.expect("archive"));
        assert_eq!(fixture.db.list_clients().await.expect("list").len(), 2);
        assert!(
            fixture
                .db
                .update_client(mu.id, &UpdateClientParams::default())
                .await
                .expect("update archived")
                .is_none()
        );
    }

    #[tokio::test]
    async fn hour_blocks_keep_decimal_precision() {
        let fixture = test_db().await;
        let client = fixture
            .db
            .create_client(&CreateClientParams {
                name: "Acme".to_string(),
                email: None,
                phone: None,
                status: ClientStatus::Active,
                notes: None,
            })
            .await
            .expect("client");
        for (hours, day) in [(dec!(10.5), 2), (dec!(4.25), 1)] {
            fixture
                .db
                .add_hour_block(&CreateHourBlockParams {
                    client_id: client.id,
                    hours,
                    description: None,
                    purchased_on: NaiveDate::from_ymd_opt(2026, 1, day).expect("date"),
                })
                .await
                .expect("hour block");
        }
        let blocks = fixture
            .db
            .list_hour_blocks(client.id)
            .await
            .expect("list blocks");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].hours, dec!(4.25));
        assert_eq!(blocks[1].hours, dec!(10.5));
    }

    #[tokio::test]
    async fn users_are_found_by_email_case_insensitively() {
        let fixture = test_db().await;
        let user = fixture
            .db
            .create_user(&CreateUserParams {
                email: "Owner@Example.com".to_string(),
                full_name: "Owner".to_string(),
                role: UserRole::Admin,
                password_hash: "hash".to_string(),
            })
            .await
            .expect("create user");
        let found = fixture
            .db
            .get_user_by_email("owner@example.com")
            .await
            .expect("lookup")
            .expect("user exists");
        assert_eq!(found.id, user.id);
        assert_eq!(found.role, UserRole::Admin);

        let duplicate = fixture
            .db
            .create_user(&CreateUserParams {
                email: "OWNER@example.com".to_string(),
                full_name: "Clone".to_string(),
                role: UserRole::Member,
                password_hash: "hash".to_string(),
            })
            .await
            .expect_err("email is unique");
        assert!(matches!(duplicate, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn templates_soft_delete() {
        let fixture = test_db().await;
        let template = fixture
            .db
            .create_template(&CreateEmailTemplateParams {
                name: "Intro".to_string(),
                subject: "Hello {{ lead.name }}".to_string(),
                body: "Hi".to_string(),
                category: Some("outreach".to_string()),
            })
            .await
            .expect("create");
        let renamed = fixture
            .db
            .update_template(
                template.id,
                &UpdateEmailTemplateParams {
                    name: Some("Intro v2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("exists");
        assert_eq!(renamed.name, "Intro v2");
        assert_eq!(renamed.category.as_deref(), Some("outreach"));

        assert!(fixture.db.archive_template(template.id).await.expect("archive"));
        assert!(!fixture.db.archive_template(template.id).await.expect("again"));
        assert!(
            fixture
                .db
                .get_template(template.id)
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn suggestions_resolve_only_once() {
        let fixture = test_db().await;
        let lead = fixture
            .db
            .create_lead(&lead_params("Fern"))
            .await
            .expect("lead");
        let suggestion = fixture
            .db
            .create_suggestion(lead.id, SuggestionKind::Call, "Call about pricing")
            .await
            .expect("suggestion");
        assert_eq!(suggestion.status, SuggestionStatus::Pending);

        let accepted = fixture
            .db
            .resolve_suggestion(suggestion.id, SuggestionStatus::Accepted)
            .await
            .expect("resolve")
            .expect("was pending");
        assert_eq!(accepted.status, SuggestionStatus::Accepted);
        assert!(accepted.resolved_at.is_some());
        assert!(
            fixture
                .db
                .resolve_suggestion(suggestion.id, SuggestionStatus::Dismissed)
                .await
                .expect("resolve again")
                .is_none()
        );
    }

    #[tokio::test]
    async fn messages_bump_thread_activity() {
        let fixture = test_db().await;
        let thread = fixture
            .db
            .create_thread(&CreateThreadParams {
                lead_id: None,
                contact_id: None,
                subject: "Kickoff".to_string(),
            })
            .await
            .expect("thread");
        assert!(thread.last_message_at.is_none());

        let message = fixture
            .db
            .add_message(
                thread.id,
                &CreateMessageParams {
                    direction: MessageDirection::Outbound,
                    sender: "team@agency.test".to_string(),
                    body: "Welcome aboard".to_string(),
                },
            )
            .await
            .expect("message");
        let reloaded = fixture
            .db
            .get_thread(thread.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(reloaded.last_message_at, Some(message.sent_at));
        assert_eq!(
            fixture
                .db
                .list_messages(thread.id)
                .await
                .expect("messages")
                .len(),
            1
        );

        let err = fixture
            .db
            .add_message(
                Uuid::new_v4(),
                &CreateMessageParams {
                    direction: MessageDirection::Inbound,
                    sender: "x@y.z".to_string(),
                    body: "lost".to_string(),
                },
            )
            .await
            .expect_err("unknown thread");
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn meetings_cancel_once() {
        let fixture = test_db().await;
        let starts_at = Utc::now() + Duration::days(1);
        let meeting = fixture
            .db
            .create_meeting(&CreateMeetingParams {
                lead_id: None,
                client_id: None,
                title: "Discovery".to_string(),
                starts_at,
                ends_at: starts_at + Duration::minutes(30),
                location: Some("Zoom".to_string()),
                notes: None,
            })
            .await
            .expect("meeting");
        assert_eq!(meeting.status, MeetingStatus::Scheduled);
        let cancelled = fixture
            .db
            .cancel_meeting(meeting.id)
            .await
            .expect("cancel")
            .expect("was scheduled");
        assert_eq!(cancelled.status, MeetingStatus::Cancelled);
        assert!(
            fixture
                .db
                .cancel_meeting(meeting.id)
                .await
                .expect("cancel again")
                .is_none()
        );
    }
}
