use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    Client, ClientDetail, FlagRouted, doc_enum, doc_opt_ts, doc_required_text, doc_text, doc_ts,
    relational_id, require_name, set_change, text_value,
};
use crate::db::{ClientRecord, CreateClientParams, Database, UpdateClientParams};
use crate::docstore::{
    Document, DocumentStore, DocQuery, Fields, SortDirection, collections, now_millis,
};
use crate::error::DatabaseError;

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn list_clients(&self) -> Result<Vec<Client>, DatabaseError>;
    async fn get_client(&self, id: &str) -> Result<Option<Client>, DatabaseError>;
    /// The client with its hour blocks, which always live in the relational
    /// store.
    async fn get_client_detail(&self, id: &str) -> Result<Option<ClientDetail>, DatabaseError>;
    async fn create_client(&self, input: &CreateClientParams) -> Result<Client, DatabaseError>;
    async fn update_client(
        &self,
        id: &str,
        input: &UpdateClientParams,
    ) -> Result<Option<Client>, DatabaseError>;
    async fn archive_client(&self, id: &str) -> Result<bool, DatabaseError>;
}

// ==================== Relational ====================

pub struct RelationalClients {
    db: Arc<dyn Database>,
}

impl RelationalClients {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

fn from_record(record: ClientRecord) -> Client {
    Client {
        id: record.id.to_string(),
        name: record.name,
        email: record.email,
        phone: record.phone,
        status: record.status,
        notes: record.notes,
        deleted_at: record.deleted_at,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

#[async_trait]
impl ClientRepository for RelationalClients {
    async fn list_clients(&self) -> Result<Vec<Client>, DatabaseError> {
        Ok(self
            .db
            .list_clients()
            .await?
            .into_iter()
            .map(from_record)
            .collect())
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>, DatabaseError> {
        let Some(id) = relational_id(id) else {
            return Ok(None);
        };
        Ok(self.db.get_client(id).await?.map(from_record))
    }

    async fn get_client_detail(&self, id: &str) -> Result<Option<ClientDetail>, DatabaseError> {
        let Some(id) = relational_id(id) else {
            return Ok(None);
        };
        let Some(record) = self.db.get_client(id).await? else {
            return Ok(None);
        };
        let blocks = self.db.list_hour_blocks(id).await?;
        Ok(Some(ClientDetail::new(from_record(record), blocks)))
    }

    async fn create_client(&self, input: &CreateClientParams) -> Result<Client, DatabaseError> {
        Ok(from_record(self.db.create_client(input).await?))
    }

    async fn update_client(
        &self,
        id: &str,
        input: &UpdateClientParams,
    ) -> Result<Option<Client>, DatabaseError> {
        let Some(id) = relational_id(id) else {
            return Ok(None);
        };
        Ok(self.db.update_client(id, input).await?.map(from_record))
    }

    async fn archive_client(&self, id: &str) -> Result<bool, DatabaseError> {
        match relational_id(id) {
            Some(id) => self.db.archive_client(id).await,
            None => Ok(false),
        }
    }
}

// ==================== Document ====================

/// Clients as documents. Hour blocks stay relational and are joined through
/// the document's `supabaseId`.
pub struct DocumentClients {
    docs: Arc<dyn DocumentStore>,
    db: Arc<dyn Database>,
}

impl DocumentClients {
    pub fn new(docs: Arc<dyn DocumentStore>, db: Arc<dyn Database>) -> Self {
        Self { docs, db }
    }
}

pub(crate) fn from_document(doc: &Document) -> Result<Client, DatabaseError> {
    Ok(Client {
        id: doc.id.clone(),
        name: doc_required_text(doc, "name")?,
        email: doc_text(doc, "email"),
        phone: doc_text(doc, "phone"),
        status: doc_enum(doc, "status")?,
        notes: doc_text(doc, "notes"),
        deleted_at: doc_opt_ts(doc, "deletedAt"),
        created_at: doc_ts(doc, "createdAt"),
        updated_at: doc_ts(doc, "updatedAt"),
    })
}

#[async_trait]
impl ClientRepository for DocumentClients {
    async fn list_clients(&self) -> Result<Vec<Client>, DatabaseError> {
        let query =
            DocQuery::collection(collections::CLIENTS).order_by_text("name", SortDirection::Asc);
        self.docs.find(&query).await?.iter().map(from_document).collect()
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>, DatabaseError> {
        self.docs
            .get(collections::CLIENTS, id)
            .await?
            .as_ref()
            .map(from_document)
            .transpose()
    }

    async fn get_client_detail(&self, id: &str) -> Result<Option<ClientDetail>, DatabaseError> {
        let Some(doc) = self.docs.get(collections::CLIENTS, id).await? else {
            return Ok(None);
        };
        let client = from_document(&doc)?;
        let blocks = match doc.supabase_id().and_then(relational_id) {
            Some(relational) => self.db.list_hour_blocks(relational).await?,
            None => Vec::new(),
        };
        Ok(Some(ClientDetail::new(client, blocks)))
    }

    async fn create_client(&self, input: &CreateClientParams) -> Result<Client, DatabaseError> {
        let name = require_name(&input.name, "client name")?;
        let now = now_millis();
        let mut fields = Fields::new();
        fields.insert("name".to_string(), Value::from(name));
        fields.insert("email".to_string(), text_value(input.email.as_deref()));
        fields.insert("phone".to_string(), text_value(input.phone.as_deref()));
        fields.insert("status".to_string(), Value::from(input.status.as_str()));
        fields.insert("notes".to_string(), text_value(input.notes.as_deref()));
        fields.insert("createdAt".to_string(), Value::from(now));
        fields.insert("updatedAt".to_string(), Value::from(now));
        let doc = self.docs.insert(collections::CLIENTS, fields).await?;
        from_document(&doc)
    }

    async fn update_client(
        &self,
        id: &str,
        input: &UpdateClientParams,
    ) -> Result<Option<Client>, DatabaseError> {
        let mut fields = Fields::new();
        if let Some(name) = &input.name {
            fields.insert(
                "name".to_string(),
                Value::from(require_name(name, "client name")?),
            );
        }
        set_change(
            &mut fields,
            "email",
            input.email.as_ref().map(|v| text_value(v.as_deref())),
        );
        set_change(
            &mut fields,
            "phone",
            input.phone.as_ref().map(|v| text_value(v.as_deref())),
        );
        set_change(
            &mut fields,
            "status",
            input.status.map(|s| Value::from(s.as_str())),
        );
        set_change(
            &mut fields,
            "notes",
            input.notes.as_ref().map(|v| text_value(v.as_deref())),
        );
        self.docs
            .patch(collections::CLIENTS, id, fields)
            .await?
            .as_ref()
            .map(from_document)
            .transpose()
    }

    async fn archive_client(&self, id: &str) -> Result<bool, DatabaseError> {
        self.docs.archive(collections::CLIENTS, id).await
    }
}

// ==================== Flag-routed ====================

#[async_trait]
impl ClientRepository for FlagRouted<dyn ClientRepository> {
    async fn list_clients(&self) -> Result<Vec<Client>, DatabaseError> {
        self.active().list_clients().await
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>, DatabaseError> {
        self.active().get_client(id).await
    }

    async fn get_client_detail(&self, id: &str) -> Result<Option<ClientDetail>, DatabaseError> {
        self.active().get_client_detail(id).await
    }

    async fn create_client(&self, input: &CreateClientParams) -> Result<Client, DatabaseError> {
        self.active().create_client(input).await
    }

    async fn update_client(
        &self,
        id: &str,
        input: &UpdateClientParams,
    ) -> Result<Option<Client>, DatabaseError> {
        self.active().update_client(id, input).await
    }

    async fn archive_client(&self, id: &str) -> Result<bool, DatabaseError> {
        self.active().archive_client(id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;
    use crate::config::{Domain, FeatureFlags};
    use crate::db::{ClientStatus, ClientStore, CreateHourBlockParams, HourBlockStore};
    use crate::testing::{test_db, test_docstore};

    fn acme() -> CreateClientParams {
        CreateClientParams {
            name: "Acme".to_string(),
            email: Some("ops@acme.test".to_string()),
            phone: None,
            status: ClientStatus::Active,
            notes: None,
        }
    }

    #[tokio::test]
    async fn relational_treats_malformed_ids_as_missing() {
        let fixture = test_db().await;
        let repo = RelationalClients::new(Arc::new(fixture.db.clone()));
        assert!(repo.get_client("not-a-uuid").await.expect("get").is_none());
        assert!(
            repo.get_client_detail("k1234")
                .await
                .expect("detail")
                .is_none()
        );
        assert!(!repo.archive_client("nope").await.expect("archive"));
    }

    #[tokio::test]
    async fn both_backends_produce_the_same_shape() {
        let db = test_db().await;
        let docs = test_docstore().await;
        let relational = RelationalClients::new(Arc::new(db.db.clone()));
        let document = DocumentClients::new(Arc::new(docs.store.clone()), Arc::new(db.db.clone()));

        let a = relational.create_client(&acme()).await.expect("relational");
        let b = document.create_client(&acme()).await.expect("document");
        assert_eq!(
            (&a.name, &a.email, a.status, &a.notes),
            (&b.name, &b.email, b.status, &b.notes)
        );
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
        assert_eq!(b.id.len(), 32);
    }

    #[tokio::test]
    async fn document_detail_stitches_hour_blocks_via_supabase_id() {
        let db = test_db().await;
        let docs = test_docstore().await;
        let record = db.db.create_client(&acme()).await.expect("client");
        for hours in [dec!(10), dec!(5.5)] {
            db.db
                .add_hour_block(&CreateHourBlockParams {
                    client_id: record.id,
                    hours,
                    description: None,
                    purchased_on: NaiveDate::from_ymd_opt(2024, 3, 1).expect("date"),
                })
                .await
                .expect("block");
        }
        let fields = json!({
            "name": "Acme",
            "status": "active",
            "supabaseId": record.id.to_string(),
        });
        let doc = docs
            .store
            .insert(collections::CLIENTS, fields.as_object().cloned().unwrap_or_default())
            .await
            .expect("doc");

        let repo = DocumentClients::new(Arc::new(docs.store.clone()), Arc::new(db.db.clone()));
        let detail = repo
            .get_client_detail(&doc.id)
            .await
            .expect("detail")
            .expect("present");
        assert_eq!(detail.client.id, doc.id);
        assert_eq!(detail.hour_blocks.len(), 2);
        assert_eq!(detail.total_hours, dec!(15.5));
    }

    #[tokio::test]
    async fn document_update_clears_optional_fields_and_respects_archive() {
        let db = test_db().await;
        let docs = test_docstore().await;
        let repo = DocumentClients::new(Arc::new(docs.store.clone()), Arc::new(db.db.clone()));
        let client = repo.create_client(&acme()).await.expect("create");

        let updated = repo
            .update_client(
                &client.id,
                &UpdateClientParams {
                    email: Some(None),
                    status: Some(ClientStatus::Inactive),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("live");
        assert_eq!(updated.email, None);
        assert_eq!(updated.status, ClientStatus::Inactive);
        assert_eq!(updated.name, "Acme");

        assert!(repo.archive_client(&client.id).await.expect("archive"));
        assert!(!repo.archive_client(&client.id).await.expect("again"));
        assert!(repo.list_clients().await.expect("list").is_empty());
        let gone = repo
            .update_client(&client.id, &UpdateClientParams::default())
            .await
            .expect("update");
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn routed_repository_follows_the_clients_flag_without_fallback() {
        let db = test_db().await;
        let docs = test_docstore().await;
        let relational: Arc<dyn ClientRepository> =
            Arc::new(RelationalClients::new(Arc::new(db.db.clone())));
        let document: Arc<dyn ClientRepository> = Arc::new(DocumentClients::new(
            Arc::new(docs.store.clone()),
            Arc::new(db.db.clone()),
        ));
        let seeded = relational.create_client(&acme()).await.expect("seed");

        let routed = FlagRouted::new(
            Domain::Clients,
            Arc::new(FeatureFlags::new([Domain::Clients]).expect("flags")),
            Arc::clone(&relational),
            Arc::clone(&document),
        );
        assert!(routed.list_clients().await.expect("list").is_empty());
        assert!(routed.get_client(&seeded.id).await.expect("get").is_none());

        let legacy = FlagRouted::new(
            Domain::Clients,
            Arc::new(FeatureFlags::legacy()),
            relational,
            document,
        );
        assert_eq!(legacy.list_clients().await.expect("list").len(), 1);
    }
}
