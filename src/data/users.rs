use std::sync::Arc;

use async_trait::async_trait;

use super::{AppUser, FlagRouted, doc_enum, doc_required_text, relational_id};
use crate::db::{Database, UserRecord};
use crate::docstore::{Document, DocumentStore, DocQuery, collections};
use crate::error::DatabaseError;

/// Lookup side of authentication.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<AppUser>, DatabaseError>;
    /// Case-insensitive match on a live user's email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<AppUser>, DatabaseError>;
}

pub struct RelationalUsers {
    db: Arc<dyn Database>,
}

impl RelationalUsers {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

fn from_record(record: UserRecord) -> AppUser {
    AppUser {
        id: record.id.to_string(),
        email: record.email,
        full_name: record.full_name,
        role: record.role,
        password_hash: record.password_hash,
    }
}

#[async_trait]
impl UserDirectory for RelationalUsers {
    async fn get_user(&self, id: &str) -> Result<Option<AppUser>, DatabaseError> {
        let Some(id) = relational_id(id) else {
            return Ok(None);
        };
        Ok(self.db.get_user(id).await?.map(from_record))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<AppUser>, DatabaseError> {
        Ok(self.db.get_user_by_email(email).await?.map(from_record))
    }
}

pub struct DocumentUsers {
    docs: Arc<dyn DocumentStore>,
}

impl DocumentUsers {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }
}

pub(crate) fn from_document(doc: &Document) -> Result<AppUser, DatabaseError> {
    Ok(AppUser {
        id: doc.id.clone(),
        email: doc_required_text(doc, "email")?,
        full_name: doc_required_text(doc, "fullName")?,
        role: doc_enum(doc, "role")?,
        password_hash: doc_required_text(doc, "passwordHash")?,
    })
}

#[async_trait]
impl UserDirectory for DocumentUsers {
    async fn get_user(&self, id: &str) -> Result<Option<AppUser>, DatabaseError> {
        self.docs
            .get(collections::USERS, id)
            .await?
            .as_ref()
            .map(from_document)
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<AppUser>, DatabaseError> {
        let query = DocQuery::collection(collections::USERS).eq_ignore_case("email", email.trim());
        self.docs
            .find_one(&query)
            .await?
            .as_ref()
            .map(from_document)
            .transpose()
    }
}

#[async_trait]
impl UserDirectory for FlagRouted<dyn UserDirectory> {
    async fn get_user(&self, id: &str) -> Result<Option<AppUser>, DatabaseError> {
        self.active().get_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<AppUser>, DatabaseError> {
        self.active().find_user_by_email(email).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::{CreateUserParams, UserRole, UserStore};
    use crate::testing::{test_db, test_docstore};

    #[tokio::test]
    async fn relational_directory_finds_users_case_insensitively() {
        let fixture = test_db().await;
        fixture
            .db
            .create_user(&CreateUserParams {
                email: "Owner@Agency.test".to_string(),
                full_name: "Owner".to_string(),
                role: UserRole::Admin,
                password_hash: "$2b$04$hash".to_string(),
            })
            .await
            .expect("user");
        let directory = RelationalUsers::new(Arc::new(fixture.db.clone()));
        let user = directory
            .find_user_by_email("owner@agency.test")
            .await
            .expect("find")
            .expect("present");
        assert!(user.is_admin());
        assert!(directory.get_user("not-a-uuid").await.expect("get").is_none());
        let by_id = directory.get_user(&user.id).await.expect("get");
        assert_eq!(by_id.map(|u| u.email), Some("Owner@Agency.test".to_string()));
    }

    #[tokio::test]
    async fn document_directory_skips_archived_users() {
        let docs = test_docstore().await;
        let doc = docs
            .store
            .insert(
                collections::USERS,
                json!({
                    "email": "member@agency.test",
                    "fullName": "Member",
                    "role": "member",
                    "passwordHash": "$2b$04$hash",
                })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            )
            .await
            .expect("insert");
        let directory = DocumentUsers::new(Arc::new(docs.store.clone()));

        let user = directory
            .find_user_by_email("MEMBER@agency.test")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(user.id, doc.id);
        assert_eq!(user.role, UserRole::Member);

        docs.store.archive(collections::USERS, &doc.id).await.expect("archive");
        assert!(directory.get_user(&doc.id).await.expect("get").is_none());
        assert!(
            directory
                .find_user_by_email("member@agency.test")
                .await
                .expect("find")
                .is_none()
        );
    }
}
