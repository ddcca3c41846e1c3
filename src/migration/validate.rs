use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::export::export_rows;
use super::{Entity, transform_row};
use crate::db::Database;
use crate::docstore::{DELETED_AT, DocQuery, Document, DocumentStore, Fields, SUPABASE_ID};
use crate::error::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    CountMismatch,
    MissingDocument,
    FieldMismatch,
    ForeignKeyMismatch,
    RoleMismatch,
    MissingRequiredField,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParityIssue {
    pub collection: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supabase_id: Option<String>,
    pub kind: IssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionParity {
    pub collection: &'static str,
    pub relational_count: usize,
    pub document_count: usize,
}

/// Result of `migrate validate`, printed as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ParityReport {
    pub passed: bool,
    pub collections: Vec<CollectionParity>,
    pub issues: Vec<ParityIssue>,
}

impl ParityReport {
    pub fn check(&self) -> Result<(), MigrationError> {
        if self.passed {
            Ok(())
        } else {
            Err(MigrationError::ParityFailed {
                issues: self.issues.len(),
            })
        }
    }
}

/// Every document of a collection, live or deleted.
struct Snapshot {
    by_supabase_id: HashMap<String, Document>,
    supabase_by_doc_id: HashMap<String, String>,
    count: usize,
}

async fn snapshot(docs: &dyn DocumentStore, entity: Entity) -> Result<Snapshot, MigrationError> {
    let all = docs
        .find(&DocQuery::collection(entity.collection()).include_deleted())
        .await?;
    let count = all.len();
    let mut by_supabase_id = HashMap::new();
    let mut supabase_by_doc_id = HashMap::new();
    for doc in all {
        if let Some(supabase_id) = doc.supabase_id().map(str::to_string) {
            supabase_by_doc_id.insert(doc.id.clone(), supabase_id.clone());
            by_supabase_id.insert(supabase_id, doc);
        }
    }
    Ok(Snapshot {
        by_supabase_id,
        supabase_by_doc_id,
        count,
    })
}

static NULL: Value = Value::Null;

fn field<'a>(fields: &'a Fields, key: &str) -> &'a Value {
    fields.get(key).unwrap_or(&NULL)
}

struct Checker<'a> {
    entity: Entity,
    snapshots: &'a HashMap<Entity, Snapshot>,
    issues: Vec<ParityIssue>,
}

impl Checker<'_> {
    fn issue(&mut self, supabase_id: &str, kind: IssueKind, detail: String) {
        self.issues.push(ParityIssue {
            collection: self.entity.collection(),
            supabase_id: Some(supabase_id.to_string()),
            kind,
            detail,
        });
    }

    fn compare(&mut self, supabase_id: &str, expected: &Fields, doc: &Document) {
        let snapshots = self.snapshots;
        for key in self.entity.required_fields() {
            if doc.get(key).is_none() {
                self.issue(
                    supabase_id,
                    IssueKind::MissingRequiredField,
                    format!("'{key}' is missing"),
                );
            }
        }

        for key in self.entity.key_fields() {
            let (want, got) = (field(expected, key), field(&doc.fields, key));
            if want != got {
                self.issue(
                    supabase_id,
                    IssueKind::FieldMismatch,
                    format!("'{key}' is {got} in the document but {want} in the row"),
                );
            }
        }

        let row_deleted = !field(expected, DELETED_AT).is_null();
        let doc_deleted = doc.deleted_at_millis().is_some();
        if row_deleted != doc_deleted {
            self.issue(
                supabase_id,
                IssueKind::FieldMismatch,
                format!("soft delete differs (row deleted: {row_deleted}, document deleted: {doc_deleted})"),
            );
        }

        if self.entity == Entity::Users && field(expected, "role") != field(&doc.fields, "role") {
            let detail = format!(
                "role is {} in the document but {} in the row",
                field(&doc.fields, "role"),
                field(expected, "role")
            );
            self.issue(supabase_id, IssueKind::RoleMismatch, detail);
        }

        for reference in self.entity.references() {
            let want = field(expected, reference.supabase_field).as_str();
            let got = doc.get_str(reference.document_field).map(|doc_id| {
                snapshots
                    .get(&reference.target)
                    .and_then(|s| s.supabase_by_doc_id.get(doc_id))
                    .map(String::as_str)
                    .unwrap_or("<unknown document>")
            });
            if want != got {
                let detail = format!(
                    "'{}' points at {} but the row references {}",
                    reference.document_field,
                    got.unwrap_or("nothing"),
                    want.unwrap_or("nothing"),
                );
                self.issue(supabase_id, IssueKind::ForeignKeyMismatch, detail);
            }
        }
    }
}

/// Compare the relational store with the document store for every migrating
/// domain. Issues are collected, not raised; use [`ParityReport::check`] to
/// turn a failed report into an error.
pub async fn validate(
    db: &dyn Database,
    docs: &dyn DocumentStore,
) -> Result<ParityReport, MigrationError> {
    let mut snapshots = HashMap::new();
    for entity in Entity::ALL {
        snapshots.insert(entity, snapshot(docs, entity).await?);
    }

    let mut collections = Vec::new();
    let mut issues = Vec::new();
    for entity in Entity::ALL {
        let rows = export_rows(db, entity).await?;
        let mut checker = Checker {
            entity,
            snapshots: &snapshots,
            issues: Vec::new(),
        };
        let Some(snapshot) = snapshots.get(&entity) else {
            continue;
        };

        let relational_count = rows.len();
        if relational_count != snapshot.count {
            checker.issues.push(ParityIssue {
                collection: entity.collection(),
                supabase_id: None,
                kind: IssueKind::CountMismatch,
                detail: format!(
                    "{relational_count} rows but {} documents",
                    snapshot.count
                ),
            });
        }

        for row in rows {
            let Value::Object(row) = row else { continue };
            let expected = match transform_row(entity, row) {
                Ok(expected) => expected,
                Err(message) => {
                    checker.issues.push(ParityIssue {
                        collection: entity.collection(),
                        supabase_id: None,
                        kind: IssueKind::FieldMismatch,
                        detail: message,
                    });
                    continue;
                }
            };
            let supabase_id = field(&expected, SUPABASE_ID)
                .as_str()
                .unwrap_or_default()
                .to_string();
            match snapshot.by_supabase_id.get(&supabase_id) {
                Some(doc) => checker.compare(&supabase_id, &expected, doc),
                None => checker.issue(
                    &supabase_id,
                    IssueKind::MissingDocument,
                    "no document carries this supabaseId".to_string(),
                ),
            }
        }

        collections.push(CollectionParity {
            collection: entity.collection(),
            relational_count,
            document_count: snapshot.count,
        });
        issues.append(&mut checker.issues);
    }

    let passed = issues.is_empty();
    if passed {
        info!("Parity validation passed");
    } else {
        warn!(issues = issues.len(), "Parity validation found issues");
    }
    Ok(ParityReport {
        passed,
        collections,
        issues,
    })
}
