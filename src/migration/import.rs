use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{Entity, MigrationPaths, read_jsonl};
use crate::docstore::{DocQuery, DocumentStore, Fields, SUPABASE_ID};
use crate::error::MigrationError;

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Maps relational UUIDs to document ids, filled while importing and
/// backed by a lookup for documents from earlier runs.
struct IdResolver<'a> {
    docs: &'a dyn DocumentStore,
    known: HashMap<(Entity, String), String>,
}

impl<'a> IdResolver<'a> {
    fn new(docs: &'a dyn DocumentStore) -> Self {
        Self {
            docs,
            known: HashMap::new(),
        }
    }

    async fn resolve(
        &mut self,
        entity: Entity,
        supabase_id: &str,
    ) -> Result<Option<String>, MigrationError> {
        if let Some(id) = self.known.get(&(entity, supabase_id.to_string())) {
            return Ok(Some(id.clone()));
        }
        let query = DocQuery::collection(entity.collection())
            .eq(SUPABASE_ID, supabase_id)
            .include_deleted();
        let found = self.docs.find_one(&query).await?.map(|doc| doc.id);
        if let Some(id) = &found {
            self.remember(entity, supabase_id, id);
        }
        Ok(found)
    }

    fn remember(&mut self, entity: Entity, supabase_id: &str, doc_id: &str) {
        self.known
            .insert((entity, supabase_id.to_string()), doc_id.to_string());
    }
}

/// Replace each `<entity>SupabaseId` with the document id of its target.
async fn resolve_references(
    entity: Entity,
    supabase_id: &str,
    fields: &mut Fields,
    resolver: &mut IdResolver<'_>,
) -> Result<(), MigrationError> {
    for reference in entity.references() {
        let target = match fields.get(reference.supabase_field) {
            Some(Value::String(raw)) => raw.clone(),
            _ => {
                fields.insert(reference.document_field.to_string(), Value::Null);
                continue;
            }
        };
        let doc_id = resolver
            .resolve(reference.target, &target)
            .await?
            .ok_or_else(|| MigrationError::DanglingReference {
                collection: entity.collection().to_string(),
                supabase_id: supabase_id.to_string(),
                target: reference.target.collection().to_string(),
                reference: target.clone(),
            })?;
        fields.insert(reference.document_field.to_string(), Value::String(doc_id));
    }
    Ok(())
}

/// Upsert every transformed document by `supabaseId`, users first and tasks
/// last. Running it again updates the same documents in place.
pub async fn import(
    docs: &dyn DocumentStore,
    paths: &MigrationPaths,
) -> Result<ImportSummary, MigrationError> {
    let mut summary = ImportSummary::default();
    let mut resolver = IdResolver::new(docs);

    for entity in Entity::ALL {
        let source = paths.transformed_file(entity);
        let rows = read_jsonl(&source).await?;
        let (mut inserted, mut updated) = (0, 0);
        for row in rows {
            let mut fields = row.fields;
            let Some(supabase_id) = fields
                .get(SUPABASE_ID)
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                return Err(MigrationError::Malformed {
                    file: source.display().to_string(),
                    line: row.line,
                    message: format!("document has no {SUPABASE_ID}"),
                });
            };
            resolve_references(entity, &supabase_id, &mut fields, &mut resolver).await?;

            match resolver.resolve(entity, &supabase_id).await? {
                Some(doc_id) => {
                    docs.replace(entity.collection(), &doc_id, fields).await?;
                    debug!(collection = entity.collection(), %supabase_id, %doc_id, "Updated document");
                    updated += 1;
                }
                None => {
                    let doc = docs.insert(entity.collection(), fields).await?;
                    resolver.remember(entity, &supabase_id, &doc.id);
                    inserted += 1;
                }
            }
        }
        info!(collection = entity.collection(), inserted, updated, "Imported collection");
        summary.inserted += inserted;
        summary.updated += updated;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::migration::write_jsonl;
    use crate::testing::test_docstore;

    async fn write_collections(paths: &MigrationPaths, projects: Vec<Value>) {
        for entity in [Entity::Users, Entity::Clients, Entity::Tasks] {
            write_jsonl(&paths.transformed_file(entity), &[])
                .await
                .expect("write");
        }
        write_jsonl(&paths.transformed_file(Entity::Projects), &projects)
            .await
            .expect("write");
    }

    #[tokio::test]
    async fn dangling_references_abort_the_import() {
        let docs = test_docstore().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = MigrationPaths::new(dir.path());
        write_collections(
            &paths,
            vec![json!({
                "supabaseId": "p-1",
                "clientSupabaseId": "missing-client",
                "name": "Website",
                "status": "active",
            })],
        )
        .await;

        match import(&docs.store, &paths).await {
            Err(MigrationError::DanglingReference {
                collection,
                reference,
                ..
            }) => {
                assert_eq!(collection, "projects");
                assert_eq!(reference, "missing-client");
            }
            other => panic!("expected dangling reference, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn documents_without_supabase_id_are_malformed() {
        let docs = test_docstore().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = MigrationPaths::new(dir.path());
        write_collections(&paths, vec![json!({"name": "Orphan"})]).await;

        assert!(matches!(
            import(&docs.store, &paths).await,
            Err(MigrationError::Malformed { line: 1, .. })
        ));
    }
}
