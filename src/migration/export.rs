use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::{Entity, MigrationPaths, write_jsonl};
use crate::db::{ExportStore, UserRecord};
use crate::error::{DatabaseError, MigrationError};

/// Rows written per table.
#[derive(Debug, Default, Serialize)]
pub struct ExportSummary {
    pub tables: BTreeMap<&'static str, usize>,
}

impl ExportSummary {
    pub fn rows(&self, entity: Entity) -> usize {
        self.tables.get(entity.table()).copied().unwrap_or(0)
    }
}

fn to_rows<T: Serialize>(records: &[T]) -> Result<Vec<Value>, MigrationError> {
    records
        .iter()
        .map(|record| {
            serde_json::to_value(record)
                .map_err(|e| MigrationError::from(DatabaseError::Serialization(e.to_string())))
        })
        .collect()
}

/// The password hash is never serialized with the record, so it is added
/// back explicitly for the export.
fn user_rows(users: &[UserRecord]) -> Result<Vec<Value>, MigrationError> {
    let mut rows = to_rows(users)?;
    for (row, user) in rows.iter_mut().zip(users) {
        if let Value::Object(map) = row {
            map.insert(
                "password_hash".to_string(),
                Value::from(user.password_hash.as_str()),
            );
        }
    }
    Ok(rows)
}

/// Relational rows of one entity, soft-deleted ones included, in their
/// snake_case relational shape.
pub(crate) async fn export_rows(
    db: &dyn ExportStore,
    entity: Entity,
) -> Result<Vec<Value>, MigrationError> {
    match entity {
        Entity::Users => user_rows(&db.export_users().await?),
        Entity::Clients => to_rows(&db.export_clients().await?),
        Entity::Projects => to_rows(&db.export_projects().await?),
        Entity::Tasks => to_rows(&db.export_tasks().await?),
    }
}

/// Dump every migrating table to `<dir>/export/<table>.jsonl`.
pub async fn export(
    db: &dyn ExportStore,
    paths: &MigrationPaths,
) -> Result<ExportSummary, MigrationError> {
    let mut summary = ExportSummary::default();
    for entity in Entity::ALL {
        let rows = export_rows(db, entity).await?;
        let path = paths.export_file(entity);
        write_jsonl(&path, &rows).await?;
        info!(table = entity.table(), rows = rows.len(), path = %path.display(), "Exported table");
        summary.tables.insert(entity.table(), rows.len());
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CreateUserParams, UserRole, UserStore};
    use crate::testing::test_db;

    #[tokio::test]
    async fn user_export_keeps_the_password_hash() {
        let test = test_db().await;
        test.db
            .create_user(&CreateUserParams {
                email: "a@agency.test".to_string(),
                full_name: "A".to_string(),
                role: UserRole::Member,
                password_hash: "$2b$04$hash".to_string(),
            })
            .await
            .expect("user");

        let rows = export_rows(&test.db, Entity::Users).await.expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["password_hash"], "$2b$04$hash");
        assert_eq!(rows[0]["role"], "member");
        assert!(rows[0]["deleted_at"].is_null());
    }
}
