use std::collections::BTreeMap;

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::{Entity, MigrationPaths, read_jsonl, write_jsonl};
use crate::docstore::{Fields, SUPABASE_ID};
use crate::error::MigrationError;

/// Documents written per collection.
#[derive(Debug, Default, Serialize)]
pub struct TransformSummary {
    pub collections: BTreeMap<&'static str, usize>,
}

/// `due_on` -> `dueOn`.
pub fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for c in snake.chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn timestamp_millis(key: &str, value: Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|ts| Value::from(ts.timestamp_millis()))
            .map_err(|e| format!("invalid timestamp in {key} '{raw}': {e}")),
        Value::Number(n) => Ok(Value::Number(n)),
        other => Err(format!("invalid timestamp in {key}: {other}")),
    }
}

/// Reshape one exported row into its document body.
///
/// `id` becomes `supabaseId`, foreign keys become `<entity>SupabaseId`,
/// `*_at` timestamps become epoch millis and every other field is renamed to
/// camelCase unchanged.
pub fn transform_row(entity: Entity, row: Fields) -> Result<Fields, String> {
    let mut out = Fields::new();
    for (key, value) in row {
        if key == "id" {
            match value {
                Value::String(id) if !id.is_empty() => {
                    out.insert(SUPABASE_ID.to_string(), Value::String(id));
                }
                _ => return Err("row has no id".to_string()),
            }
        } else if let Some(reference) = entity.references().iter().find(|r| r.column == key) {
            out.insert(reference.supabase_field.to_string(), value);
        } else if key.ends_with("_at") {
            let converted = timestamp_millis(&key, value)?;
            out.insert(camel_case(&key), converted);
        } else {
            out.insert(camel_case(&key), value);
        }
    }
    if !out.contains_key(SUPABASE_ID) {
        return Err("row has no id".to_string());
    }
    Ok(out)
}

/// Rewrite every export file into `<dir>/transformed/<collection>.jsonl`.
pub async fn transform(paths: &MigrationPaths) -> Result<TransformSummary, MigrationError> {
    let mut summary = TransformSummary::default();
    for entity in Entity::ALL {
        let source = paths.export_file(entity);
        let mut documents = Vec::new();
        for row in read_jsonl(&source).await? {
            let fields = transform_row(entity, row.fields).map_err(|message| {
                MigrationError::Malformed {
                    file: source.display().to_string(),
                    line: row.line,
                    message,
                }
            })?;
            documents.push(Value::Object(fields));
        }
        let target = paths.transformed_file(entity);
        write_jsonl(&target, &documents).await?;
        info!(collection = entity.collection(), documents = documents.len(), "Transformed table");
        summary.collections.insert(entity.collection(), documents.len());
    }
    Ok(summary)
}
