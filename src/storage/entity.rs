//! Shaping between log records, stored entities and decoded rows.

use serde_json::Value;

use super::{Entity, EntityValue};
use crate::core::models::{LogRecord, Metadata, Row};
use crate::errors::TransportError;

pub const LEVEL_COLUMN: &str = "level";
pub const MESSAGE_COLUMN: &str = "msg";
pub const HOSTNAME_COLUMN: &str = "hostname";
pub const PID_COLUMN: &str = "pid";
pub const CREATED_COLUMN: &str = "createdDateTime";
pub const META_COLUMN: &str = "meta";

const ODATA_TYPE_SUFFIX: &str = "@odata.type";

/// Builds the entity written for `record`.
///
/// With `nested_meta` the metadata is stored as JSON text in the `meta`
/// column; otherwise each entry becomes its own `<key>_` column.
///
/// # Errors
///
/// Returns a serialization error if the metadata cannot be encoded.
pub fn encode_record(
    record: &LogRecord,
    partition_key: &str,
    row_key: &str,
    nested_meta: bool,
) -> Result<Entity, TransportError> {
    let mut entity = Entity::new(partition_key, row_key);
    entity.insert(LEVEL_COLUMN, record.level.as_str());
    entity.insert(MESSAGE_COLUMN, record.message.as_str());
    entity.insert(HOSTNAME_COLUMN, record.hostname.as_str());
    entity.insert(
        PID_COLUMN,
        i32::try_from(record.pid)
            .map_or(EntityValue::Int64(i64::from(record.pid)), EntityValue::Int32),
    );
    entity.insert(CREATED_COLUMN, EntityValue::DateTime(record.timestamp));

    if nested_meta {
        entity.insert(META_COLUMN, serde_json::to_string(&record.metadata)?);
    } else {
        for (key, value) in &record.metadata {
            if let Some(value) = flatten_value(value) {
                let column = free_column(&entity, key);
                entity.insert(column, value);
            }
        }
    }

    Ok(entity)
}

/// Column name for a flattened metadata key.
///
/// Characters the service does not accept in property names become `_`,
/// and the trailing `_` keeps metadata clear of the fixed columns.
#[must_use]
pub fn metadata_column(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name.push('_');
    name
}

/// [`metadata_column`] for `key`, numbered `<key>_2_`, `<key>_3_`, ... when
/// another key already maps to the same column.
fn free_column(entity: &Entity, key: &str) -> String {
    let column = metadata_column(key);
    if !entity.properties.contains_key(&column) {
        return column;
    }
    let stem = &column[..column.len() - 1];
    let mut n = 2;
    loop {
        let candidate = format!("{stem}_{n}_");
        if !entity.properties.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn flatten_value(value: &Value) -> Option<EntityValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(EntityValue::Bool(*b)),
        Value::String(s) => Some(EntityValue::String(s.clone())),
        Value::Number(n) => Some(if let Some(i) = n.as_i64() {
            i32::try_from(i).map_or(EntityValue::Int64(i), EntityValue::Int32)
        } else if n.is_u64() {
            // Above i64::MAX; a double would lose digits.
            EntityValue::String(n.to_string())
        } else if let Some(f) = n.as_f64() {
            EntityValue::Double(f)
        } else {
            EntityValue::String(n.to_string())
        }),
        Value::Array(_) | Value::Object(_) => Some(EntityValue::String(value.to_string())),
    }
}

/// Decodes one entity object from a service response into a plain row.
///
/// OData bookkeeping keys are dropped and `Edm.Int64` strings become numbers.
#[must_use]
pub fn decode_properties(raw: &serde_json::Map<String, Value>) -> Row {
    let mut row = Row::new();
    for (name, value) in raw {
        if name.starts_with("odata.") || name.ends_with(ODATA_TYPE_SUFFIX) {
            continue;
        }
        let edm = raw
            .get(&format!("{name}{ODATA_TYPE_SUFFIX}"))
            .and_then(Value::as_str);
        let decoded = match (edm, value) {
            (Some("Edm.Int64"), Value::String(s)) => s
                .parse::<i64>()
                .map_or_else(|_| value.clone(), Value::from),
            _ => value.clone(),
        };
        row.insert(name.clone(), decoded);
    }
    row
}

/// Restricts `row` to `fields`. `None` keeps every column.
#[must_use]
pub fn project(row: Row, fields: Option<&[String]>) -> Row {
    match fields {
        None => row,
        Some(fields) => row
            .into_iter()
            .filter(|(name, _)| fields.iter().any(|f| f == name))
            .collect(),
    }
}

/// Parses the `meta` column written in nested-metadata mode.
///
/// # Errors
///
/// Returns a serialization error if the column holds invalid JSON.
pub fn decode_meta(row: &Row) -> Result<Option<Metadata>, TransportError> {
    match row.get(META_COLUMN) {
        Some(Value::String(text)) => Ok(Some(serde_json::from_str(text)?)),
        Some(other) => Err(TransportError::Serialization(format!(
            "meta column is not text: {other}"
        ))),
        None => Ok(None),
    }
}
