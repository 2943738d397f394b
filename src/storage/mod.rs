//! Table service access.
//!
//! The transport talks to storage only through [`TableStore`], so the REST
//! client ([`http::HttpTableStore`]) and the in-process store
//! ([`memory::MemoryTableStore`]) are interchangeable.

pub mod auth;
pub mod endpoint;
pub mod entity;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::core::models::Row;
use crate::errors::TransportError;

pub use http::HttpTableStore;
pub use memory::MemoryTableStore;

pub const PARTITION_KEY: &str = "PartitionKey";
pub const ROW_KEY: &str = "RowKey";
pub const TIMESTAMP: &str = "Timestamp";

/// A typed property value as understood by the table service.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    String(String),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

impl EntityValue {
    /// EDM type annotation the service needs to store this value with its type.
    /// `None` for types the service infers from plain JSON.
    #[must_use]
    pub fn edm_type(&self) -> Option<&'static str> {
        match self {
            EntityValue::Int64(_) => Some("Edm.Int64"),
            EntityValue::Double(_) => Some("Edm.Double"),
            EntityValue::DateTime(_) => Some("Edm.DateTime"),
            EntityValue::String(_) | EntityValue::Int32(_) | EntityValue::Bool(_) => None,
        }
    }

    /// Wire form of the value, without its annotation.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            EntityValue::String(s) => Value::String(s.clone()),
            EntityValue::Int32(n) => json!(n),
            EntityValue::Int64(n) => Value::String(n.to_string()),
            EntityValue::Double(n) => json!(n),
            EntityValue::Bool(b) => Value::Bool(*b),
            EntityValue::DateTime(dt) => {
                Value::String(dt.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
        }
    }
}

impl From<&str> for EntityValue {
    fn from(value: &str) -> Self {
        EntityValue::String(value.to_string())
    }
}

impl From<String> for EntityValue {
    fn from(value: String) -> Self {
        EntityValue::String(value)
    }
}

/// One row to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub partition_key: String,
    pub row_key: String,
    pub properties: BTreeMap<String, EntityValue>,
}

impl Entity {
    #[must_use]
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<EntityValue>) {
        self.properties.insert(name.into(), value.into());
    }

    /// JSON payload for an insert request, with `@odata.type` annotations.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut body = serde_json::Map::new();
        body.insert(PARTITION_KEY.to_string(), json!(self.partition_key));
        body.insert(ROW_KEY.to_string(), json!(self.row_key));
        for (name, value) in &self.properties {
            if let Some(edm) = value.edm_type() {
                body.insert(format!("{name}@odata.type"), json!(edm));
            }
            body.insert(name.clone(), value.to_json());
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ge,
    Lt,
}

impl FilterOp {
    fn as_odata(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ge => "ge",
            FilterOp::Lt => "lt",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    String(String),
    DateTime(DateTime<Utc>),
}

/// A single `property op value` comparison. Conditions are joined with `and`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub property: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl Condition {
    fn to_odata(&self) -> String {
        let literal = match &self.value {
            FilterValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            FilterValue::DateTime(dt) => format!(
                "datetime'{}'",
                dt.to_rfc3339_opts(SecondsFormat::Micros, true)
            ),
        };
        format!("{} {} {}", self.property, self.op.as_odata(), literal)
    }
}

/// Query against a single table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableQuery {
    pub conditions: Vec<Condition>,
    pub select: Option<Vec<String>>,
    pub top: Option<usize>,
}

impl TableQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn partition_eq(mut self, partition_key: &str) -> Self {
        self.conditions.push(Condition {
            property: PARTITION_KEY.to_string(),
            op: FilterOp::Eq,
            value: FilterValue::String(partition_key.to_string()),
        });
        self
    }

    #[must_use]
    pub fn datetime(mut self, property: &str, op: FilterOp, value: DateTime<Utc>) -> Self {
        self.conditions.push(Condition {
            property: property.to_string(),
            op,
            value: FilterValue::DateTime(value),
        });
        self
    }

    #[must_use]
    pub fn select(mut self, fields: &[String]) -> Self {
        self.select = Some(fields.to_vec());
        self
    }

    #[must_use]
    pub fn top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    /// `$filter` expression, or `None` when the query has no conditions.
    #[must_use]
    pub fn filter(&self) -> Option<String> {
        if self.conditions.is_empty() {
            return None;
        }
        Some(
            self.conditions
                .iter()
                .map(Condition::to_odata)
                .collect::<Vec<_>>()
                .join(" and "),
        )
    }
}

/// Table-service operations the transport relies on.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Creates `table` unless it already exists. Returns `true` if it was created.
    async fn create_table_if_not_exists(&self, table: &str) -> Result<bool, TransportError>;

    /// Deletes `table` if present. Returns `true` if it was deleted.
    async fn delete_table_if_exists(&self, table: &str) -> Result<bool, TransportError>;

    async fn insert_entity(&self, table: &str, entity: &Entity) -> Result<(), TransportError>;

    /// Runs `query` to completion, following continuation pages, in
    /// (partition key, row key) order.
    async fn query_entities(
        &self,
        table: &str,
        query: &TableQuery,
    ) -> Result<Vec<Row>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entity_json_annotates_typed_values() {
        let mut entity = Entity::new("pk", "rk");
        entity.insert("msg", "hello");
        entity.insert("pid", EntityValue::Int32(42));
        entity.insert("big", EntityValue::Int64(1 << 40));
        entity.insert(
            "at",
            EntityValue::DateTime(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        );

        let body = entity.to_json();
        assert_eq!(body["PartitionKey"], "pk");
        assert_eq!(body["RowKey"], "rk");
        assert_eq!(body["msg"], "hello");
        assert_eq!(body["pid"], 42);
        assert!(body.get("pid@odata.type").is_none());
        assert_eq!(body["big"], "1099511627776");
        assert_eq!(body["big@odata.type"], "Edm.Int64");
        assert_eq!(body["at"], "2024-05-01T12:00:00.000000Z");
        assert_eq!(body["at@odata.type"], "Edm.DateTime");
    }

    #[test]
    fn test_filter_escapes_quotes_and_joins_with_and() {
        let from = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let query = TableQuery::new()
            .partition_eq("o'brien")
            .datetime("createdDateTime", FilterOp::Ge, from);

        assert_eq!(
            query.filter().unwrap(),
            "PartitionKey eq 'o''brien' and createdDateTime ge datetime'2024-01-02T03:04:05.000000Z'"
        );
        assert!(TableQuery::new().filter().is_none());
    }
}
