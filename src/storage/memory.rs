//! In-process [`TableStore`] for tests and local runs without a storage emulator.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::entity::{decode_properties, project};
use super::{Condition, Entity, FilterOp, FilterValue, TIMESTAMP, TableQuery, TableStore};
use crate::core::models::Row;
use crate::errors::TransportError;

type Table = BTreeMap<(String, String), Row>;

/// Tables held in memory. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableStore {
    tables: Arc<Mutex<HashMap<String, Table>>>,
}

impl MemoryTableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Table>>, TransportError> {
        self.tables
            .lock()
            .map_err(|_| TransportError::Closed("memory table store lock poisoned".to_string()))
    }

    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.lock().is_ok_and(|tables| tables.contains_key(table))
    }

    /// Names of all tables, sorted.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of rows in `table`, or `None` if it does not exist.
    #[must_use]
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.lock().ok()?.get(table).map(BTreeMap::len)
    }
}

fn table_not_found(table: &str) -> TransportError {
    TransportError::Service {
        status: 404,
        code: "TableNotFound".to_string(),
        message: format!("The table {table} does not exist."),
    }
}

fn matches(row: &Row, condition: &Condition) -> bool {
    let Some(actual) = row.get(&condition.property) else {
        return false;
    };
    match &condition.value {
        FilterValue::String(expected) => match (condition.op, actual.as_str()) {
            (FilterOp::Eq, Some(actual)) => actual == expected,
            (FilterOp::Ge, Some(actual)) => actual >= expected.as_str(),
            (FilterOp::Lt, Some(actual)) => actual < expected.as_str(),
            (_, None) => false,
        },
        FilterValue::DateTime(expected) => {
            let Some(actual) = actual
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
            else {
                return false;
            };
            match condition.op {
                FilterOp::Eq => actual == *expected,
                FilterOp::Ge => actual >= *expected,
                FilterOp::Lt => actual < *expected,
            }
        }
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn create_table_if_not_exists(&self, table: &str) -> Result<bool, TransportError> {
        let mut tables = self.lock()?;
        if tables.contains_key(table) {
            return Ok(false);
        }
        tables.insert(table.to_string(), Table::new());
        Ok(true)
    }

    async fn delete_table_if_exists(&self, table: &str) -> Result<bool, TransportError> {
        Ok(self.lock()?.remove(table).is_some())
    }

    async fn insert_entity(&self, table: &str, entity: &Entity) -> Result<(), TransportError> {
        let mut tables = self.lock()?;
        let rows = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;

        let key = (entity.partition_key.clone(), entity.row_key.clone());
        if rows.contains_key(&key) {
            return Err(TransportError::Service {
                status: 409,
                code: "EntityAlreadyExists".to_string(),
                message: "The specified entity already exists.".to_string(),
            });
        }

        let Value::Object(body) = entity.to_json() else {
            return Err(TransportError::Serialization(
                "entity did not encode to an object".to_string(),
            ));
        };
        let mut row = decode_properties(&body);
        row.insert(
            TIMESTAMP.to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        rows.insert(key, row);
        Ok(())
    }

    async fn query_entities(
        &self,
        table: &str,
        query: &TableQuery,
    ) -> Result<Vec<Row>, TransportError> {
        let tables = self.lock()?;
        let rows = tables.get(table).ok_or_else(|| table_not_found(table))?;
        let select = query.select.as_deref().filter(|s| !s.is_empty());

        Ok(rows
            .values()
            .filter(|row| query.conditions.iter().all(|c| matches(row, c)))
            .take(query.top.unwrap_or(usize::MAX))
            .map(|row| project(row.clone(), select))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EntityValue;
    use chrono::TimeZone;

    fn entity(pk: &str, rk: &str, created: DateTime<Utc>) -> Entity {
        let mut entity = Entity::new(pk, rk);
        entity.insert("msg", format!("{pk}/{rk}"));
        entity.insert("createdDateTime", EntityValue::DateTime(created));
        entity
    }

    #[tokio::test]
    async fn test_create_table_is_idempotent() {
        let store = MemoryTableStore::new();
        assert!(store.create_table_if_not_exists("logs").await.unwrap());
        assert!(!store.create_table_if_not_exists("logs").await.unwrap());
        assert_eq!(store.table_names(), vec!["logs".to_string()]);

        assert!(store.delete_table_if_exists("logs").await.unwrap());
        assert!(!store.delete_table_if_exists("logs").await.unwrap());
        assert!(!store.has_table("logs"));
    }

    #[tokio::test]
    async fn test_insert_requires_table_and_unique_key() {
        let store = MemoryTableStore::new();
        let now = Utc::now();
        let err = store
            .insert_entity("logs", &entity("a", "1", now))
            .await
            .unwrap_err();
        assert_eq!(err.service_code(), Some("TableNotFound"));

        store.create_table_if_not_exists("logs").await.unwrap();
        store.insert_entity("logs", &entity("a", "1", now)).await.unwrap();
        let err = store
            .insert_entity("logs", &entity("a", "1", now))
            .await
            .unwrap_err();
        assert_eq!(err.service_code(), Some("EntityAlreadyExists"));
        assert_eq!(store.row_count("logs"), Some(1));
    }

    #[tokio::test]
    async fn test_query_filters_selects_and_orders_by_keys() {
        let store = MemoryTableStore::new();
        store.create_table_if_not_exists("logs").await.unwrap();
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        store.insert_entity("logs", &entity("a", "2", late)).await.unwrap();
        store.insert_entity("logs", &entity("a", "1", early)).await.unwrap();
        store.insert_entity("logs", &entity("b", "1", late)).await.unwrap();

        let rows = store
            .query_entities("logs", &TableQuery::new().partition_eq("a"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["RowKey"], "1");
        assert_eq!(rows[1]["RowKey"], "2");
        assert!(rows[0].contains_key("Timestamp"));

        let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let rows = store
            .query_entities(
                "logs",
                &TableQuery::new()
                    .partition_eq("a")
                    .datetime("createdDateTime", FilterOp::Ge, since)
                    .select(&["msg".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 1);
        assert_eq!(rows[0]["msg"], "a/2");

        let rows = store
            .query_entities("logs", &TableQuery::new().top(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
