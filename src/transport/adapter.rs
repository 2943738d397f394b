use tracing::{debug, info, warn};

use super::row_key::RowKeyGenerator;
use crate::core::config::TransportConfig;
use crate::core::models::{LogRecord, Metadata, QueryOptions, QueryOrder, Row};
use crate::errors::TransportError;
use crate::storage::entity::{CREATED_COLUMN, encode_record, project};
use crate::storage::{FilterOp, HttpTableStore, TableQuery, TableStore};

/// Writes log records to one table partition and reads them back.
///
/// A value of this type only exists once its table has been ensured, so
/// every method can assume the table is there.
#[derive(Debug)]
pub struct TableTransport<S = HttpTableStore> {
    store: S,
    table_name: String,
    partition_key: String,
    nested_meta: bool,
    silent: bool,
    row_keys: RowKeyGenerator,
}

impl TableTransport<HttpTableStore> {
    /// Validates `config`, then creates the table over HTTP if it is missing.
    ///
    /// # Errors
    ///
    /// Returns a config error before any request when credentials are missing,
    /// or the service error if the table cannot be created.
    pub async fn connect(config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let store = HttpTableStore::from_config(&config)?;
        Self::with_store(config, store).await
    }
}

impl<S: TableStore> TableTransport<S> {
    /// # Errors
    ///
    /// Returns a config error if `config` is invalid, or the store's error if
    /// the table cannot be created.
    pub async fn with_store(config: TransportConfig, store: S) -> Result<Self, TransportError> {
        config.validate()?;

        let created = store
            .create_table_if_not_exists(&config.table_name)
            .await
            .inspect_err(|e| warn!("Failed to ensure table {}: {}", config.table_name, e))?;
        if created {
            info!("Created log table {}", config.table_name);
        }
        debug!(
            "Transport ready: table={} partition={} nested_meta={}",
            config.table_name, config.partition_key, config.nested_meta
        );

        Ok(Self {
            store,
            table_name: config.table_name,
            partition_key: config.partition_key,
            nested_meta: config.nested_meta,
            silent: config.silent,
            row_keys: RowKeyGenerator::new(),
        })
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Writes one row for the call and returns its row key.
    ///
    /// Returns `Ok(None)` without writing when the transport is silent.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the row could not be written.
    pub async fn log(
        &self,
        level: &str,
        message: &str,
        metadata: Option<Metadata>,
    ) -> Result<Option<String>, TransportError> {
        let record = LogRecord::new(level, message, metadata.unwrap_or_default());
        self.log_record(&record).await
    }

    /// Like [`Self::log`], for a record captured elsewhere.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the row could not be written.
    pub async fn log_record(&self, record: &LogRecord) -> Result<Option<String>, TransportError> {
        if self.silent {
            return Ok(None);
        }

        let row_key = self.row_keys.next_key();
        let entity = encode_record(record, &self.partition_key, &row_key, self.nested_meta)?;
        self.store
            .insert_entity(&self.table_name, &entity)
            .await
            .inspect_err(|e| warn!("Failed to write log row to {}: {}", self.table_name, e))?;

        Ok(Some(row_key))
    }

    /// Reads rows from this transport's partition, oldest first unless
    /// `options.order` says otherwise.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the query fails.
    pub async fn query(&self, options: &QueryOptions) -> Result<Vec<Row>, TransportError> {
        let mut query = TableQuery::new().partition_eq(&self.partition_key);
        if let Some(from) = options.from {
            query = query.datetime(CREATED_COLUMN, FilterOp::Ge, from);
        }
        if let Some(until) = options.until {
            query = query.datetime(CREATED_COLUMN, FilterOp::Lt, until);
        }
        let fields = options.projection();
        if let Some(fields) = fields {
            query = query.select(fields);
        }
        // Newest-first needs the whole partition before the limit applies.
        if let (Some(limit), QueryOrder::Asc) = (options.limit, options.order) {
            query = query.top(limit);
        }

        let mut rows = self
            .store
            .query_entities(&self.table_name, &query)
            .await
            .inspect_err(|e| warn!("Failed to query {}: {}", self.table_name, e))?;

        if options.order == QueryOrder::Desc {
            rows.reverse();
        }
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }

        Ok(rows.into_iter().map(|row| project(row, fields)).collect())
    }
}
