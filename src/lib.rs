/// tablelog - a log transport that stores records in a cloud table service.
///
/// Each log call becomes one row in a table partition; rows can be read back
/// with optional field projection.
///
/// # Architecture
///
/// - [`TableTransport`] ensures the table exists, writes records and queries them
/// - [`storage::TableStore`] is the seam to the table service, implemented by the
///   REST client ([`storage::HttpTableStore`]) and an in-memory store
/// - [`TableLayer`] plugs the transport into `tracing` as a subscriber layer
///
/// # Example
///
/// ```no_run
/// use tablelog::{QueryOptions, TableTransport, TransportConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     tablelog::setup_logging();
///
///     let config = TransportConfig::for_account("myaccount", "bXlrZXk=")
///         .with_table_name("applogs")
///         .with_partition_key("production");
///
///     // Resolves once the table exists
///     let transport = TableTransport::connect(config).await?;
///
///     let mut meta = serde_json::Map::new();
///     meta.insert("user".into(), "u-42".into());
///     transport.log("info", "user signed in", Some(meta)).await?;
///
///     let rows = transport.query(&QueryOptions::with_fields(["msg"])).await?;
///     for row in rows {
///         println!("{}", serde_json::Value::Object(row));
///     }
///     Ok(())
/// }
/// ```
pub mod core;
pub mod errors;
pub mod storage;
pub mod transport;

pub use crate::core::config::TransportConfig;
pub use crate::core::models::{LogLevel, LogRecord, Metadata, QueryOptions, QueryOrder, Row};
pub use crate::errors::TransportError;
pub use crate::transport::{TableLayer, TableLayerHandle, TableTransport};

/// Configure structured JSON logging for the process.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Calling this more
/// than once leaves the first subscriber in place.
///
/// # Example
///
/// ```
/// tablelog::setup_logging();
/// ```
pub fn setup_logging() {
    use tracing_subscriber::prelude::*;
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init();
}

/// Like [`setup_logging`], additionally forwarding events to a table.
///
/// The table layer applies its own level threshold and is not affected by
/// `RUST_LOG`.
pub fn setup_logging_with_table(table_layer: TableLayer) {
    use tracing_subscriber::prelude::*;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_filter(env_filter());

    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(table_layer)
        .try_init();
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}
