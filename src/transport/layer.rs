//! `tracing` integration.
//!
//! [`TableLayer`] turns tracing events into [`LogRecord`]s and hands them to
//! a background task that owns the [`TableTransport`]. The task ensures the
//! table before writing anything, so events emitted while the table is still
//! being created wait in the channel and are written once it is ready.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use super::adapter::TableTransport;
use crate::core::config::TransportConfig;
use crate::core::models::{LogLevel, LogRecord, Metadata};
use crate::errors::TransportError;
use crate::storage::{HttpTableStore, TableStore};

/// Events from these targets are never forwarded; writing them would feed
/// the transport's own diagnostics back into the table.
const IGNORED_TARGETS: &[&str] = &["tablelog", "reqwest", "hyper", "h2", "rustls"];

const TARGET_FIELD: &str = "target";

enum Command {
    Append(LogRecord),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Counts kept by the background writer.
#[derive(Debug, Default)]
struct Counters {
    written: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WriterStats {
        WriterStats {
            written: self.written.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterStats {
    pub written: u64,
    /// Records accepted but not written because the transport is silent.
    pub skipped: u64,
    pub failed: u64,
}

/// A [`Layer`] that forwards events at or above its level to a table.
pub struct TableLayer {
    sender: mpsc::UnboundedSender<Command>,
    level: LogLevel,
}

/// Controls the background writer behind a [`TableLayer`].
pub struct TableLayerHandle {
    sender: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl TableLayer {
    /// Builds a layer writing through the table service REST API.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a config error immediately if `config` is invalid.
    pub fn connect(
        config: TransportConfig,
    ) -> Result<(TableLayer, TableLayerHandle), TransportError> {
        config.validate()?;
        let store = HttpTableStore::from_config(&config)?;
        Self::with_store(config, store)
    }

    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a config error immediately if `config` is invalid.
    pub fn with_store<S>(
        config: TransportConfig,
        store: S,
    ) -> Result<(TableLayer, TableLayerHandle), TransportError>
    where
        S: TableStore + 'static,
    {
        config.validate()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let level = config.level;
        let worker = tokio::spawn(run_writer(config, store, receiver, Arc::clone(&counters)));

        Ok((
            TableLayer {
                sender: sender.clone(),
                level,
            },
            TableLayerHandle {
                sender,
                worker,
                counters,
            },
        ))
    }
}

impl<S: Subscriber> Layer<S> for TableLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let root = meta.target().split("::").next().unwrap_or_default();
        if IGNORED_TARGETS.iter().any(|t| *t == root) {
            return;
        }
        let level = LogLevel::from(*meta.level());
        if level > self.level {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        visitor
            .fields
            .insert(TARGET_FIELD.to_string(), Value::String(meta.target().to_string()));

        let record = LogRecord::new(
            level.as_str(),
            visitor.message.unwrap_or_default(),
            visitor.fields,
        );
        // The writer is gone after shutdown; later events are dropped.
        let _ = self.sender.send(Command::Append(record));
    }
}

impl TableLayerHandle {
    /// Waits until every event sent before this call has been handled.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the writer has already stopped.
    pub async fn flush(&self) -> Result<(), TransportError> {
        let (ack, done) = oneshot::channel();
        self.sender
            .send(Command::Flush(ack))
            .map_err(|_| TransportError::Closed("log writer has stopped".to_string()))?;
        done.await
            .map_err(|_| TransportError::Closed("log writer stopped before flushing".to_string()))
    }

    #[must_use]
    pub fn stats(&self) -> WriterStats {
        self.counters.snapshot()
    }

    /// Writes everything already queued, then stops the writer.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the writer task panicked.
    pub async fn shutdown(self) -> Result<WriterStats, TransportError> {
        let _ = self.sender.send(Command::Shutdown);
        self.worker
            .await
            .map_err(|e| TransportError::Closed(format!("log writer task failed: {e}")))?;
        Ok(self.counters.snapshot())
    }
}

async fn run_writer<S: TableStore>(
    config: TransportConfig,
    store: S,
    mut receiver: mpsc::UnboundedReceiver<Command>,
    counters: Arc<Counters>,
) {
    let table = config.table_name.clone();
    // Writer errors go to stderr; reporting them through tracing would loop
    // back into this layer.
    let transport = match TableTransport::with_store(config, store).await {
        Ok(transport) => Some(transport),
        Err(e) => {
            eprintln!("tablelog: failed to prepare table {table}: {e}; dropping log records");
            None
        }
    };

    while let Some(command) = receiver.recv().await {
        match command {
            Command::Append(record) => {
                let Some(transport) = &transport else {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                match transport.log_record(&record).await {
                    Ok(Some(_)) => {
                        counters.written.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(None) => {
                        counters.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        eprintln!("tablelog: failed to write log record to {table}: {e}");
                    }
                }
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown => break,
        }
    }
}

/// Collects the `message` field and every other field of an event.
#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    fields: Metadata,
}

impl RecordVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }
}
