//! The log transport: the adapter itself, row-key generation and the
//! `tracing` layer built on top of it.

pub mod adapter;
pub mod layer;
pub mod row_key;

pub use adapter::TableTransport;
pub use layer::{TableLayer, TableLayerHandle, WriterStats};
pub use row_key::RowKeyGenerator;
