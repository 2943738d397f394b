//! Configuration and the data types shared by the transport and the stores.

pub mod config;
pub mod models;
