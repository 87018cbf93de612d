//! itemstore library -- HTTP item table and blob storage service.
//!
//! Items are `{id, value}` records kept in one named table under a single
//! fixed partition; blobs are opaque byte payloads in one named container.
//! Both sit behind pluggable backends (in-memory, SQLite/local disk,
//! DynamoDB/Azure Blob Storage).

use std::sync::Arc;

pub mod blobs;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod items;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod table;

use crate::blobs::BlobStore;
use crate::config::Config;
use crate::items::ItemStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Item table facade.
    pub items: Arc<ItemStore>,
    /// Blob container facade.
    pub blobs: Arc<BlobStore>,
}
