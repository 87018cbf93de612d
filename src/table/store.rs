//! Abstract table backend trait.
//!
//! Any item table backend must implement [`TableBackend`].  The trait
//! uses `async_trait`-style methods (manual desugaring with pinned
//! futures) so the same contract covers in-process stores and remote
//! managed tables.
//!
//! Rows are addressed by `(partition_key, row_key)` point keys.  Backends
//! are bound to a single table at construction time.

use std::future::Future;
use std::pin::Pin;

/// A single row in the item table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    /// Fixed partition the row lives under.
    pub partition_key: String,
    /// Row key (the item id).
    pub row_key: String,
    /// Opaque payload.
    pub value: String,
    /// ISO-8601 timestamp of the last write.
    pub updated_at: String,
}

/// Boxed future returned by every [`TableBackend`] method.
pub type TableFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Async table storage contract.
pub trait TableBackend: Send + Sync + 'static {
    /// Create the backing table if it does not exist.  Must be idempotent.
    fn ensure_table(&self) -> TableFuture<'_, ()>;

    /// Insert or replace the row at `(record.partition_key, record.row_key)`.
    fn upsert(&self, record: ItemRecord) -> TableFuture<'_, ()>;

    /// Point lookup.  Returns `None` when no row exists at the key.
    fn get(&self, partition_key: &str, row_key: &str) -> TableFuture<'_, Option<ItemRecord>>;

    /// Point delete.  Returns whether a row existed.
    fn delete(&self, partition_key: &str, row_key: &str) -> TableFuture<'_, bool>;

    /// All rows in a partition, ordered by row key.
    fn list_partition(&self, partition_key: &str) -> TableFuture<'_, Vec<ItemRecord>>;
}

/// Current UTC time as an RFC 3339 timestamp with millisecond precision.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
