//! Item store: create/read access to items in one named table.
//!
//! Every item lives under a single fixed partition key supplied at
//! construction; the caller-supplied id is the row key.  The table is
//! created lazily on first use, at most once per process, and safely under
//! concurrent first use.
//!
//! Duplicate creates replace the stored value (last-write-wins), which
//! makes a retried create idempotent.
//!
//! The store never logs errors and never retries: every backend failure is
//! returned as [`StoreError::BackendUnavailable`] and left to the caller.

use std::sync::Arc;
use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::StoreError;
use crate::metrics::record_item_operation;
use crate::table::store::{now_timestamp, ItemRecord, TableBackend};

/// A stored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct Item {
    /// Caller-supplied identifier, unique within the table.
    #[serde(default)]
    #[garde(custom(non_blank))]
    pub id: String,
    /// Opaque payload.
    #[serde(default)]
    #[garde(skip)]
    pub value: String,
}

impl Item {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

fn non_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be empty"));
    }
    Ok(())
}

fn check_id(id: &str) -> Result<(), StoreError> {
    if id.trim().is_empty() {
        return Err(StoreError::invalid("id: must not be empty"));
    }
    Ok(())
}

fn record_to_item(record: ItemRecord) -> Item {
    Item {
        id: record.row_key,
        value: record.value,
    }
}

/// Facade over a [`TableBackend`] bound to one partition.
pub struct ItemStore {
    backend: Arc<dyn TableBackend>,
    partition_key: String,
    timeout: Duration,
    table_ready: OnceCell<()>,
}

impl ItemStore {
    /// `timeout` is the deadline applied by the operations that do not take
    /// an explicit one.
    pub fn new(backend: Arc<dyn TableBackend>, partition_key: &str, timeout: Duration) -> Self {
        Self {
            backend,
            partition_key: partition_key.to_string(),
            timeout,
            table_ready: OnceCell::new(),
        }
    }

    /// The fixed partition every item is stored under.
    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    fn default_deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    /// Run `fut` against the backend, bounded by `deadline`.
    async fn bounded<T, F>(&self, deadline: Instant, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StoreError::BackendUnavailable(err)),
            Err(_) => Err(StoreError::BackendUnavailable(anyhow::anyhow!(
                "deadline exceeded waiting for the table backend"
            ))),
        }
    }

    /// Create the table on first use.  A failed attempt leaves the cell
    /// empty so the next call tries again.
    ///
    /// The deadline covers waiting on another task's in-flight creation too.
    async fn ensure_table(&self, deadline: Instant) -> Result<(), StoreError> {
        let init = async {
            self.table_ready
                .get_or_try_init(|| async {
                    debug!("ensuring item table exists");
                    self.backend.ensure_table().await
                })
                .await
                .map(|_| ())
        };
        self.bounded(deadline, init).await
    }

    /// Store `item`, replacing any existing item with the same id.
    pub async fn create(&self, item: Item) -> Result<Item, StoreError> {
        self.create_before(item, self.default_deadline()).await
    }

    /// [`ItemStore::create`] with an explicit deadline.
    pub async fn create_before(&self, item: Item, deadline: Instant) -> Result<Item, StoreError> {
        let result = self.write(item, deadline).await;
        record_item_operation("create", &result);
        result
    }

    /// Fetch the item stored at `id`.
    pub async fn get(&self, id: &str) -> Result<Item, StoreError> {
        self.get_before(id, self.default_deadline()).await
    }

    /// [`ItemStore::get`] with an explicit deadline.
    pub async fn get_before(&self, id: &str, deadline: Instant) -> Result<Item, StoreError> {
        let result = self.read(id, deadline).await;
        record_item_operation("get", &result);
        result
    }

    /// Create-or-replace the item at `id`.
    ///
    /// An empty `item.id` takes `id`; a different non-empty one is rejected.
    pub async fn replace(&self, id: &str, item: Item) -> Result<Item, StoreError> {
        self.replace_before(id, item, self.default_deadline()).await
    }

    /// [`ItemStore::replace`] with an explicit deadline.
    pub async fn replace_before(
        &self,
        id: &str,
        mut item: Item,
        deadline: Instant,
    ) -> Result<Item, StoreError> {
        let result = async {
            check_id(id)?;
            if item.id.is_empty() {
                item.id = id.to_string();
            } else if item.id != id {
                return Err(StoreError::invalid(format!(
                    "id mismatch: body id '{}' does not match path id '{}'",
                    item.id, id
                )));
            }
            self.write(item, deadline).await
        }
        .await;
        record_item_operation("replace", &result);
        result
    }

    /// Remove the item at `id`.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.delete_before(id, self.default_deadline()).await
    }

    /// [`ItemStore::delete`] with an explicit deadline.
    pub async fn delete_before(&self, id: &str, deadline: Instant) -> Result<(), StoreError> {
        let result = async {
            check_id(id)?;
            self.ensure_table(deadline).await?;
            let existed = self
                .bounded(deadline, self.backend.delete(&self.partition_key, id))
                .await?;
            if !existed {
                return Err(StoreError::NotFound { id: id.to_string() });
            }
            Ok(())
        }
        .await;
        record_item_operation("delete", &result);
        result
    }

    /// Every item in the partition, ordered by id.
    pub async fn list(&self) -> Result<Vec<Item>, StoreError> {
        self.list_before(self.default_deadline()).await
    }

    /// [`ItemStore::list`] with an explicit deadline.
    pub async fn list_before(&self, deadline: Instant) -> Result<Vec<Item>, StoreError> {
        let result = async {
            self.ensure_table(deadline).await?;
            let records = self
                .bounded(deadline, self.backend.list_partition(&self.partition_key))
                .await?;
            Ok(records.into_iter().map(record_to_item).collect())
        }
        .await;
        record_item_operation("list", &result);
        result
    }

    async fn write(&self, item: Item, deadline: Instant) -> Result<Item, StoreError> {
        item.validate()
            .map_err(|report| StoreError::invalid(report.to_string().trim().to_string()))?;
        self.ensure_table(deadline).await?;

        let record = ItemRecord {
            partition_key: self.partition_key.clone(),
            row_key: item.id.clone(),
            value: item.value.clone(),
            updated_at: now_timestamp(),
        };
        self.bounded(deadline, self.backend.upsert(record)).await?;
        debug!(id = %item.id, "item written");
        Ok(item)
    }

    async fn read(&self, id: &str, deadline: Instant) -> Result<Item, StoreError> {
        check_id(id)?;
        self.ensure_table(deadline).await?;
        self.bounded(deadline, self.backend.get(&self.partition_key, id))
            .await?
            .map(record_to_item)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }
}
