//! In-memory table backend.
//!
//! Stores rows in memory with no persistence. Useful for testing and
//! ephemeral deployments. Uses `RwLock<HashMap>` for thread-safe access.
//!
//! Like a managed table service, writes and reads fail until
//! [`TableBackend::ensure_table`] has been called.

use std::collections::HashMap;
use std::sync::RwLock;

use super::store::{ItemRecord, TableBackend, TableFuture};

type RowKey = (String, String);

#[derive(Debug, Default)]
struct Inner {
    created: bool,
    rows: HashMap<RowKey, ItemRecord>,
}

pub struct MemoryTableBackend {
    table_name: String,
    inner: RwLock<Inner>,
}

impl MemoryTableBackend {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            inner: RwLock::new(Inner::default()),
        }
    }

    fn missing_table(&self) -> anyhow::Error {
        anyhow::anyhow!("Table does not exist: {}", self.table_name)
    }
}

impl TableBackend for MemoryTableBackend {
    fn ensure_table(&self) -> TableFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            inner.created = true;
            Ok(())
        })
    }

    fn upsert(&self, record: ItemRecord) -> TableFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if !inner.created {
                return Err(self.missing_table());
            }
            let key = (record.partition_key.clone(), record.row_key.clone());
            inner.rows.insert(key, record);
            Ok(())
        })
    }

    fn get(&self, partition_key: &str, row_key: &str) -> TableFuture<'_, Option<ItemRecord>> {
        let key = (partition_key.to_string(), row_key.to_string());
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            if !inner.created {
                return Err(self.missing_table());
            }
            Ok(inner.rows.get(&key).cloned())
        })
    }

    fn delete(&self, partition_key: &str, row_key: &str) -> TableFuture<'_, bool> {
        let key = (partition_key.to_string(), row_key.to_string());
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if !inner.created {
                return Err(self.missing_table());
            }
            Ok(inner.rows.remove(&key).is_some())
        })
    }

    fn list_partition(&self, partition_key: &str) -> TableFuture<'_, Vec<ItemRecord>> {
        let partition_key = partition_key.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            if !inner.created {
                return Err(self.missing_table());
            }
            let mut rows: Vec<_> = inner
                .rows
                .values()
                .filter(|r| r.partition_key == partition_key)
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.row_key.cmp(&b.row_key));
            Ok(rows)
        })
    }
}
