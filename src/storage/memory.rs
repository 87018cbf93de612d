//! In-memory blob backend.
//!
//! Blobs live in a `tokio::sync::RwLock<HashMap>` and vanish with the
//! process.  Used for tests and ephemeral deployments.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::backend::{md5_etag, BlobBackend, BlobFuture};

#[derive(Default)]
struct Inner {
    container_created: bool,
    blobs: HashMap<String, Bytes>,
}

pub struct MemoryBlobBackend {
    container: String,
    inner: RwLock<Inner>,
}

impl MemoryBlobBackend {
    pub fn new(container: &str) -> Self {
        Self {
            container: container.to_string(),
            inner: RwLock::new(Inner::default()),
        }
    }

    fn missing_container(&self) -> anyhow::Error {
        anyhow::anyhow!("Container does not exist: {}", self.container)
    }
}

impl BlobBackend for MemoryBlobBackend {
    fn ensure_container(&self) -> BlobFuture<'_, ()> {
        Box::pin(async move {
            self.inner.write().await.container_created = true;
            Ok(())
        })
    }

    fn put(&self, name: &str, data: Bytes) -> BlobFuture<'_, String> {
        let name = name.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if !inner.container_created {
                return Err(self.missing_container());
            }
            let etag = md5_etag(&data);
            inner.blobs.insert(name, data);
            Ok(etag)
        })
    }

    fn get(&self, name: &str) -> BlobFuture<'_, Option<Bytes>> {
        let name = name.to_string();
        Box::pin(async move {
            let inner = self.inner.read().await;
            if !inner.container_created {
                return Err(self.missing_container());
            }
            Ok(inner.blobs.get(&name).cloned())
        })
    }

    fn delete(&self, name: &str) -> BlobFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if !inner.container_created {
                return Err(self.missing_container());
            }
            inner.blobs.remove(&name);
            Ok(())
        })
    }
}
