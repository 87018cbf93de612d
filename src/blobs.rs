//! Blob store: opaque byte payloads in one named container.
//!
//! The container is created on first use, once per process.  Uploads
//! always overwrite.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::StoreError;
use crate::metrics::record_blob_bytes_written;
use crate::storage::backend::BlobBackend;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct BlobInfo {
    pub name: String,
    pub etag: String,
    pub size: u64,
}

/// Reject names that are blank, absolute, or walk out of the container.
pub fn validate_blob_name(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::invalid("blob name must not be empty"));
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return Err(StoreError::invalid("blob name must not start with '/'"));
    }
    if name.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(StoreError::invalid("blob name must not contain '..' segments"));
    }
    if name.contains('\0') {
        return Err(StoreError::invalid("blob name must not contain NUL"));
    }
    Ok(())
}

pub struct BlobStore {
    backend: Arc<dyn BlobBackend>,
    timeout: Duration,
    container_ready: OnceCell<()>,
}

impl BlobStore {
    pub fn new(backend: Arc<dyn BlobBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            container_ready: OnceCell::new(),
        }
    }

    async fn bounded<T, F>(&self, deadline: Instant, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StoreError::BackendUnavailable(err)),
            Err(_) => Err(StoreError::BackendUnavailable(anyhow::anyhow!(
                "deadline exceeded waiting for the blob backend"
            ))),
        }
    }

    /// The deadline also bounds waiting on another task's in-flight creation.
    async fn ensure_container(&self, deadline: Instant) -> Result<(), StoreError> {
        let init = async {
            self.container_ready
                .get_or_try_init(|| async {
                    debug!("ensuring blob container exists");
                    self.backend.ensure_container().await
                })
                .await
                .map(|_| ())
        };
        self.bounded(deadline, init).await
    }

    fn default_deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    /// Upload `data` under `name`, replacing any existing blob.
    pub async fn save(&self, name: &str, data: Bytes) -> Result<BlobInfo, StoreError> {
        self.save_before(name, data, self.default_deadline()).await
    }

    /// [`BlobStore::save`] with an explicit deadline.
    pub async fn save_before(
        &self,
        name: &str,
        data: Bytes,
        deadline: Instant,
    ) -> Result<BlobInfo, StoreError> {
        validate_blob_name(name)?;
        self.ensure_container(deadline).await?;

        let size = data.len() as u64;
        let etag = self.bounded(deadline, self.backend.put(name, data)).await?;
        record_blob_bytes_written(size);
        debug!(name, size, "blob uploaded");

        Ok(BlobInfo {
            name: name.to_string(),
            etag,
            size,
        })
    }

    /// Download the blob at `name`.
    pub async fn get(&self, name: &str) -> Result<Bytes, StoreError> {
        self.get_before(name, self.default_deadline()).await
    }

    /// [`BlobStore::get`] with an explicit deadline.
    pub async fn get_before(&self, name: &str, deadline: Instant) -> Result<Bytes, StoreError> {
        validate_blob_name(name)?;
        self.ensure_container(deadline).await?;
        self.bounded(deadline, self.backend.get(name))
            .await?
            .ok_or_else(|| StoreError::BlobNotFound {
                name: name.to_string(),
            })
    }

    /// Delete the blob at `name`.  Succeeds when it is already gone.
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.delete_before(name, self.default_deadline()).await
    }

    /// [`BlobStore::delete`] with an explicit deadline.
    pub async fn delete_before(&self, name: &str, deadline: Instant) -> Result<(), StoreError> {
        validate_blob_name(name)?;
        self.ensure_container(deadline).await?;
        self.bounded(deadline, self.backend.delete(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::BlobFuture;
    use crate::storage::memory::MemoryBlobBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        inner: MemoryBlobBackend,
        ensure_calls: AtomicUsize,
        calls: AtomicUsize,
        ensure_delay: Duration,
        stall_reads: bool,
    }

    impl CountingBackend {
        fn new() -> Self {
            Self {
                inner: MemoryBlobBackend::new("blobs"),
                ensure_calls: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                ensure_delay: Duration::ZERO,
                stall_reads: false,
            }
        }
    }

    impl BlobBackend for CountingBackend {
        fn ensure_container(&self) -> BlobFuture<'_, ()> {
            self.ensure_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if !self.ensure_delay.is_zero() {
                    tokio::time::sleep(self.ensure_delay).await;
                }
                self.inner.ensure_container().await
            })
        }

        fn put(&self, name: &str, data: Bytes) -> BlobFuture<'_, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.put(name, data)
        }

        fn get(&self, name: &str) -> BlobFuture<'_, Option<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall_reads {
                return Box::pin(std::future::pending::<anyhow::Result<Option<Bytes>>>());
            }
            self.inner.get(name)
        }

        fn delete(&self, name: &str) -> BlobFuture<'_, ()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(name)
        }
    }

    fn store() -> (Arc<CountingBackend>, BlobStore) {
        store_with(CountingBackend::new())
    }

    fn store_with(backend: CountingBackend) -> (Arc<CountingBackend>, BlobStore) {
        let backend = Arc::new(backend);
        let store = BlobStore::new(backend.clone(), Duration::from_secs(5));
        (backend, store)
    }

    #[test]
    fn test_validate_blob_name() {
        assert!(validate_blob_name("report.pdf").is_ok());
        assert!(validate_blob_name("2026/10/report.pdf").is_ok());
        assert!(validate_blob_name("a..b").is_ok());
        assert!(validate_blob_name("").is_err());
        assert!(validate_blob_name("  ").is_err());
        assert!(validate_blob_name("/etc/passwd").is_err());
        assert!(validate_blob_name("../secret").is_err());
        assert!(validate_blob_name("a/../../b").is_err());
        assert!(validate_blob_name("a\\..\\b").is_err());
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let (_backend, store) = store();
        let info = store
            .save("hello.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(info.name, "hello.txt");
        assert_eq!(info.size, 5);
        assert!(!info.etag.is_empty());

        assert_eq!(
            store.get("hello.txt").await.unwrap(),
            Bytes::from_static(b"hello")
        );
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (_backend, store) = store();
        let first = store.save("k", Bytes::from_static(b"one")).await.unwrap();
        let second = store.save("k", Bytes::from_static(b"two")).await.unwrap();
        assert_ne!(first.etag, second.etag);
        assert_eq!(store.get("k").await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let (_backend, store) = store();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::BlobNotFound { ref name } if name == "missing"));
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let (_backend, store) = store();
        store.save("k", Bytes::from_static(b"x")).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(matches!(
            store.get("k").await.unwrap_err(),
            StoreError::BlobNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_traversal_rejected_without_backend_contact() {
        let (backend, store) = store();
        let err = store
            .save("../escape", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput { .. }));
        assert!(store.get("").await.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.ensure_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_container_ensured_once() {
        let (backend, store) = store();
        for i in 0..5 {
            store
                .save(&format!("b{i}"), Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        assert_eq!(backend.ensure_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_deadline_bounds_backend_call() {
        let mut backend = CountingBackend::new();
        backend.stall_reads = true;
        let (_backend, store) = store_with(backend);
        store.save("k", Bytes::from_static(b"x")).await.unwrap();

        let started = Instant::now();
        let err = store
            .get_before("k", Instant::now() + Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(1));

        // Writes and deletes are unaffected and honour their own deadline.
        let deadline = Instant::now() + Duration::from_secs(5);
        store
            .save_before("k", Bytes::from_static(b"y"), deadline)
            .await
            .unwrap();
        store.delete_before("k", deadline).await.unwrap();
    }

    #[tokio::test]
    async fn test_deadline_bounds_wait_on_in_flight_container_creation() {
        let mut backend = CountingBackend::new();
        backend.ensure_delay = Duration::from_secs(2);
        let (_backend, store) = store_with(backend);
        let store = Arc::new(store);

        let first = {
            let store = store.clone();
            tokio::spawn(async move { store.get("k").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let err = store
            .get_before("k", Instant::now() + Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(1));

        first.abort();
    }
}
