//! Abstract blob backend trait.
//!
//! Every blob backend must implement [`BlobBackend`].  A backend is bound
//! to exactly one container at construction; names passed to it are
//! relative to that container and already validated by
//! [`crate::blobs::BlobStore`].

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by every [`BlobBackend`] method.
pub type BlobFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Async blob storage contract.
pub trait BlobBackend: Send + Sync + 'static {
    /// Create the container if it does not exist.  Idempotent.
    fn ensure_container(&self) -> BlobFuture<'_, ()>;

    /// Write `data` under `name`, replacing any existing blob.  Returns the
    /// quoted ETag of the stored blob.
    fn put(&self, name: &str, data: Bytes) -> BlobFuture<'_, String>;

    /// Read the blob at `name`, or `None` if it does not exist.
    fn get(&self, name: &str) -> BlobFuture<'_, Option<Bytes>>;

    /// Delete the blob at `name`.  Deleting a missing blob succeeds.
    fn delete(&self, name: &str) -> BlobFuture<'_, ()>;
}

/// Quoted MD5 hex digest, the ETag format used by the local backends.
pub fn md5_etag(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}
