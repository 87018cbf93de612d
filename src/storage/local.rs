//! Local filesystem blob backend.
//!
//! Blobs are stored as files under `{root}/{container}/{name}`; names with
//! `/` become nested directories.
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.

use bytes::Bytes;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use super::backend::{md5_etag, BlobBackend, BlobFuture};

/// Stores blobs on the local filesystem.
pub struct LocalBlobBackend {
    /// Container directory; every blob lives beneath it.
    dir: PathBuf,
    /// Scratch directory for in-flight writes, outside the container.
    tmp_dir: PathBuf,
}

impl LocalBlobBackend {
    /// Create a backend for `container` under `root`.  Directories are
    /// created by [`BlobBackend::ensure_container`], not here.
    pub fn new(root: impl Into<PathBuf>, container: &str) -> anyhow::Result<Self> {
        let root = root.into();
        if container.is_empty() || !is_relative_without_parent(container) {
            anyhow::bail!("Invalid container name: {container:?}");
        }
        Ok(Self {
            dir: root.join(container),
            tmp_dir: root.join(".tmp"),
        })
    }

    /// Resolve a blob name to a path inside the container directory.
    fn resolve(&self, name: &str) -> anyhow::Result<PathBuf> {
        if !is_relative_without_parent(name) {
            anyhow::bail!("Path traversal detected in blob name: {}", name);
        }
        Ok(self.dir.join(name))
    }

    fn temp_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("tmp-{}", uuid::Uuid::new_v4()))
    }
}

fn is_relative_without_parent(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl BlobBackend for LocalBlobBackend {
    fn ensure_container(&self) -> BlobFuture<'_, ()> {
        Box::pin(async move {
            std::fs::create_dir_all(&self.dir)?;
            std::fs::create_dir_all(&self.tmp_dir)?;
            Ok(())
        })
    }

    fn put(&self, name: &str, data: Bytes) -> BlobFuture<'_, String> {
        let name = name.to_string();
        Box::pin(async move {
            let final_path = self.resolve(&name)?;
            if let Some(parent) = final_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let etag = md5_etag(&data);

            let tmp_path = self.temp_path();
            let written = (|| -> std::io::Result<()> {
                let mut file = std::fs::File::create(&tmp_path)?;
                file.write_all(&data)?;
                file.sync_all()?;
                std::fs::rename(&tmp_path, &final_path)
            })();
            if let Err(e) = written {
                // The temp file may or may not exist at this point.
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e.into());
            }

            Ok(etag)
        })
    }

    fn get(&self, name: &str) -> BlobFuture<'_, Option<Bytes>> {
        let name = name.to_string();
        Box::pin(async move {
            let path = self.resolve(&name)?;
            // A directory is an intermediate name segment, not a blob.
            if !path.is_file() {
                return Ok(None);
            }
            match std::fs::read(&path) {
                Ok(data) => Ok(Some(Bytes::from(data))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete(&self, name: &str) -> BlobFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(async move {
            let path = self.resolve(&name)?;
            if !path.is_file() {
                return Ok(());
            }
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}
