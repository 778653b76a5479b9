use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result as AnyResult};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Blob store (C2): opaque binary storage of uploaded artifacts, keyed by
/// `<index>/<document_id>/<file_name>` (spec §6 "Persisted layout").
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    /// Create a new `StorageManager` from configuration.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;
        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Inject a custom backend; used by tests.
    #[must_use]
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    #[must_use]
    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    #[must_use]
    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    /// Resolve an object location to a filesystem path when using the local backend.
    /// Returns `None` for absolute paths or parent-dir traversal, guarding against
    /// escaping the configured base directory.
    #[must_use]
    pub fn resolve_local_path(&self, location: &str) -> Option<PathBuf> {
        let base = self.local_base_path()?;
        let relative = Path::new(location);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return None;
        }
        Some(base.join(relative))
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    pub async fn get_stream(
        &self,
        location: &str,
    ) -> object_store::Result<BoxStream<'static, object_store::Result<Bytes>>> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        Ok(result.into_stream())
    }

    /// Delete every object below `prefix`; for the local backend, also cleans up
    /// now-empty directories (used by `delete_document`/`delete_index`, spec §4.3).
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self.store.list(Some(&prefix_path)).map_ok(|m| m.location).boxed();
        self.store.delete_stream(locations).try_collect::<Vec<_>>().await?;

        if matches!(self.backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await?;
        }

        Ok(())
    }

    pub async fn list(&self, prefix: Option<&str>) -> object_store::Result<Vec<object_store::ObjectMeta>> {
        let prefix_path = prefix.map(ObjPath::from);
        self.store.list(prefix_path.as_ref()).try_collect().await
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store.head(&path).await.map(|_| true).or_else(|e| match e {
            object_store::Error::NotFound { .. } => Ok(false),
            _ => Err(e),
        })
    }

    async fn cleanup_filesystem_directories(&self, prefix: &str) -> object_store::Result<()> {
        if !matches!(self.backend_kind, StorageKind::Local) {
            return Ok(());
        }

        let Some(base) = &self.local_base else {
            return Ok(());
        };

        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            tracing::warn!(prefix = %prefix, "skipping directory cleanup for unsupported prefix components");
            return Ok(());
        }

        let mut current = base.join(relative);

        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(()) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => tracing::debug!(error = %err, path = %current.display(), "failed to remove directory during cleanup"),
                },
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(())
    }
}

async fn create_storage_backend(cfg: &AppConfig) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| object_store::Error::Generic {
                    store: "LocalFileSystem",
                    source: e.into(),
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

/// Resolve the absolute base directory used for local storage from config.
#[must_use]
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(&cfg.data_dir)
    }
}

/// Split a logical object location `"a/b/c"` into `("a/b", "c")`.
pub fn split_object_path(path: &str) -> AnyResult<(String, String)> {
    path.rsplit_once('/')
        .map(|(p, f)| (p.to_string(), f.to_string()))
        .ok_or_else(|| anyhow!("object path has no separator: {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::test_config_memory;

    fn manager() -> StorageManager {
        StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let mgr = manager();
        mgr.put("default/doc1/a.txt", Bytes::from_static(b"hello")).await.expect("put");
        let got = mgr.get("default/doc1/a.txt").await.expect("get");
        assert_eq!(got, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn delete_prefix_removes_all_matching_objects() {
        let mgr = manager();
        mgr.put("default/doc1/a.txt", Bytes::from_static(b"a")).await.expect("put a");
        mgr.put("default/doc1/b.txt", Bytes::from_static(b"b")).await.expect("put b");
        mgr.put("default/doc2/c.txt", Bytes::from_static(b"c")).await.expect("put c");

        mgr.delete_prefix("default/doc1").await.expect("delete prefix");

        assert!(!mgr.exists("default/doc1/a.txt").await.expect("exists"));
        assert!(!mgr.exists("default/doc1/b.txt").await.expect("exists"));
        assert!(mgr.exists("default/doc2/c.txt").await.expect("exists"));
    }

    #[tokio::test]
    async fn memory_backend_from_config() {
        let cfg = test_config_memory();
        let mgr = StorageManager::new(&cfg).await.expect("storage manager");
        mgr.put("default/doc1/a.txt", Bytes::from_static(b"hi")).await.expect("put");
        assert!(mgr.exists("default/doc1/a.txt").await.expect("exists"));
    }

    #[test]
    fn resolve_local_path_rejects_parent_traversal() {
        let mgr = StorageManager {
            store: Arc::new(InMemory::new()),
            backend_kind: StorageKind::Local,
            local_base: Some(PathBuf::from("/tmp/km-data")),
        };
        assert!(mgr.resolve_local_path("../escape").is_none());
        assert!(mgr.resolve_local_path("default/doc1/a.txt").is_some());
    }

    #[test]
    fn split_object_path_splits_on_last_separator() {
        let (prefix, name) = split_object_path("default/doc1/a.txt").expect("split");
        assert_eq!(prefix, "default/doc1");
        assert_eq!(name, "a.txt");
    }
}
