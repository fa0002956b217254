//! services/desk/src/adapters/object_store.rs
//!
//! Stores uploaded vault files on the local filesystem and hands back a URL
//! under a configurable public base.

use async_trait::async_trait;
use bytes::Bytes;
use loan_desk_core::ports::{ObjectStore, PortError, PortResult};
use std::path::{Component, Path, PathBuf};
use tracing::info;

#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolves an object path below the root, refusing anything that escapes it.
    fn resolve(&self, path: &str) -> PortResult<PathBuf> {
        let relative = Path::new(path);
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if path.is_empty() || !plain {
            return Err(PortError::Unexpected(format!("Invalid object path: {path}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(&self, path: &str, data: Bytes) -> PortResult<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }
        tokio::fs::write(&target, &data)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        info!(path, bytes = data.len(), "Stored object");
        Ok(format!("{}/{}", self.public_base_url, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_writes_below_root_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "https://files.example.com/");
        let url = store
            .upload("users/u1/panCard_1700000000000", Bytes::from_static(b"scan"))
            .await
            .unwrap();
        assert_eq!(url, "https://files.example.com/users/u1/panCard_1700000000000");
        let written = std::fs::read(dir.path().join("users/u1/panCard_1700000000000")).unwrap();
        assert_eq!(written, b"scan");
    }

    #[tokio::test]
    async fn rejects_paths_that_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "file:///x");
        for bad in ["../outside", "/etc/passwd", "users/../../x", ""] {
            assert!(store.upload(bad, Bytes::new()).await.is_err(), "{bad}");
        }
    }
}
