use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

/// Blob store keyed by relative paths such as `photos/photo-<id>.jpg`.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes) -> anyhow::Result<()>;
    /// Returns `false` when there was nothing to delete.
    async fn delete_object(&self, key: &str) -> anyhow::Result<bool>;
}

/// Stores objects as files below a root directory, which is also what the
/// `/uploads` static route serves.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub async fn new(root: impl Into<PathBuf>, areas: &[&str]) -> anyhow::Result<Self> {
        let root = root.into();
        for area in areas {
            let dir = root.join(area);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("create upload area {}", dir.display()))?;
        }
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        anyhow::ensure!(safe, "invalid storage key {key:?}");
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, key: &str, body: Bytes) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create dir for {key}"))?;
        }
        // Readers of the static route must never see a half-written file.
        let tmp = path.with_file_name(format!(".{}.part", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("write {key}"))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(anyhow::Error::new(e).context(format!("rename into {key}")));
        }
        debug!(key, bytes = body.len(), "object stored");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<bool> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "object deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context(format!("delete {key}"))),
        }
    }
}
