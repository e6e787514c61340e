// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Storage for files generated per cluster
//!
//! Blob names are `/`-separated relative paths, conventionally prefixed with
//! the cluster id (`<cluster_id>/bootstrap.ign`), so that everything belonging
//! to a cluster can be removed with one [`BlobStore::delete_prefix()`].

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use async_trait::async_trait;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, name: &str, data: Vec<u8>) -> anyhow::Result<()>;
    async fn download(&self, name: &str) -> anyhow::Result<Vec<u8>>;
    async fn exists(&self, name: &str) -> anyhow::Result<bool>;
    /// Removes every blob whose name starts with `prefix`, returning how many
    /// were removed
    async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<usize>;
}

/// Rejects names that could escape the store's root
fn validate_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        bail!("blob name is empty");
    }
    if name.starts_with('/') || name.contains('\\') {
        bail!("blob name {:?} must be a relative path", name);
    }
    if name
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        bail!("blob name {:?} has an empty or relative component", name);
    }
    Ok(())
}

/// Keeps blobs as files under a root directory
pub struct FsBlobStore {
    root: Utf8PathBuf,
}

impl FsBlobStore {
    pub fn new(root: Utf8PathBuf) -> FsBlobStore {
        FsBlobStore { root }
    }

    fn path(&self, name: &str) -> anyhow::Result<Utf8PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Returns the name of every blob in the store
    async fn list(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut pending: Vec<Utf8PathBuf> = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("listing {}", dir))
                }
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .with_context(|| format!("listing {}", dir))?
            {
                let path =
                    Utf8PathBuf::try_from(entry.path()).map_err(|e| {
                        anyhow!("non-UTF-8 path in blob store: {}", e)
                    })?;
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    names.push(relative.as_str().to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, name: &str, data: Vec<u8>) -> anyhow::Result<()> {
        let path = self.path(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent))?;
        }
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("writing {}", path))
    }

    async fn download(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.path(name)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path))
    }

    async fn exists(&self, name: &str) -> anyhow::Result<bool> {
        let path = self.path(name)?;
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path))
    }

    async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<usize> {
        let mut removed = 0;
        for name in self.list().await? {
            if !name.starts_with(prefix) {
                continue;
            }
            let path = self.root.join(Utf8Path::new(&name));
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("removing {}", path))?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Keeps blobs in memory; used when no storage directory is configured
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> MemoryBlobStore {
        MemoryBlobStore::default()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, name: &str, data: Vec<u8>) -> anyhow::Result<()> {
        validate_name(name)?;
        self.blobs().insert(name.to_owned(), data);
        Ok(())
    }

    async fn download(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        self.blobs()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("blob {:?} not found", name))
    }

    async fn exists(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.blobs().contains_key(name))
    }

    async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<usize> {
        let mut blobs = self.blobs();
        let before = blobs.len();
        blobs.retain(|name, _| !name.starts_with(prefix));
        Ok(before - blobs.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    async fn exercise(store: &dyn BlobStore) {
        store.upload("c1/bootstrap.ign", b"{}".to_vec()).await.unwrap();
        store.upload("c1/logs/host.tar", b"logs".to_vec()).await.unwrap();
        store.upload("c2/bootstrap.ign", b"{}".to_vec()).await.unwrap();

        assert!(store.exists("c1/bootstrap.ign").await.unwrap());
        assert!(!store.exists("c1/worker.ign").await.unwrap());
        assert_eq!(store.download("c1/logs/host.tar").await.unwrap(), b"logs");
        assert!(store.download("c3/bootstrap.ign").await.is_err());

        assert_eq!(store.delete_prefix("c1/logs/").await.unwrap(), 1);
        assert_eq!(store.delete_prefix("c1/").await.unwrap(), 1);
        assert!(!store.exists("c1/bootstrap.ign").await.unwrap());
        assert!(store.exists("c2/bootstrap.ign").await.unwrap());

        assert!(store.upload("../escape", vec![]).await.is_err());
        assert!(store.upload("/etc/passwd", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_blob_store() {
        exercise(&MemoryBlobStore::new()).await;
    }

    #[tokio::test]
    async fn test_fs_blob_store() {
        let dir = Utf8TempDir::new().unwrap();
        exercise(&FsBlobStore::new(dir.path().to_owned())).await;
    }
}
