//! Filesystem-backed metadata store
//!
//! One JSON document per upload, named after the namespaced key. Writes go to a
//! temp file first and are renamed into place, so a reader never observes a
//! half-written record.

use super::{namespaced, MetadataStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

type Record = HashMap<String, String>;

/// Metadata store persisting records under a directory
pub struct FileStore {
    prefix: String,
    directory: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open a store rooted at `directory`, creating the directory if needed
    pub fn open(directory: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)?;

        Ok(Self {
            prefix: prefix.into(),
            directory,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.directory
            .join(format!("{}.json", namespaced(&self.prefix, id)))
    }

    async fn read_record(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let path = self.record_path(id);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: namespaced(&self.prefix, id),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl MetadataStore for FileStore {
    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(tokio::fs::try_exists(self.record_path(id)).await?)
    }

    async fn get(&self, id: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .read_record(id)
            .await?
            .and_then(|mut record| record.remove(field)))
    }

    async fn set(&self, id: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut record = self.read_record(id).await?.unwrap_or_default();
        record.insert(field.to_string(), value.to_string());

        let content = serde_json::to_vec(&record).map_err(|e| StoreError::Corrupt {
            key: namespaced(&self.prefix, id),
            reason: e.to_string(),
        })?;

        let path = self.record_path(id);
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::trace!(key = %namespaced(&self.prefix, id), field, value, "Metadata field stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = FileStore::open(dir.path(), "t-").unwrap();
            store.set("abc", "Final-Length", "180").await.unwrap();
            store.set("abc", "Offset", "0").await.unwrap();
        }

        let store = FileStore::open(dir.path(), "t-").unwrap();
        assert!(store.exists("abc").await.unwrap());
        assert_eq!(
            store.get("abc", "Final-Length").await.unwrap().as_deref(),
            Some("180")
        );
        assert!(dir.path().join("t-abc.json").exists());
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t-abc.json"), b"{not json").unwrap();

        let store = FileStore::open(dir.path(), "t-").unwrap();
        let result = store.get("abc", "Offset").await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), "t-").unwrap();
        assert!(!store.exists("nope").await.unwrap());
        assert_eq!(store.get("nope", "Offset").await.unwrap(), None);
    }
}
