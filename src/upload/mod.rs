//! Upload resources
//!
//! An upload resource ties an [`UploadId`] to a metadata record
//! (`Final-Length`, `Offset`) and a blob holding the first `Offset` bytes of
//! the file.

use crate::protocol::TusError;
use crate::storage::FileStorage;
use crate::store::{MetadataStore, StoreError};
use std::sync::Arc;

mod id;
pub mod lease;
pub mod transfer;

pub use id::UploadId;
pub use lease::{Lease, UploadLeases};
pub use transfer::{AbortReason, ChunkedTransfer, TransferOutcome, TransferReport};

/// Metadata field holding the declared total length
pub const FIELD_FINAL_LENGTH: &str = "Final-Length";

/// Metadata field holding the number of durable bytes
pub const FIELD_OFFSET: &str = "Offset";

/// Repository of upload resources
#[derive(Clone)]
pub struct Uploads {
    metadata: Arc<dyn MetadataStore>,
    storage: FileStorage,
}

impl Uploads {
    pub fn new(metadata: Arc<dyn MetadataStore>, storage: FileStorage) -> Self {
        Self { metadata, storage }
    }

    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    pub async fn exists(&self, id: &UploadId) -> Result<bool, TusError> {
        Ok(self.metadata.exists(id.as_str()).await?)
    }

    /// Create the empty blob and the `{final_length, offset: 0}` record
    ///
    /// The blob is created first so a record never points at missing content;
    /// it is removed again when the record can't be written.
    pub async fn create(&self, id: &UploadId, final_length: u64) -> Result<(), TusError> {
        if self.exists(id).await? {
            return Err(TusError::Conflict(format!("upload {} already exists", id)));
        }

        self.storage.create(id.as_str()).await?;

        if let Err(e) = self.write_record(id, final_length).await {
            if let Err(cleanup) = self.storage.remove(id.as_str()).await {
                tracing::warn!(upload.id = %id, error = %cleanup, "Failed to remove orphaned blob");
            }
            return Err(e);
        }

        Ok(())
    }

    async fn write_record(&self, id: &UploadId, final_length: u64) -> Result<(), TusError> {
        self.metadata
            .set(id.as_str(), FIELD_FINAL_LENGTH, &final_length.to_string())
            .await?;
        self.metadata.set(id.as_str(), FIELD_OFFSET, "0").await?;
        Ok(())
    }

    /// Stored offset, if the record has one
    pub async fn offset(&self, id: &UploadId) -> Result<Option<u64>, TusError> {
        self.numeric_field(id, FIELD_OFFSET).await
    }

    /// Declared final length, if the record has one
    pub async fn final_length(&self, id: &UploadId) -> Result<Option<u64>, TusError> {
        self.numeric_field(id, FIELD_FINAL_LENGTH).await
    }

    /// Record a new durable offset
    pub async fn set_offset(&self, id: &UploadId, offset: u64) -> Result<(), TusError> {
        self.metadata
            .set(id.as_str(), FIELD_OFFSET, &offset.to_string())
            .await?;
        Ok(())
    }

    async fn numeric_field(&self, id: &UploadId, field: &str) -> Result<Option<u64>, TusError> {
        let Some(raw) = self.metadata.get(id.as_str(), field).await? else {
            return Ok(None);
        };

        raw.trim().parse::<u64>().map(Some).map_err(|_| {
            TusError::Store(StoreError::Corrupt {
                key: id.to_string(),
                reason: format!("{} is not an integer: '{}'", field, raw),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn uploads(dir: &std::path::Path) -> (Uploads, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let storage = FileStorage::new(dir).unwrap();
        (Uploads::new(store.clone(), storage), store)
    }

    #[tokio::test]
    async fn test_create_initializes_record() {
        let dir = tempfile::tempdir().unwrap();
        let (uploads, _) = uploads(dir.path());
        let id = UploadId::generate();

        uploads.create(&id, 180).await.unwrap();

        assert!(uploads.exists(&id).await.unwrap());
        assert_eq!(uploads.final_length(&id).await.unwrap(), Some(180));
        assert_eq!(uploads.offset(&id).await.unwrap(), Some(0));
        assert!(dir.path().join(id.as_str()).exists());
    }

    #[tokio::test]
    async fn test_create_existing_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (uploads, _) = uploads(dir.path());
        let id = UploadId::generate();

        uploads.create(&id, 10).await.unwrap();
        assert!(matches!(
            uploads.create(&id, 10).await,
            Err(TusError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_offset() {
        let dir = tempfile::tempdir().unwrap();
        let (uploads, store) = uploads(dir.path());
        let id = UploadId::generate();
        store.set(id.as_str(), FIELD_OFFSET, "many").await.unwrap();

        assert!(matches!(
            uploads.offset(&id).await,
            Err(TusError::Store(StoreError::Corrupt { .. }))
        ));
    }
}
