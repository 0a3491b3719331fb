//! Metadata store
//!
//! Per-upload key/field/value records. The protocol layer only needs three
//! operations; no transaction spans more than one field, and a `set` is visible
//! to the next `get` on the same id/field.

use async_trait::async_trait;
use thiserror::Error;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Default key namespace
pub const DEFAULT_PREFIX: &str = "tus-uploadr-";

/// Metadata store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value access to upload records
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Whether a record exists for `id`
    async fn exists(&self, id: &str) -> Result<bool, StoreError>;

    /// Value of `field` in the record for `id`
    async fn get(&self, id: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Set `field` in the record for `id`, creating the record if needed
    async fn set(&self, id: &str, field: &str, value: &str) -> Result<(), StoreError>;
}

/// Build the namespaced key for an upload id
pub(crate) fn namespaced(prefix: &str, id: &str) -> String {
    format!("{}{}", prefix, id)
}
