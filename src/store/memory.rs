//! In-process metadata store

use super::{namespaced, MetadataStore, StoreError, DEFAULT_PREFIX};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

/// Metadata store backed by a concurrent map
///
/// Records live as long as the process; use [`super::FileStore`] to survive restarts.
pub struct MemoryStore {
    prefix: String,
    records: DashMap<String, HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            records: DashMap::new(),
        }
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(&namespaced(&self.prefix, id)))
    }

    async fn get(&self, id: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .records
            .get(&namespaced(&self.prefix, id))
            .and_then(|record| record.get(field).cloned()))
    }

    async fn set(&self, id: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.records
            .entry(namespaced(&self.prefix, id))
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }
}
