//! Per-upload exclusive leases
//!
//! A PATCH holds the lease of its upload id for its whole duration, so two
//! appends can never both pass the offset check and write the same range.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Set of upload ids with a PATCH in flight
#[derive(Debug, Clone, Default)]
pub struct UploadLeases {
    held: Arc<DashMap<String, ()>>,
}

impl UploadLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `id`, or `None` if another request holds it
    pub fn try_acquire(&self, id: &str) -> Option<Lease> {
        match self.held.entry(id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Lease {
                    held: Arc::clone(&self.held),
                    id: id.to_string(),
                })
            }
        }
    }

    pub fn is_held(&self, id: &str) -> bool {
        self.held.contains_key(id)
    }
}

/// Guard returned by [`UploadLeases::try_acquire`]; dropping it releases the lease
#[derive(Debug)]
pub struct Lease {
    held: Arc<DashMap<String, ()>>,
    id: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.held.remove(&self.id);
    }
}
