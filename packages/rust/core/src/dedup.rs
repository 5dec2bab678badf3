//! In-memory index of content fingerprints already stored for a collection.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use newscrawl_shared::StoreError;
use newscrawl_storage::ArticleStore;

/// Known fingerprints of one collection, loaded once at the start of a run.
///
/// Read-only after load. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    collection: String,
    hashes: Arc<HashSet<String>>,
}

impl DedupIndex {
    /// Project every stored `content_hash` of `collection` into memory.
    #[instrument(skip_all, fields(collection = %collection))]
    pub async fn load(store: &dyn ArticleStore, collection: &str) -> Result<Self, StoreError> {
        let hashes = store.known_hashes(collection).await?;
        debug!(known = hashes.len(), "dedup index loaded");
        Ok(Self {
            collection: collection.to_string(),
            hashes: Arc::new(hashes),
        })
    }

    pub fn from_hashes(
        collection: impl Into<String>,
        hashes: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            hashes: Arc::new(hashes.into_iter().collect()),
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}
