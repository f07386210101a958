//! Resolving the live backbone resources behind synchronized objects.
//!
//! Objects of cacheable collections only sync references (ids, keys); the
//! readable content lives in a backbone resource that has to be fetched and
//! decrypted. A [`CacheFetcher`] does that in batches per collection.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use datawallet_types::{DatawalletCollection, ObjectId};
use tracing::warn;

use crate::error::SyncError;

#[async_trait]
pub trait CacheFetcher: Send + Sync {
    /// Fetch the caches for `ids` of `collection`. Ids the fetcher cannot
    /// resolve are left out of the result.
    async fn fetch_caches(
        &self,
        collection: DatawalletCollection,
        ids: &[ObjectId],
    ) -> anyhow::Result<Vec<(ObjectId, serde_json::Value)>>;
}

/// Resolves nothing. For identities without cacheable collections, and tests.
pub struct NoopCacheFetcher;

#[async_trait]
impl CacheFetcher for NoopCacheFetcher {
    async fn fetch_caches(
        &self,
        _collection: DatawalletCollection,
        _ids: &[ObjectId],
    ) -> anyhow::Result<Vec<(ObjectId, serde_json::Value)>> {
        Ok(Vec::new())
    }
}

/// Fetch caches for a set of objects spread over several collections.
///
/// Non-cacheable collections are skipped; unresolved ids are logged.
pub async fn fetch_grouped(
    fetcher: &dyn CacheFetcher,
    wanted: BTreeMap<DatawalletCollection, Vec<ObjectId>>,
) -> Result<HashMap<(DatawalletCollection, ObjectId), serde_json::Value>, SyncError> {
    let mut caches = HashMap::new();
    for (collection, ids) in wanted {
        if ids.is_empty() || !collection.is_cacheable() {
            continue;
        }
        let fetched = fetcher
            .fetch_caches(collection, &ids)
            .await
            .map_err(SyncError::from_anyhow)?;

        if fetched.len() < ids.len() {
            warn!(
                %collection,
                requested = ids.len(),
                resolved = fetched.len(),
                "some caches could not be resolved"
            );
        }
        for (id, cache) in fetched {
            caches.insert((collection, id), cache);
        }
    }
    Ok(caches)
}
