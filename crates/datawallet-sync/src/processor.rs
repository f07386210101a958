//! Applying a pulled, decrypted batch of modifications to local documents.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use datawallet_types::{ChangedItem, ChangedItems, DatawalletCollection, ModificationKind, ObjectId};
use serde_json::Value;
use tracing::{debug, trace};

use crate::cache::{CacheFetcher, fetch_grouped};
use crate::codec::DecryptedModification;
use crate::collection::shallow_merge;
use crate::constants::CACHE_FIELD;
use crate::store::CollectionStore;

/// Applies a batch of log entries, in index order, to local state.
#[async_trait]
pub trait ModificationProcessor: Send + Sync {
    async fn process(
        &self,
        batch: Vec<DecryptedModification>,
        caches: &dyn CacheFetcher,
    ) -> anyhow::Result<ChangedItems>;
}

/// Default processor over a [`CollectionStore`].
///
/// - A Delete anywhere in the batch suppresses Creates and Updates of the
///   same object: the object ends up deleted.
/// - Creates and Updates shallow-merge their payload into the stored document.
/// - Newly created objects of cacheable collections get their cache fetched
///   and stored under `cache`.
pub struct CollectionProcessor {
    documents: Arc<dyn CollectionStore>,
}

impl CollectionProcessor {
    pub fn new(documents: Arc<dyn CollectionStore>) -> Self {
        Self { documents }
    }
}

type ObjectKey = (DatawalletCollection, ObjectId);

#[async_trait]
impl ModificationProcessor for CollectionProcessor {
    async fn process(
        &self,
        batch: Vec<DecryptedModification>,
        caches: &dyn CacheFetcher,
    ) -> anyhow::Result<ChangedItems> {
        let deleted: BTreeSet<ObjectKey> = batch
            .iter()
            .filter(|m| m.kind == ModificationKind::Delete)
            .map(|m| (m.collection, m.object_identifier.clone()))
            .collect();

        let mut staged: BTreeMap<ObjectKey, Value> = BTreeMap::new();
        let mut created: BTreeMap<DatawalletCollection, Vec<ObjectId>> = BTreeMap::new();

        for modification in batch {
            let key = (modification.collection, modification.object_identifier);
            if deleted.contains(&key) {
                trace!(collection = %key.0, id = %key.1, "skipping entry of deleted object");
                continue;
            }
            let Some(payload) = modification.payload else {
                continue;
            };

            let mut document = match staged.remove(&key) {
                Some(doc) => doc,
                None => self
                    .documents
                    .read(key.0, &key.1)?
                    .unwrap_or_else(|| Value::Object(Default::default())),
            };
            shallow_merge(&mut document, &payload);

            if modification.kind == ModificationKind::Create && key.0.is_cacheable() {
                let ids = created.entry(key.0).or_default();
                if !ids.contains(&key.1) {
                    ids.push(key.1.clone());
                }
            }
            staged.insert(key, document);
        }

        let mut changed = ChangedItems::new();

        for (collection, id) in &deleted {
            self.documents.delete(*collection, id)?;
            changed.insert(ChangedItem::new(*collection, id.clone()));
        }

        let fetched: HashMap<ObjectKey, Value> = fetch_grouped(caches, created).await?;
        for (key, mut document) in staged {
            if let Some(cache) = fetched.get(&key) {
                if let Some(fields) = document.as_object_mut() {
                    fields.insert(CACHE_FIELD.to_string(), cache.clone());
                }
            }
            self.documents.write(key.0, &key.1, &document)?;
            changed.insert(ChangedItem::new(key.0, key.1));
        }

        debug!(changed = changed.len(), deleted = deleted.len(), "processed modification batch");
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCacheFetcher;
    use crate::store::MemoryStore;
    use datawallet_types::{
        BackboneModificationId, DatawalletVersion, ModificationIndex, PayloadCategory,
    };
    use serde_json::json;

    fn entry(
        index: u64,
        collection: DatawalletCollection,
        id: &str,
        kind: ModificationKind,
        payload: Option<Value>,
    ) -> DecryptedModification {
        DecryptedModification {
            id: BackboneModificationId::new(format!("DWM{index}")),
            index: ModificationIndex::new(index),
            object_identifier: ObjectId::new(id),
            payload_category: payload.as_ref().map(|_| PayloadCategory::TechnicalData),
            collection,
            kind,
            payload,
            datawallet_version: DatawalletVersion::new(1),
            local_id: None,
        }
    }

    struct EchoFetcher;

    #[async_trait]
    impl CacheFetcher for EchoFetcher {
        async fn fetch_caches(
            &self,
            _collection: DatawalletCollection,
            ids: &[ObjectId],
        ) -> anyhow::Result<Vec<(ObjectId, Value)>> {
            Ok(ids.iter().map(|id| (id.clone(), json!({ "of": id.as_str() }))).collect())
        }
    }

    #[tokio::test]
    async fn test_create_then_update_merges() {
        let store = Arc::new(MemoryStore::new());
        let processor = CollectionProcessor::new(store.clone());

        let changed = processor
            .process(
                vec![
                    entry(
                        0,
                        DatawalletCollection::Attributes,
                        "ATT1",
                        ModificationKind::Create,
                        Some(json!({ "value": "A" })),
                    ),
                    entry(
                        1,
                        DatawalletCollection::Attributes,
                        "ATT1",
                        ModificationKind::Update,
                        Some(json!({ "shared": true })),
                    ),
                ],
                &NoopCacheFetcher,
            )
            .await
            .unwrap();

        assert_eq!(changed.len(), 1);
        assert_eq!(
            store.read(DatawalletCollection::Attributes, &"ATT1".into()).unwrap(),
            Some(json!({ "value": "A", "shared": true }))
        );
    }

    #[tokio::test]
    async fn test_delete_suppresses_create_in_same_batch() {
        let store = Arc::new(MemoryStore::new());
        store
            .write(DatawalletCollection::Files, &"FIL0".into(), &json!({ "old": true }))
            .unwrap();
        let processor = CollectionProcessor::new(store.clone());

        let changed = processor
            .process(
                vec![
                    entry(
                        0,
                        DatawalletCollection::Files,
                        "FIL1",
                        ModificationKind::Create,
                        Some(json!({ "n": 1 })),
                    ),
                    entry(1, DatawalletCollection::Files, "FIL1", ModificationKind::Delete, None),
                    entry(2, DatawalletCollection::Files, "FIL0", ModificationKind::Delete, None),
                ],
                &EchoFetcher,
            )
            .await
            .unwrap();

        assert!(store.list(DatawalletCollection::Files).unwrap().is_empty());
        assert!(changed.contains(&ChangedItem::new(DatawalletCollection::Files, "FIL0")));
        assert!(changed.contains(&ChangedItem::new(DatawalletCollection::Files, "FIL1")));
    }

    #[tokio::test]
    async fn test_created_cacheable_objects_get_cache() {
        let store = Arc::new(MemoryStore::new());
        let processor = CollectionProcessor::new(store.clone());

        processor
            .process(
                vec![
                    entry(
                        0,
                        DatawalletCollection::Messages,
                        "MSG1",
                        ModificationKind::Create,
                        Some(json!({ "ref": "x" })),
                    ),
                    entry(
                        1,
                        DatawalletCollection::Settings,
                        "SET1",
                        ModificationKind::Create,
                        Some(json!({ "k": "v" })),
                    ),
                ],
                &EchoFetcher,
            )
            .await
            .unwrap();

        let message = store
            .read(DatawalletCollection::Messages, &"MSG1".into())
            .unwrap()
            .unwrap();
        assert_eq!(message["cache"], json!({ "of": "MSG1" }));

        let setting = store
            .read(DatawalletCollection::Settings, &"SET1".into())
            .unwrap()
            .unwrap();
        assert!(setting.get("cache").is_none());
    }
}
