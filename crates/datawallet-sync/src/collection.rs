//! The write path collaborators use for synchronized objects.
//!
//! A [`SynchronizedCollection`] writes the document locally and, when the
//! datawallet is enabled, queues one [`LocalModification`] per payload
//! category it touched (or one Delete). Documents are flat JSON objects; each
//! category contributes a disjoint set of top-level fields.

use std::sync::Arc;

use datawallet_types::{
    DatawalletCollection, DatawalletVersion, LocalModification, ModificationKind, ObjectId,
    PayloadCategory,
};
use serde_json::Value;
use tracing::trace;

use crate::error::SyncError;
use crate::store::{CollectionStore, CursorKey, SyncStore};

/// Shallow-merge the top-level fields of `part` into `document`.
///
/// A non-object `document` is replaced by an empty object first; a non-object
/// `part` replaces the document outright.
pub fn shallow_merge(document: &mut Value, part: &Value) {
    let Some(fields) = part.as_object() else {
        *document = part.clone();
        return;
    };
    if !document.is_object() {
        *document = Value::Object(Default::default());
    }
    if let Some(target) = document.as_object_mut() {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
}

pub struct SynchronizedCollection {
    collection: DatawalletCollection,
    documents: Arc<dyn CollectionStore>,
    queue: Option<Arc<dyn SyncStore>>,
    stamp: Option<DatawalletVersion>,
}

impl SynchronizedCollection {
    /// `queue` is `None` when the datawallet is disabled for the identity.
    pub fn new(
        collection: DatawalletCollection,
        documents: Arc<dyn CollectionStore>,
        queue: Option<Arc<dyn SyncStore>>,
    ) -> Self {
        Self {
            collection,
            documents,
            queue,
            stamp: None,
        }
    }

    /// Stamp queued modifications with `version` instead of the device's
    /// current version. Migrations write under the version they migrate to.
    pub fn stamped(mut self, version: DatawalletVersion) -> Self {
        self.stamp = Some(version);
        self
    }

    pub fn name(&self) -> DatawalletCollection {
        self.collection
    }

    pub fn read(&self, id: &ObjectId) -> Result<Option<Value>, SyncError> {
        Ok(self.documents.read(self.collection, id)?)
    }

    pub fn list(&self) -> Result<Vec<(ObjectId, Value)>, SyncError> {
        Ok(self.documents.list(self.collection)?)
    }

    pub fn create(
        &self,
        id: &ObjectId,
        parts: Vec<(PayloadCategory, Value)>,
    ) -> Result<(), SyncError> {
        let mut document = Value::Object(Default::default());
        for (_, part) in &parts {
            shallow_merge(&mut document, part);
        }
        self.documents.write(self.collection, id, &document)?;
        self.record(ModificationKind::Create, id, parts)
    }

    /// Merge `parts` into the stored document. Only the given categories are
    /// queued.
    pub fn update(
        &self,
        id: &ObjectId,
        parts: Vec<(PayloadCategory, Value)>,
    ) -> Result<(), SyncError> {
        let mut document = self
            .documents
            .read(self.collection, id)?
            .unwrap_or_else(|| Value::Object(Default::default()));
        for (_, part) in &parts {
            shallow_merge(&mut document, part);
        }
        self.documents.write(self.collection, id, &document)?;
        self.record(ModificationKind::Update, id, parts)
    }

    pub fn delete(&self, id: &ObjectId) -> Result<bool, SyncError> {
        let existed = self.documents.delete(self.collection, id)?;
        if let Some(queue) = &self.queue {
            let version = self.version(queue.as_ref())?;
            queue.enqueue(&LocalModification::delete(self.collection, id.clone(), version))?;
        }
        Ok(existed)
    }

    fn record(
        &self,
        kind: ModificationKind,
        id: &ObjectId,
        parts: Vec<(PayloadCategory, Value)>,
    ) -> Result<(), SyncError> {
        let Some(queue) = &self.queue else {
            return Ok(());
        };
        let version = self.version(queue.as_ref())?;
        for (category, payload) in parts {
            trace!(collection = %self.collection, %id, %category, %kind, "queueing modification");
            queue.enqueue(&LocalModification::write(
                kind,
                self.collection,
                id.clone(),
                category,
                payload,
                version,
            ))?;
        }
        Ok(())
    }

    fn version(&self, queue: &dyn SyncStore) -> Result<DatawalletVersion, SyncError> {
        match self.stamp {
            Some(v) => Ok(v),
            None => Ok(queue
                .version(CursorKey::DeviceDatawalletVersion)?
                .unwrap_or(DatawalletVersion::ZERO)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn setup(enabled: bool) -> (Arc<MemoryStore>, SynchronizedCollection) {
        let store = Arc::new(MemoryStore::new());
        let queue: Option<Arc<dyn SyncStore>> =
            enabled.then(|| store.clone() as Arc<dyn SyncStore>);
        let collection =
            SynchronizedCollection::new(DatawalletCollection::Attributes, store.clone(), queue);
        (store, collection)
    }

    #[test]
    fn test_shallow_merge() {
        let mut doc = json!({ "a": 1, "b": 2 });
        shallow_merge(&mut doc, &json!({ "b": 3, "c": 4 }));
        assert_eq!(doc, json!({ "a": 1, "b": 3, "c": 4 }));

        let mut scalar = json!(5);
        shallow_merge(&mut scalar, &json!({ "x": true }));
        assert_eq!(scalar, json!({ "x": true }));
    }

    #[test]
    fn test_create_queues_one_modification_per_category() {
        let (store, attributes) = setup(true);
        store
            .set_version(CursorKey::DeviceDatawalletVersion, DatawalletVersion::new(2))
            .unwrap();

        let id = ObjectId::new("ATT1");
        attributes
            .create(
                &id,
                vec![
                    (PayloadCategory::TechnicalData, json!({ "owner": "did:e:a" })),
                    (PayloadCategory::Content, json!({ "value": "Alice" })),
                ],
            )
            .unwrap();

        assert_eq!(
            attributes.read(&id).unwrap(),
            Some(json!({ "owner": "did:e:a", "value": "Alice" }))
        );
        let queued = store.unpushed().unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued.iter().all(|m| m.kind == ModificationKind::Create));
        assert!(queued.iter().all(|m| m.datawallet_version == DatawalletVersion::new(2)));
        assert_eq!(queued[1].payload_category, Some(PayloadCategory::Content));
    }

    #[test]
    fn test_update_and_delete() {
        let (store, attributes) = setup(true);
        let id = ObjectId::new("ATT1");
        attributes
            .create(&id, vec![(PayloadCategory::Content, json!({ "value": "A" }))])
            .unwrap();
        attributes
            .update(&id, vec![(PayloadCategory::Metadata, json!({ "read": true }))])
            .unwrap();
        assert_eq!(attributes.read(&id).unwrap(), Some(json!({ "value": "A", "read": true })));

        assert!(attributes.delete(&id).unwrap());
        let kinds: Vec<_> = store.unpushed().unwrap().iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ModificationKind::Create,
                ModificationKind::Update,
                ModificationKind::Delete
            ]
        );
    }

    #[test]
    fn test_disabled_datawallet_queues_nothing() {
        let (store, attributes) = setup(false);
        let id = ObjectId::new("ATT1");
        attributes
            .create(&id, vec![(PayloadCategory::Content, json!({ "value": "A" }))])
            .unwrap();
        assert!(attributes.read(&id).unwrap().is_some());
        assert_eq!(store.unpushed_count().unwrap(), 0);
    }

    #[test]
    fn test_stamped_version_wins() {
        let (store, attributes) = setup(true);
        let attributes = attributes.stamped(DatawalletVersion::new(7));
        attributes.delete(&ObjectId::new("ATT1")).unwrap();
        assert_eq!(
            store.unpushed().unwrap()[0].datawallet_version,
            DatawalletVersion::new(7)
        );
    }
}
