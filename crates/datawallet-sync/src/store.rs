//! Local persistence boundary.
//!
//! Two traits split what the engine owns from what collaborators own:
//!
//! - [`SyncStore`]: the unpushed-modification queue and the cursor map. The
//!   queue is drained only by the controller; cursors are written only after
//!   the backbone acknowledged the step they record.
//! - [`CollectionStore`]: the synchronized documents themselves, keyed by
//!   collection and object id.
//!
//! [`MemoryStore`] implements both in memory; [`SqliteStore`](crate::SqliteStore)
//! persists them.

use std::collections::{BTreeMap, HashMap};

use datawallet_types::{
    DatawalletCollection, DatawalletVersion, LocalModification, LocalModificationId,
    ModificationIndex, ObjectId, SyncScope,
};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Keys of the durable cursor map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CursorKey {
    /// Last log index applied to (or pushed from) this device.
    LocalModificationIndex,
    /// Schema version this device's local state has been migrated to.
    DeviceDatawalletVersion,
    /// Identity schema version as last acknowledged by the backbone.
    IdentityDatawalletVersion,
    /// Unix millis of the last successful sync of a scope.
    LastCompletedSync(SyncScope),
}

impl CursorKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorKey::LocalModificationIndex => "localDatawalletModificationIndex",
            CursorKey::DeviceDatawalletVersion => "deviceDatawalletVersion",
            CursorKey::IdentityDatawalletVersion => "identityDatawalletVersion",
            CursorKey::LastCompletedSync(SyncScope::Everything) => "lastCompletedSyncEverything",
            CursorKey::LastCompletedSync(SyncScope::OnlyDatawallet) => {
                "lastCompletedSyncDatawallet"
            }
        }
    }
}

/// The engine's own durable state.
pub trait SyncStore: Send + Sync {
    /// Append a modification to the unpushed queue.
    fn enqueue(&self, modification: &LocalModification) -> Result<(), StoreError>;

    /// Every queued modification, oldest first.
    fn unpushed(&self) -> Result<Vec<LocalModification>, StoreError>;

    fn unpushed_count(&self) -> Result<usize, StoreError>;

    /// Drop pushed modifications from the queue. Unknown ids are ignored.
    fn delete_unpushed(&self, ids: &[LocalModificationId]) -> Result<(), StoreError>;

    fn cursor(&self, key: CursorKey) -> Result<Option<i64>, StoreError>;

    fn set_cursor(&self, key: CursorKey, value: i64) -> Result<(), StoreError>;

    /// Last log index this device has consumed.
    fn local_index(&self) -> Result<Option<ModificationIndex>, StoreError> {
        Ok(self
            .cursor(CursorKey::LocalModificationIndex)?
            .map(|v| ModificationIndex::new(v as u64)))
    }

    /// Move the local index forward. Never moves it backwards.
    fn advance_local_index(&self, index: ModificationIndex) -> Result<(), StoreError> {
        if self.local_index()?.is_some_and(|current| current >= index) {
            return Ok(());
        }
        self.set_cursor(CursorKey::LocalModificationIndex, index.get() as i64)
    }

    fn version(&self, key: CursorKey) -> Result<Option<DatawalletVersion>, StoreError> {
        Ok(self.cursor(key)?.map(|v| DatawalletVersion::new(v as u32)))
    }

    fn set_version(&self, key: CursorKey, version: DatawalletVersion) -> Result<(), StoreError> {
        self.set_cursor(key, i64::from(version.get()))
    }
}

/// Storage for the synchronized documents.
pub trait CollectionStore: Send + Sync {
    fn read(
        &self,
        collection: DatawalletCollection,
        id: &ObjectId,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    fn write(
        &self,
        collection: DatawalletCollection,
        id: &ObjectId,
        document: &serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Returns whether a document was removed.
    fn delete(&self, collection: DatawalletCollection, id: &ObjectId) -> Result<bool, StoreError>;

    /// All documents of a collection, ordered by id.
    fn list(
        &self,
        collection: DatawalletCollection,
    ) -> Result<Vec<(ObjectId, serde_json::Value)>, StoreError>;
}

/// In-memory [`SyncStore`] and [`CollectionStore`].
#[derive(Default)]
pub struct MemoryStore {
    queue: Mutex<Vec<LocalModification>>,
    cursors: Mutex<HashMap<CursorKey, i64>>,
    documents: RwLock<HashMap<DatawalletCollection, BTreeMap<ObjectId, serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStore for MemoryStore {
    fn enqueue(&self, modification: &LocalModification) -> Result<(), StoreError> {
        self.queue.lock().push(modification.clone());
        Ok(())
    }

    fn unpushed(&self) -> Result<Vec<LocalModification>, StoreError> {
        Ok(self.queue.lock().clone())
    }

    fn unpushed_count(&self) -> Result<usize, StoreError> {
        Ok(self.queue.lock().len())
    }

    fn delete_unpushed(&self, ids: &[LocalModificationId]) -> Result<(), StoreError> {
        self.queue.lock().retain(|m| !ids.contains(&m.local_id));
        Ok(())
    }

    fn cursor(&self, key: CursorKey) -> Result<Option<i64>, StoreError> {
        Ok(self.cursors.lock().get(&key).copied())
    }

    fn set_cursor(&self, key: CursorKey, value: i64) -> Result<(), StoreError> {
        self.cursors.lock().insert(key, value);
        Ok(())
    }
}

impl CollectionStore for MemoryStore {
    fn read(
        &self,
        collection: DatawalletCollection,
        id: &ObjectId,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self
            .documents
            .read()
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn write(
        &self,
        collection: DatawalletCollection,
        id: &ObjectId,
        document: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.documents
            .write()
            .entry(collection)
            .or_default()
            .insert(id.clone(), document.clone());
        Ok(())
    }

    fn delete(&self, collection: DatawalletCollection, id: &ObjectId) -> Result<bool, StoreError> {
        Ok(self
            .documents
            .write()
            .get_mut(&collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }

    fn list(
        &self,
        collection: DatawalletCollection,
    ) -> Result<Vec<(ObjectId, serde_json::Value)>, StoreError> {
        Ok(self
            .documents
            .read()
            .get(&collection)
            .map(|docs| docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
