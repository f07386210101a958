//! The set of local items a synchronization touched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;
use crate::modification::DatawalletCollection;

/// One local object that changed during a sync.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedItem {
    pub collection: DatawalletCollection,
    pub id: ObjectId,
}

impl ChangedItem {
    pub fn new(collection: DatawalletCollection, id: impl Into<ObjectId>) -> Self {
        Self { collection, id: id.into() }
    }
}

/// Deduplicated, ordered set of [`ChangedItem`]s.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangedItems(BTreeSet<ChangedItem>);

impl ChangedItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: ChangedItem) -> bool {
        self.0.insert(item)
    }

    /// Fold another set into this one.
    pub fn merge(&mut self, other: ChangedItems) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, item: &ChangedItem) -> bool {
        self.0.contains(item)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangedItem> {
        self.0.iter()
    }

    /// Items of a single collection.
    pub fn in_collection(
        &self,
        collection: DatawalletCollection,
    ) -> impl Iterator<Item = &ObjectId> {
        self.0.iter().filter(move |i| i.collection == collection).map(|i| &i.id)
    }
}

impl FromIterator<ChangedItem> for ChangedItems {
    fn from_iter<I: IntoIterator<Item = ChangedItem>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<ChangedItem> for ChangedItems {
    fn extend<I: IntoIterator<Item = ChangedItem>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for ChangedItems {
    type Item = ChangedItem;
    type IntoIter = std::collections::btree_set::IntoIter<ChangedItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
