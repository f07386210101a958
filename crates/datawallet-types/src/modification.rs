//! Modification kinds, payload categories, collections and the local
//! (not-yet-pushed) modification record.
//!
//! Wire tags are exact, case-sensitive strings (`"Create"`,
//! `"TechnicalData"`, `"Relationships"`). Parsing goes through strum's
//! `EnumString`; anything outside the closed set is rejected by the codec.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::{LocalModificationId, ObjectId};
use crate::version::DatawalletVersion;

/// What a modification does to its target object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
pub enum ModificationKind {
    Create,
    Update,
    Delete,
}

impl ModificationKind {
    /// Parse a wire tag.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationKind::Create => "Create",
            ModificationKind::Update => "Update",
            ModificationKind::Delete => "Delete",
        }
    }

    /// Create and Update carry a payload; Delete never does.
    pub fn carries_payload(&self) -> bool {
        !matches!(self, ModificationKind::Delete)
    }
}

impl std::fmt::Display for ModificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which slice of an object a payload holds.
///
/// Objects are split so that, e.g., user-edited metadata can be updated
/// without resending technical data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
pub enum PayloadCategory {
    /// Data needed to operate the object (keys, references, status).
    TechnicalData,
    /// The object's primary content (e.g. an attribute value).
    Content,
    /// Data the user attached (labels, notes).
    Userdata,
    /// Local bookkeeping (read flags, timestamps).
    Metadata,
}

impl PayloadCategory {
    pub const ALL: [PayloadCategory; 4] = [
        PayloadCategory::TechnicalData,
        PayloadCategory::Content,
        PayloadCategory::Userdata,
        PayloadCategory::Metadata,
    ];

    /// Parse a wire tag.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadCategory::TechnicalData => "TechnicalData",
            PayloadCategory::Content => "Content",
            PayloadCategory::Userdata => "Userdata",
            PayloadCategory::Metadata => "Metadata",
        }
    }
}

impl std::fmt::Display for PayloadCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The synchronized collections a modification may target.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
)]
pub enum DatawalletCollection {
    Relationships,
    Messages,
    Files,
    Tokens,
    RelationshipTemplates,
    Attributes,
    Requests,
    Identity,
    Settings,
}

impl DatawalletCollection {
    pub const ALL: [DatawalletCollection; 9] = [
        DatawalletCollection::Relationships,
        DatawalletCollection::Messages,
        DatawalletCollection::Files,
        DatawalletCollection::Tokens,
        DatawalletCollection::RelationshipTemplates,
        DatawalletCollection::Attributes,
        DatawalletCollection::Requests,
        DatawalletCollection::Identity,
        DatawalletCollection::Settings,
    ];

    /// Parse a wire name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatawalletCollection::Relationships => "Relationships",
            DatawalletCollection::Messages => "Messages",
            DatawalletCollection::Files => "Files",
            DatawalletCollection::Tokens => "Tokens",
            DatawalletCollection::RelationshipTemplates => "RelationshipTemplates",
            DatawalletCollection::Attributes => "Attributes",
            DatawalletCollection::Requests => "Requests",
            DatawalletCollection::Identity => "Identity",
            DatawalletCollection::Settings => "Settings",
        }
    }

    /// Collections whose objects mirror a live backbone resource.
    ///
    /// Their technical data only holds references; the readable content
    /// (the "cache") has to be fetched and decrypted separately.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            DatawalletCollection::Relationships
                | DatawalletCollection::Messages
                | DatawalletCollection::Files
                | DatawalletCollection::Tokens
                | DatawalletCollection::RelationshipTemplates
        )
    }
}

impl std::fmt::Display for DatawalletCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A mutation of local state waiting to be pushed to the shared log.
///
/// Created by the write path, persisted in the unpushed queue, and consumed
/// (encrypted, sent, deleted) by a push. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalModification {
    pub local_id: LocalModificationId,
    pub object_identifier: ObjectId,
    pub payload_category: Option<PayloadCategory>,
    pub collection: DatawalletCollection,
    pub kind: ModificationKind,
    pub payload: Option<serde_json::Value>,
    pub datawallet_version: DatawalletVersion,
}

impl LocalModification {
    /// A Create or Update of one payload category.
    pub fn write(
        kind: ModificationKind,
        collection: DatawalletCollection,
        object_identifier: ObjectId,
        category: PayloadCategory,
        payload: serde_json::Value,
        datawallet_version: DatawalletVersion,
    ) -> Self {
        debug_assert!(kind.carries_payload());
        Self {
            local_id: LocalModificationId::new(),
            object_identifier,
            payload_category: Some(category),
            collection,
            kind,
            payload: Some(payload),
            datawallet_version,
        }
    }

    /// A Delete of a whole object.
    pub fn delete(
        collection: DatawalletCollection,
        object_identifier: ObjectId,
        datawallet_version: DatawalletVersion,
    ) -> Self {
        Self {
            local_id: LocalModificationId::new(),
            object_identifier,
            payload_category: None,
            collection,
            kind: ModificationKind::Delete,
            payload: None,
            datawallet_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags_are_exact() {
        assert_eq!(ModificationKind::from_str("Create"), Some(ModificationKind::Create));
        assert_eq!(ModificationKind::from_str("create"), None);
        assert_eq!(
            PayloadCategory::from_str("TechnicalData"),
            Some(PayloadCategory::TechnicalData)
        );
        assert_eq!(PayloadCategory::from_str("Cache"), None);
        assert_eq!(
            DatawalletCollection::from_str("RelationshipTemplates"),
            Some(DatawalletCollection::RelationshipTemplates)
        );
        assert_eq!(DatawalletCollection::from_str("Unknown"), None);
    }

    #[test]
    fn test_as_str_roundtrips_through_from_str() {
        for c in DatawalletCollection::ALL {
            assert_eq!(DatawalletCollection::from_str(c.as_str()), Some(c));
        }
        for c in PayloadCategory::ALL {
            assert_eq!(PayloadCategory::from_str(c.as_str()), Some(c));
        }
    }

    #[test]
    fn test_delete_has_no_payload() {
        let m = LocalModification::delete(
            DatawalletCollection::Files,
            ObjectId::new("FIL1"),
            DatawalletVersion::new(2),
        );
        assert!(m.payload.is_none());
        assert!(m.payload_category.is_none());
        assert!(!m.kind.carries_payload());
    }

    #[test]
    fn test_cacheable_collections() {
        assert!(DatawalletCollection::Messages.is_cacheable());
        assert!(!DatawalletCollection::Attributes.is_cacheable());
        assert!(!DatawalletCollection::Settings.is_cacheable());
    }
}
