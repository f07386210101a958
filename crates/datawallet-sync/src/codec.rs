//! Translation between wire log entries and typed modifications.
//!
//! ```text
//! pull:  WireModification --decode--> RemoteModification --open--> DecryptedModification
//! push:  LocalModification --seal_batch--> WireModificationCreate
//! ```
//!
//! Decoding classifies kind, payload category and collection against their
//! closed sets and rejects anything else with a typed error.

use datawallet_types::{
    BackboneModificationId, DatawalletCollection, DatawalletVersion, LocalModification,
    LocalModificationId, ModificationIndex, ModificationKind, ObjectId, PayloadCategory,
};

use crate::backbone::{WireModification, WireModificationCreate};
use crate::error::SyncError;
use crate::secrets::{DatawalletSecrets, OpenedPayload, SealedPayload};

/// A decoded, still encrypted log entry.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteModification {
    pub id: BackboneModificationId,
    pub index: ModificationIndex,
    pub object_identifier: ObjectId,
    pub payload_category: Option<PayloadCategory>,
    pub collection: DatawalletCollection,
    pub kind: ModificationKind,
    pub payload: Option<SealedPayload>,
    pub datawallet_version: DatawalletVersion,
    pub local_id: Option<LocalModificationId>,
}

/// A log entry with its payload opened, ready for the processor.
#[derive(Clone, Debug, PartialEq)]
pub struct DecryptedModification {
    pub id: BackboneModificationId,
    pub index: ModificationIndex,
    pub object_identifier: ObjectId,
    pub payload_category: Option<PayloadCategory>,
    pub collection: DatawalletCollection,
    pub kind: ModificationKind,
    pub payload: Option<serde_json::Value>,
    pub datawallet_version: DatawalletVersion,
    /// Queue id of the device that wrote the entry, when it sent one.
    pub local_id: Option<LocalModificationId>,
}

/// Classify a wire entry.
pub fn decode(wire: WireModification) -> Result<RemoteModification, SyncError> {
    let collection = DatawalletCollection::from_str(&wire.collection)
        .ok_or_else(|| SyncError::UnsupportedCollection(wire.collection.clone()))?;
    let kind = ModificationKind::from_str(&wire.kind)
        .ok_or_else(|| SyncError::UnsupportedModificationKind(wire.kind.clone()))?;
    let payload_category = wire
        .payload_category
        .as_deref()
        .map(|c| {
            PayloadCategory::from_str(c)
                .ok_or_else(|| SyncError::UnsupportedPayloadCategory(c.to_string()))
        })
        .transpose()?;

    let payload = match (kind.carries_payload(), wire.encrypted_payload.as_deref()) {
        (true, Some(encoded)) => Some(SealedPayload::from_base64(wire.index, encoded)?),
        (true, None) => return Err(SyncError::MissingPayload { index: wire.index }),
        (false, _) => None,
    };

    Ok(RemoteModification {
        id: wire.id,
        index: wire.index,
        object_identifier: ObjectId::new(wire.object_identifier),
        payload_category,
        collection,
        kind,
        payload,
        datawallet_version: wire.datawallet_version,
        local_id: wire.local_id,
    })
}

impl RemoteModification {
    /// Open the payload at this entry's own index.
    pub async fn open(
        self,
        secrets: &dyn DatawalletSecrets,
    ) -> Result<DecryptedModification, SyncError> {
        let payload = match &self.payload {
            Some(sealed) => Some(secrets.open(sealed).await?.into_parts().1),
            None => None,
        };
        Ok(DecryptedModification {
            id: self.id,
            index: self.index,
            object_identifier: self.object_identifier,
            payload_category: self.payload_category,
            collection: self.collection,
            kind: self.kind,
            payload,
            datawallet_version: self.datawallet_version,
            local_id: self.local_id,
        })
    }
}

/// Seal a queued batch for submission directly after `after_index`.
///
/// Entry `i` is sealed for index `after_index + 1 + i`, which is exactly the
/// index the backbone assigns when it accepts the batch at that position.
pub async fn seal_batch(
    modifications: &[LocalModification],
    after_index: Option<ModificationIndex>,
    secrets: &dyn DatawalletSecrets,
) -> Result<Vec<WireModificationCreate>, SyncError> {
    let mut out = Vec::with_capacity(modifications.len());
    for (modification, index) in modifications
        .iter()
        .zip(ModificationIndex::range_after(after_index, modifications.len()))
    {
        let encrypted_payload = match &modification.payload {
            Some(value) if modification.kind.carries_payload() => {
                let sealed = secrets
                    .seal(OpenedPayload::new(index, value.clone()))
                    .await?;
                Some(sealed.to_base64())
            }
            _ => None,
        };
        out.push(WireModificationCreate {
            object_identifier: modification.object_identifier.as_str().to_string(),
            payload_category: modification
                .payload_category
                .map(|c| c.as_str().to_string()),
            collection: modification.collection.as_str().to_string(),
            kind: modification.kind.as_str().to_string(),
            encrypted_payload,
            datawallet_version: modification.datawallet_version,
            local_id: Some(modification.local_id),
        });
    }
    Ok(out)
}
