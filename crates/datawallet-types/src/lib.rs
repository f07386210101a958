//! Shared types for the datawallet synchronization engine.
//!
//! This crate is the vocabulary the engine and its collaborators share:
//! typed ids, schema versions, log indices, modification/event enums and the
//! changed-item set a sync reports. It has **no internal dependencies**; a
//! pure leaf crate that other crates build on.
//!
//! # Key Types
//!
//! |--------------------------|-----------------------------------------------|
//! | Type                     | Purpose                                       |
//! |--------------------------|-----------------------------------------------|
//! | [`LocalModification`]    | Queued local write, not yet pushed            |
//! | [`ModificationIndex`]    | Position in the identity's shared log         |
//! | [`DatawalletVersion`]    | Schema version (identity or device axis)      |
//! | [`ExternalEvent`]        | Backbone notification retrieved in a run      |
//! | [`ExternalEventResult`]  | Per-event outcome reported on finalize        |
//! | [`ChangedItems`]         | What a sync touched locally                   |
//! | [`SyncScope`]            | `Everything` or `OnlyDatawallet`              |
//! |--------------------------|-----------------------------------------------|

pub mod changes;
pub mod event;
pub mod ids;
pub mod modification;
pub mod scope;
pub mod version;

// Re-export primary types at crate root for convenience.
pub use changes::{ChangedItem, ChangedItems};
pub use event::{ExternalEvent, ExternalEventResult, ExternalEventType, SyncRunKind};
pub use ids::{
    BackboneModificationId, ExternalEventId, IdentityAddress, LocalModificationId, ObjectId,
    SyncRunId,
};
pub use modification::{DatawalletCollection, LocalModification, ModificationKind, PayloadCategory};
pub use scope::SyncScope;
pub use version::{DatawalletVersion, ModificationIndex};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
