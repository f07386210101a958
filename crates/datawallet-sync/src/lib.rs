//! # datawallet-sync
//!
//! Client-side synchronization of an identity's datawallet.
//!
//! A [`SyncController`] keeps one device's local state consistent with the
//! backbone:
//! - External events the backbone collected for the identity are applied
//!   through an [`ApplierRegistry`], each one failing on its own.
//! - The identity's encrypted modification log is pulled, decrypted and
//!   processed in index order, and local writes queued by
//!   [`SynchronizedCollection`]s are sealed and pushed.
//! - Schema versions advance one step at a time on both the identity and the
//!   device axis through registered [`Migration`]s.
//!
//! Concurrent `sync` calls share one physical synchronization; see
//! [`controller`] for how scopes fold onto each other.
//!
//! # Modules
//!
//! |----------------|---------------------------------------------------------|
//! | Module         | Purpose                                                 |
//! |----------------|---------------------------------------------------------|
//! | [`controller`] | Single-flight entry point and builder                   |
//! | [`backbone`]   | Backbone trait and wire types                           |
//! | [`codec`]      | Log entry decoding, payload sealing/opening             |
//! | [`secrets`]    | Per-index payload encryption                            |
//! | [`appliers`]   | External-event appliers by event type                   |
//! | [`processor`]  | Applying pulled modifications to documents              |
//! | [`cache`]      | Fetching caches of cacheable objects                    |
//! | [`migrations`] | Identity and device migration tables                    |
//! | [`collection`] | Local write path that queues modifications              |
//! | [`store`]      | Persistence traits, in-memory store                     |
//! | [`db`]         | SQLite store                                            |
//! | [`config`]     | TOML configuration                                      |
//! |----------------|---------------------------------------------------------|

pub mod appliers;
pub mod backbone;
pub mod cache;
pub mod codec;
pub mod collection;
pub mod config;
pub mod constants;
pub mod controller;
pub mod db;
pub mod error;
pub mod events;
pub mod migrations;
pub mod processor;
pub mod secrets;
pub mod store;

mod engine;

pub use appliers::{ApplierRegistry, ExternalEventApplier};
pub use backbone::{
    Backbone, BackboneError, CreateDatawalletModificationsRequest,
    CreateDatawalletModificationsResponse, DatawalletInfo, FinalizeDatawalletVersionUpgradeRequest,
    FinalizeDatawalletVersionUpgradeResponse, FinalizeExternalEventSyncRequest,
    FinalizeExternalEventSyncResponse, INSUFFICIENT_VERSION_CODE, OUTDATED_INDEX_CODE, Page,
    PageRequest, StartSyncRunResponse, StartSyncRunStatus, WireModification,
    WireModificationCreate,
};
pub use cache::{CacheFetcher, NoopCacheFetcher};
pub use codec::{DecryptedModification, RemoteModification};
pub use collection::SynchronizedCollection;
pub use config::{ConfigError, SyncConfig};
pub use controller::{SyncController, SyncControllerBuilder};
pub use db::SqliteStore;
pub use error::{CodedError, SyncError, error_code};
pub use events::SyncEvent;
pub use migrations::{
    Migration, MigrationAxis, MigrationContext, MigrationTable, MigrationTableError,
    NoopMigration, SeedExistingObjects,
};
pub use processor::{CollectionProcessor, ModificationProcessor};
pub use secrets::{DatawalletSecrets, DeviceSecrets, OpenedPayload, SealedPayload, SecretsError};
pub use store::{CollectionStore, CursorKey, MemoryStore, StoreError, SyncStore};
