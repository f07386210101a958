//! The public entry point: a single-flight synchronization controller.
//!
//! At most one physical synchronization runs per controller. Concurrent
//! callers are folded onto it:
//!
//! ```text
//! sync(requested)
//!   |
//!   +-- nothing running ----------------------> start, await
//!   +-- running scope covers requested -------> attach, await the same result
//!   +-- running scope does not cover it ------> await it, ignore result, retry
//! ```
//!
//! The synchronization itself runs on its own task, so a caller that stops
//! waiting (dropped future, timeout) never cancels it for the others.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use datawallet_types::{
    ChangedItems, DatawalletCollection, DatawalletVersion, IdentityAddress, ModificationIndex,
    SyncScope,
};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, trace};

use crate::appliers::ApplierRegistry;
use crate::backbone::Backbone;
use crate::cache::{CacheFetcher, NoopCacheFetcher};
use crate::collection::SynchronizedCollection;
use crate::config::SyncConfig;
use crate::db::SqliteStore;
use crate::engine::Engine;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::migrations::{MigrationTable, Migrations};
use crate::processor::{CollectionProcessor, ModificationProcessor};
use crate::secrets::DatawalletSecrets;
use crate::store::{CollectionStore, CursorKey, MemoryStore, SyncStore};

type SharedRun = Shared<BoxFuture<'static, Result<ChangedItems, SyncError>>>;

/// What the in-flight task is doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Job {
    Sync(SyncScope),
    Initialize,
}

impl Job {
    fn covers(self, requested: Job) -> bool {
        match (self, requested) {
            (Job::Sync(running), Job::Sync(requested)) => running.covers(requested),
            (Job::Initialize, Job::Initialize) => true,
            _ => false,
        }
    }
}

struct InFlight {
    job: Job,
    generation: u64,
    future: SharedRun,
}

type Slot = Arc<Mutex<Option<InFlight>>>;

/// Empties the slot when the task it belongs to ends, however it ends.
struct ClearOnDrop {
    slot: Slot,
    generation: u64,
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|f| f.generation == self.generation) {
            *slot = None;
        }
    }
}

/// What a caller does with the slot it found.
enum Next {
    Start(Start),
    Attach,
    Wait,
}

/// A reserved synchronization, not yet running.
struct Start {
    job: Job,
    engine: Arc<Engine>,
    clear: ClearOnDrop,
    result: oneshot::Sender<Result<ChangedItems, SyncError>>,
}

impl Start {
    /// Run on a task of its own. If the runtime refuses the task, dropping it
    /// clears the slot and closes the result channel.
    fn spawn(self) {
        let Start {
            job,
            engine,
            clear,
            result,
        } = self;
        debug!(?job, generation = clear.generation, "starting synchronization");

        tokio::spawn(async move {
            let clear = clear;
            let outcome = match job {
                Job::Sync(scope) => engine.run(scope).await,
                Job::Initialize => engine
                    .initialize_datawallet()
                    .await
                    .map(|()| ChangedItems::new()),
            };
            // Free the slot before anyone sees the result.
            drop(clear);
            let _ = result.send(outcome);
        });
    }
}

/// Synchronizes one identity's external events and datawallet.
///
/// ```ignore
/// let controller = SyncController::builder(SyncConfig::new("did:e:alice"))
///     .backbone(backbone)
///     .secrets(Arc::new(DeviceSecrets::generate()))
///     .identity_migrations(MigrationTable::new().register(1, NoopMigration))
///     .device_migrations(MigrationTable::new().register(1, NoopMigration))
///     .build()?;
///
/// let changed = controller.sync(SyncScope::Everything).await?;
/// ```
pub struct SyncController {
    engine: Arc<Engine>,
    current: Slot,
    generation: AtomicU64,
}

impl SyncController {
    pub fn builder(config: SyncConfig) -> SyncControllerBuilder {
        SyncControllerBuilder::new(config)
    }

    /// Synchronize `scope`, or join a running synchronization that covers it.
    pub async fn sync(&self, scope: SyncScope) -> Result<ChangedItems, SyncError> {
        self.run(Job::Sync(scope)).await
    }

    /// Create the datawallet of a brand-new identity at the supported
    /// version. A no-op for identities that already have one.
    pub async fn initialize_datawallet(&self) -> Result<(), SyncError> {
        self.run(Job::Initialize).await.map(|_| ())
    }

    async fn run(&self, job: Job) -> Result<ChangedItems, SyncError> {
        loop {
            let (future, next) = {
                let mut slot = self.current.lock();
                match slot.as_ref() {
                    Some(running) if running.job.covers(job) => {
                        (running.future.clone(), Next::Attach)
                    }
                    Some(running) => (running.future.clone(), Next::Wait),
                    None => {
                        let (in_flight, start) = self.reserve(job);
                        let future = in_flight.future.clone();
                        *slot = Some(in_flight);
                        (future, Next::Start(start))
                    }
                }
            };

            match next {
                Next::Start(start) => {
                    start.spawn();
                    return future.await;
                }
                Next::Attach => return future.await,
                Next::Wait => {
                    trace!(?job, "waiting for the running synchronization to finish");
                    let _ = future.await;
                }
            }
        }
    }

    /// Claim the slot for `job`. Must be called with the slot locked; the
    /// returned [`Start`] is spawned after the lock is released.
    fn reserve(&self, job: Job) -> (InFlight, Start) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();

        let future = async move {
            rx.await.unwrap_or_else(|_| {
                Err(SyncError::Processing(
                    "synchronization task ended without a result".into(),
                ))
            })
        }
        .boxed()
        .shared();

        let start = Start {
            job,
            engine: self.engine.clone(),
            clear: ClearOnDrop {
                slot: self.current.clone(),
                generation,
            },
            result: tx,
        };
        let in_flight = InFlight {
            job,
            generation,
            future,
        };
        (in_flight, start)
    }

    /// Whether a synchronization is currently running.
    pub fn is_syncing(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn identity(&self) -> &IdentityAddress {
        &self.engine.identity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.events.subscribe()
    }

    /// A writer for `collection`. Writes are queued for the next push when
    /// the datawallet is enabled.
    pub fn collection(&self, collection: DatawalletCollection) -> SynchronizedCollection {
        let queue = self
            .engine
            .datawallet_enabled
            .then(|| self.engine.store.clone());
        SynchronizedCollection::new(collection, self.engine.documents.clone(), queue)
    }

    /// Unix millis of the last successful synchronization of `scope`.
    pub fn last_completed_sync(&self, scope: SyncScope) -> Result<Option<u64>, SyncError> {
        Ok(self
            .engine
            .store
            .cursor(CursorKey::LastCompletedSync(scope))?
            .map(|millis| millis as u64))
    }

    pub fn local_index(&self) -> Result<Option<ModificationIndex>, SyncError> {
        Ok(self.engine.store.local_index()?)
    }

    pub fn unpushed_count(&self) -> Result<usize, SyncError> {
        Ok(self.engine.store.unpushed_count()?)
    }

    pub fn device_version(&self) -> Result<DatawalletVersion, SyncError> {
        self.version(CursorKey::DeviceDatawalletVersion)
    }

    /// The identity's version as last seen on the backbone.
    pub fn identity_version(&self) -> Result<DatawalletVersion, SyncError> {
        self.version(CursorKey::IdentityDatawalletVersion)
    }

    fn version(&self, key: CursorKey) -> Result<DatawalletVersion, SyncError> {
        Ok(self
            .engine
            .store
            .version(key)?
            .unwrap_or(DatawalletVersion::ZERO))
    }

    pub fn supported_version(&self) -> DatawalletVersion {
        self.engine.migrations.supported_version()
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct SyncControllerBuilder {
    config: SyncConfig,
    backbone: Option<Arc<dyn Backbone>>,
    secrets: Option<Arc<dyn DatawalletSecrets>>,
    store: Option<Arc<dyn SyncStore>>,
    documents: Option<Arc<dyn CollectionStore>>,
    appliers: ApplierRegistry,
    identity_migrations: MigrationTable,
    device_migrations: MigrationTable,
    processor: Option<Arc<dyn ModificationProcessor>>,
    caches: Option<Arc<dyn CacheFetcher>>,
}

impl SyncControllerBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            backbone: None,
            secrets: None,
            store: None,
            documents: None,
            appliers: ApplierRegistry::new(),
            identity_migrations: MigrationTable::new(),
            device_migrations: MigrationTable::new(),
            processor: None,
            caches: None,
        }
    }

    pub fn backbone(mut self, backbone: Arc<dyn Backbone>) -> Self {
        self.backbone = Some(backbone);
        self
    }

    pub fn secrets(mut self, secrets: Arc<dyn DatawalletSecrets>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Use one store for both the sync state and the documents.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: SyncStore + CollectionStore + 'static,
    {
        let sync: Arc<dyn SyncStore> = store.clone();
        let documents: Arc<dyn CollectionStore> = store;
        self.store = Some(sync);
        self.documents = Some(documents);
        self
    }

    pub fn sync_store(mut self, store: Arc<dyn SyncStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn collection_store(mut self, documents: Arc<dyn CollectionStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn appliers(mut self, appliers: ApplierRegistry) -> Self {
        self.appliers = appliers;
        self
    }

    pub fn identity_migrations(mut self, table: MigrationTable) -> Self {
        self.identity_migrations = table;
        self
    }

    pub fn device_migrations(mut self, table: MigrationTable) -> Self {
        self.device_migrations = table;
        self
    }

    pub fn processor(mut self, processor: Arc<dyn ModificationProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn caches(mut self, caches: Arc<dyn CacheFetcher>) -> Self {
        self.caches = Some(caches);
        self
    }

    pub fn build(self) -> Result<SyncController, SyncError> {
        self.config.validate()?;
        let backbone = self
            .backbone
            .ok_or_else(|| SyncError::Config("a backbone is required".into()))?;
        let secrets = self
            .secrets
            .ok_or_else(|| SyncError::Config("datawallet secrets are required".into()))?;
        let migrations = Migrations::new(self.identity_migrations, self.device_migrations)?;

        let (store, documents) = match (self.store, self.documents) {
            (Some(store), Some(documents)) => (store, documents),
            (store, documents) => {
                let (default_store, default_documents) =
                    default_stores(self.config.database_path.as_deref())?;
                (
                    store.unwrap_or(default_store),
                    documents.unwrap_or(default_documents),
                )
            }
        };
        let processor: Arc<dyn ModificationProcessor> = match self.processor {
            Some(processor) => processor,
            None => Arc::new(CollectionProcessor::new(documents.clone())),
        };
        let caches: Arc<dyn CacheFetcher> = match self.caches {
            Some(caches) => caches,
            None => Arc::new(NoopCacheFetcher),
        };

        debug!(
            identity = %self.config.identity_address,
            datawallet = self.config.datawallet_enabled,
            supported = %migrations.supported_version(),
            appliers = self.appliers.registered().len(),
            "sync controller built"
        );

        let engine = Engine::new(
            self.config.identity_address,
            self.config.datawallet_enabled,
            self.config.page_size,
            backbone,
            store,
            documents,
            secrets,
            self.appliers,
            processor,
            caches,
            migrations,
            EventBus::new(self.config.event_capacity),
        );
        Ok(SyncController {
            engine: Arc::new(engine),
            current: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        })
    }
}

/// SQLite at `path` when configured, memory otherwise.
fn default_stores(
    path: Option<&Path>,
) -> Result<(Arc<dyn SyncStore>, Arc<dyn CollectionStore>), SyncError> {
    match path {
        Some(path) => {
            let db = Arc::new(SqliteStore::open(path)?);
            let documents: Arc<dyn CollectionStore> = db.clone();
            Ok((db, documents))
        }
        None => {
            let memory = Arc::new(MemoryStore::new());
            let documents: Arc<dyn CollectionStore> = memory.clone();
            Ok((memory, documents))
        }
    }
}
