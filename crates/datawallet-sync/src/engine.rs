//! The synchronization protocols.
//!
//! [`Engine`] runs exactly one synchronization at a time; the
//! [`SyncController`](crate::SyncController) in front of it deduplicates
//! concurrent callers. Every cursor write here happens after the backbone
//! acknowledged the step it records, so an interrupted run can be re-issued
//! without skipping or double-applying anything.
//!
//! # External-event sync
//!
//! ```text
//! +--> start ExternalEventSync run --NoNewEvents--> datawallet sync --> done
//! |           | Created
//! |           v
//! |    pull modifications (other devices' writes first)
//! |           v
//! |    fetch all events of the run, apply each (failures recorded per event)
//! |           v
//! |    finalize: event results + queued local modifications
//! |           | newUnsyncedExternalEventsExist
//! +-----------+ otherwise done
//! ```
//!
//! # Datawallet sync
//!
//! ```text
//! version guard --> pull --> identity upgrade (v+1 ..= supported, one run each)
//!               --> device catch-up --> push
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use datawallet_telemetry::{migration_span, sync_span};
use datawallet_types::{
    ChangedItems, DatawalletVersion, ExternalEventResult, IdentityAddress, LocalModification,
    LocalModificationId, ModificationIndex, SyncRunId, SyncRunKind, SyncScope, now_millis,
};
use parking_lot::Mutex;
use tracing::{Instrument, debug, info, instrument, warn};

use crate::appliers::ApplierRegistry;
use crate::backbone::{
    Backbone, BackboneError, CreateDatawalletModificationsRequest,
    FinalizeDatawalletVersionUpgradeRequest, FinalizeExternalEventSyncRequest,
    StartSyncRunStatus, WireModificationCreate, collect_pages,
};
use crate::cache::CacheFetcher;
use crate::codec::{self, DecryptedModification};
use crate::error::{SyncError, error_code};
use crate::events::{EventBus, SyncEvent};
use crate::migrations::{Migration, MigrationAxis, MigrationContext, Migrations};
use crate::processor::ModificationProcessor;
use crate::secrets::DatawalletSecrets;
use crate::store::{CollectionStore, CursorKey, SyncStore};

/// The sync run this engine currently holds open on the backbone.
#[derive(Debug)]
struct ActiveRun {
    id: SyncRunId,
    kind: SyncRunKind,
}

/// A sealed snapshot of the unpushed queue.
struct PreparedPush {
    queued: Vec<LocalModification>,
    local_index: Option<ModificationIndex>,
    modifications: Vec<WireModificationCreate>,
}

/// Clears the active-run slot when a protocol step exits early.
///
/// Finalizing takes the run out of the slot first, so on the success path
/// there is nothing left to clear.
struct ActiveRunGuard<'a> {
    slot: &'a Mutex<Option<ActiveRun>>,
}

impl Drop for ActiveRunGuard<'_> {
    fn drop(&mut self) {
        if let Some(run) = self.slot.lock().take() {
            debug!(sync_run = %run.id, kind = %run.kind, "abandoning sync run");
        }
    }
}

pub(crate) struct Engine {
    pub(crate) identity: IdentityAddress,
    pub(crate) datawallet_enabled: bool,
    pub(crate) page_size: u32,
    pub(crate) backbone: Arc<dyn Backbone>,
    pub(crate) store: Arc<dyn SyncStore>,
    pub(crate) documents: Arc<dyn CollectionStore>,
    pub(crate) secrets: Arc<dyn DatawalletSecrets>,
    pub(crate) appliers: ApplierRegistry,
    pub(crate) processor: Arc<dyn ModificationProcessor>,
    pub(crate) caches: Arc<dyn CacheFetcher>,
    pub(crate) migrations: Migrations,
    pub(crate) events: EventBus,
    active_run: Mutex<Option<ActiveRun>>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        identity: IdentityAddress,
        datawallet_enabled: bool,
        page_size: u32,
        backbone: Arc<dyn Backbone>,
        store: Arc<dyn SyncStore>,
        documents: Arc<dyn CollectionStore>,
        secrets: Arc<dyn DatawalletSecrets>,
        appliers: ApplierRegistry,
        processor: Arc<dyn ModificationProcessor>,
        caches: Arc<dyn CacheFetcher>,
        migrations: Migrations,
        events: EventBus,
    ) -> Self {
        Self {
            identity,
            datawallet_enabled,
            page_size,
            backbone,
            store,
            documents,
            secrets,
            appliers,
            processor,
            caches,
            migrations,
            events,
            active_run: Mutex::new(None),
        }
    }

    fn supported(&self) -> DatawalletVersion {
        self.migrations.supported_version()
    }

    fn backbone_error(&self, err: BackboneError) -> SyncError {
        SyncError::from_backbone(err, self.supported())
    }

    // =========================================================================
    // Entry point
    // =========================================================================

    /// One physical synchronization of `scope`, including the best-effort
    /// flush and the completion notification.
    pub(crate) async fn run(&self, scope: SyncScope) -> Result<ChangedItems, SyncError> {
        let span = sync_span(self.identity.as_str(), scope.as_str());
        self.run_inner(scope).instrument(span).await
    }

    async fn run_inner(&self, scope: SyncScope) -> Result<ChangedItems, SyncError> {
        let mut result = match scope {
            SyncScope::Everything => self.sync_everything().await,
            SyncScope::OnlyDatawallet => self.sync_datawallet().await,
        };

        match &result {
            Ok(changed) => {
                info!(changed = changed.len(), "synchronization completed");
                self.store
                    .set_cursor(CursorKey::LastCompletedSync(scope), now_millis() as i64)?;
            }
            Err(e) => warn!(code = e.code(), error = %e, "synchronization failed"),
        }

        let fatal = matches!(&result, Err(e) if e.is_fatal());
        let queued = if self.datawallet_enabled && !fatal {
            self.store.unpushed_count().unwrap_or_else(|e| {
                warn!(error = %e, "could not read the unpushed queue, skipping flush");
                0
            })
        } else {
            0
        };
        if queued > 0 {
            debug!("flushing modifications queued during synchronization");
            match self.sync_datawallet().await {
                Ok(extra) => {
                    if let Ok(changed) = &mut result {
                        changed.merge(extra);
                    }
                }
                Err(e) => warn!(code = e.code(), error = %e, "best-effort datawallet sync failed"),
            }
        }

        if result.is_ok() && self.datawallet_enabled {
            self.events.publish(SyncEvent::DatawalletSynchronized {
                identity: self.identity.clone(),
            });
        }
        result
    }

    // =========================================================================
    // Sync runs
    // =========================================================================

    /// Open a sync run. `None` when the backbone reports nothing to sync.
    async fn open_run(&self, kind: SyncRunKind) -> Result<Option<SyncRunId>, SyncError> {
        if self.active_run.lock().is_some() {
            return Err(SyncError::SyncRunAlreadyActive);
        }
        let response = self
            .backbone
            .start_sync_run(kind)
            .await
            .map_err(|e| self.backbone_error(e))?;

        match (response.status, response.sync_run_id) {
            (StartSyncRunStatus::NoNewEvents, _) => Ok(None),
            (StartSyncRunStatus::Created, Some(id)) => {
                let mut slot = self.active_run.lock();
                if slot.is_some() {
                    return Err(SyncError::SyncRunAlreadyActive);
                }
                debug!(sync_run = %id, %kind, "sync run opened");
                *slot = Some(ActiveRun { id: id.clone(), kind });
                Ok(Some(id))
            }
            (StartSyncRunStatus::Created, None) => Err(SyncError::Serialization(
                "sync run created without an id".into(),
            )),
        }
    }

    fn guard_run(&self) -> ActiveRunGuard<'_> {
        ActiveRunGuard {
            slot: &self.active_run,
        }
    }

    /// Take the active run for finalizing.
    fn take_run(&self, expected: SyncRunKind) -> Result<SyncRunId, SyncError> {
        let mut slot = self.active_run.lock();
        match slot.take() {
            Some(run) if run.kind == expected => Ok(run.id),
            other => {
                *slot = other;
                Err(SyncError::NoActiveSyncRun { expected })
            }
        }
    }

    // =========================================================================
    // External events
    // =========================================================================

    #[instrument(name = "sync.external_events", skip_all)]
    async fn sync_everything(&self) -> Result<ChangedItems, SyncError> {
        let mut changed = ChangedItems::new();

        if self.datawallet_enabled {
            let identity_version = self.check_identity_version().await?;
            if identity_version < self.supported() {
                changed.merge(self.sync_datawallet().await?);
            }
        }

        loop {
            let Some(run) = self.open_run(SyncRunKind::ExternalEventSync).await? else {
                debug!("no new external events");
                changed.merge(self.sync_datawallet().await?);
                break;
            };
            let _guard = self.guard_run();

            if self.datawallet_enabled {
                changed.merge(self.pull().await?);
            }

            let backbone = self.backbone.as_ref();
            let run_id = &run;
            let events = collect_pages(self.page_size, move |page| {
                backbone.get_external_events_of_sync_run(run_id, page)
            })
            .await
            .map_err(|e| self.backbone_error(e))?;
            debug!(sync_run = %run, count = events.len(), "applying external events");

            let mut results = Vec::with_capacity(events.len());
            for event in &events {
                match self.appliers.apply(event).await {
                    Ok(item) => {
                        changed.extend(item);
                        results.push(ExternalEventResult::succeeded(event.id.clone()));
                    }
                    Err(e) => {
                        let code = error_code(&e);
                        warn!(
                            event = %event.id,
                            event_type = %event.event_type,
                            %code,
                            error = %e,
                            "external event failed"
                        );
                        results.push(ExternalEventResult::failed(event.id.clone(), code));
                    }
                }
            }

            if !self.finalize_external_event_sync(results).await? {
                break;
            }
        }
        Ok(changed)
    }

    async fn finalize_external_event_sync(
        &self,
        results: Vec<ExternalEventResult>,
    ) -> Result<bool, SyncError> {
        let run = self.take_run(SyncRunKind::ExternalEventSync)?;
        let push = self.prepare_push().await?;

        let response = self
            .backbone
            .finalize_external_event_sync(
                &run,
                FinalizeExternalEventSyncRequest {
                    external_event_results: results,
                    local_index: push.local_index,
                    datawallet_modifications: push.modifications,
                },
            )
            .await
            .map_err(|e| self.backbone_error(e))?;

        self.acknowledge_push(
            &push.queued,
            push.local_index,
            response.new_datawallet_modification_index,
        )?;
        debug!(
            sync_run = %run,
            more = response.new_unsynced_external_events_exist,
            "external event sync finalized"
        );
        Ok(response.new_unsynced_external_events_exist)
    }

    // =========================================================================
    // Datawallet
    // =========================================================================

    #[instrument(name = "sync.datawallet", skip_all)]
    async fn sync_datawallet(&self) -> Result<ChangedItems, SyncError> {
        if !self.datawallet_enabled {
            return Ok(ChangedItems::new());
        }

        let identity_version = self.check_identity_version().await?;
        let changed = self.pull().await?;

        if identity_version < self.supported() {
            self.upgrade_identity(identity_version).await?;
        }
        self.upgrade_device().await?;
        self.push().await?;

        self.store.set_cursor(
            CursorKey::LastCompletedSync(SyncScope::OnlyDatawallet),
            now_millis() as i64,
        )?;
        Ok(changed)
    }

    /// Fetch the identity's version and refuse to go on when this build
    /// cannot interpret it.
    async fn check_identity_version(&self) -> Result<DatawalletVersion, SyncError> {
        let info = self
            .backbone
            .get_datawallet()
            .await
            .map_err(|e| self.backbone_error(e))?;
        let supported = self.supported();
        if info.version > supported {
            return Err(SyncError::InsufficientSupportedVersion {
                supported,
                required: Some(info.version),
            });
        }
        self.store
            .set_version(CursorKey::IdentityDatawalletVersion, info.version)?;
        Ok(info.version)
    }

    /// Apply every remote modification after the local index.
    pub(crate) async fn pull(&self) -> Result<ChangedItems, SyncError> {
        let after = self.store.local_index()?;
        let backbone = self.backbone.as_ref();
        let mut wire = collect_pages(self.page_size, move |page| {
            backbone.get_datawallet_modifications(after, page)
        })
        .await
        .map_err(|e| self.backbone_error(e))?;

        wire.retain(|w| after.is_none_or(|a| w.index > a));
        if wire.is_empty() {
            debug!(?after, "no new datawallet modifications");
            return Ok(ChangedItems::new());
        }
        wire.sort_by_key(|w| w.index);

        let mut batch: Vec<DecryptedModification> = Vec::with_capacity(wire.len());
        for entry in wire {
            let remote = codec::decode(entry)?;
            batch.push(remote.open(self.secrets.as_ref()).await?);
        }
        let Some(last) = batch.last().map(|m| m.index) else {
            return Ok(ChangedItems::new());
        };
        let count = batch.len();

        // Entries this device pushed without seeing the acknowledgement are
        // already applied locally and must leave the queue, not go out again.
        let queued: HashSet<LocalModificationId> =
            self.store.unpushed()?.iter().map(|m| m.local_id).collect();
        let (own, foreign): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|m| m.local_id.is_some_and(|id| queued.contains(&id)));

        let changed = if foreign.is_empty() {
            ChangedItems::new()
        } else {
            self.processor
                .process(foreign, self.caches.as_ref())
                .await
                .map_err(SyncError::from_anyhow)?
        };
        if !own.is_empty() {
            let ids: Vec<_> = own.iter().filter_map(|m| m.local_id).collect();
            self.store.delete_unpushed(&ids)?;
            info!(count = ids.len(), "queued modifications were already stored by the backbone");
        }
        self.store.advance_local_index(last)?;

        info!(count, %last, changed = changed.len(), "pulled datawallet modifications");
        Ok(changed)
    }

    /// Snapshot the queue and seal it for the indices directly after ours.
    async fn prepare_push(&self) -> Result<PreparedPush, SyncError> {
        let queued = if self.datawallet_enabled {
            self.store.unpushed()?
        } else {
            Vec::new()
        };
        let local_index = self.store.local_index()?;
        let modifications = codec::seal_batch(&queued, local_index, self.secrets.as_ref()).await?;
        Ok(PreparedPush {
            queued,
            local_index,
            modifications,
        })
    }

    /// After the backbone stored `queued`: drop it from the queue and move the
    /// local index past it. The acknowledged index must be exactly the one the
    /// payloads were sealed for.
    fn acknowledge_push(
        &self,
        queued: &[LocalModification],
        after: Option<ModificationIndex>,
        acknowledged: Option<ModificationIndex>,
    ) -> Result<(), SyncError> {
        let Some(expected) = ModificationIndex::range_after(after, queued.len()).last() else {
            return Ok(());
        };
        if acknowledged != Some(expected) {
            return Err(SyncError::IndexMismatch {
                expected,
                actual: acknowledged,
            });
        }
        let ids: Vec<_> = queued.iter().map(|m| m.local_id).collect();
        self.store.delete_unpushed(&ids)?;
        self.store.advance_local_index(expected)?;
        debug!(count = ids.len(), index = %expected, "pushed datawallet modifications");
        Ok(())
    }

    async fn push(&self) -> Result<(), SyncError> {
        let push = self.prepare_push().await?;
        if push.queued.is_empty() {
            return Ok(());
        }
        let response = self
            .backbone
            .create_datawallet_modifications(CreateDatawalletModificationsRequest {
                local_index: push.local_index,
                modifications: push.modifications,
            })
            .await
            .map_err(|e| self.backbone_error(e))?;
        self.acknowledge_push(&push.queued, push.local_index, Some(response.new_index))
    }

    // =========================================================================
    // Migrations
    // =========================================================================

    async fn run_migration(
        &self,
        axis: MigrationAxis,
        version: DatawalletVersion,
        migration: &dyn Migration,
    ) -> Result<(), SyncError> {
        let queue = match axis {
            MigrationAxis::Identity => Some(self.store.clone()),
            MigrationAxis::Device => None,
        };
        let ctx = MigrationContext::new(axis, version, self.documents.clone(), queue);
        migration.migrate(&ctx).await.map_err(|e| match e.downcast::<SyncError>() {
            Ok(err) => err,
            Err(e) => SyncError::MigrationFailed {
                version,
                message: format!("{e:#}"),
            },
        })
    }

    /// Upgrade the identity one version at a time, each step in its own
    /// `DatawalletVersionUpgrade` run. The reached version is persisted after
    /// every step.
    async fn upgrade_identity(&self, current: DatawalletVersion) -> Result<(), SyncError> {
        let plan = self.migrations.plan(MigrationAxis::Identity, current)?;
        info!(
            from = %current,
            to = %self.supported(),
            steps = plan.len(),
            "upgrading identity datawallet"
        );

        for (version, migration) in plan {
            async {
                self.open_upgrade_run().await?;
                let _guard = self.guard_run();

                self.run_migration(MigrationAxis::Identity, version, migration.as_ref())
                    .await?;
                self.finalize_version_upgrade(version).await?;
                self.store
                    .set_version(CursorKey::IdentityDatawalletVersion, version)?;
                info!(%version, "identity datawallet migrated");
                Ok::<(), SyncError>(())
            }
            .instrument(migration_span(MigrationAxis::Identity.as_str(), version.get()))
            .await?;
        }
        Ok(())
    }

    /// Upgrade runs are always created; a `NoNewEvents` answer leaves
    /// nothing to finalize.
    async fn open_upgrade_run(&self) -> Result<SyncRunId, SyncError> {
        self.open_run(SyncRunKind::DatawalletVersionUpgrade)
            .await?
            .ok_or(SyncError::NoActiveSyncRun {
                expected: SyncRunKind::DatawalletVersionUpgrade,
            })
    }

    async fn finalize_version_upgrade(&self, version: DatawalletVersion) -> Result<(), SyncError> {
        let run = self.take_run(SyncRunKind::DatawalletVersionUpgrade)?;
        let push = self.prepare_push().await?;

        let response = self
            .backbone
            .finalize_datawallet_version_upgrade(
                &run,
                FinalizeDatawalletVersionUpgradeRequest {
                    new_datawallet_version: version,
                    local_index: push.local_index,
                    datawallet_modifications: push.modifications,
                },
            )
            .await
            .map_err(|e| self.backbone_error(e))?;

        self.acknowledge_push(
            &push.queued,
            push.local_index,
            response.new_datawallet_modification_index,
        )
    }

    /// Bring this device's local state up to the supported version.
    async fn upgrade_device(&self) -> Result<(), SyncError> {
        let current = self
            .store
            .version(CursorKey::DeviceDatawalletVersion)?
            .unwrap_or(DatawalletVersion::ZERO);
        let plan = self.migrations.plan(MigrationAxis::Device, current)?;
        if plan.is_empty() {
            return Ok(());
        }
        info!(from = %current, to = %self.supported(), "catching up device datawallet");

        for (version, migration) in plan {
            self.run_migration(MigrationAxis::Device, version, migration.as_ref())
                .instrument(migration_span(MigrationAxis::Device.as_str(), version.get()))
                .await?;
            self.store
                .set_version(CursorKey::DeviceDatawalletVersion, version)?;
        }
        Ok(())
    }

    /// Set up the datawallet of a brand-new identity at the supported
    /// version. Nothing exists yet, so no migration runs.
    pub(crate) async fn initialize_datawallet(&self) -> Result<(), SyncError> {
        if !self.datawallet_enabled {
            return Ok(());
        }
        let current = self.check_identity_version().await?;
        let target = self.supported();
        if current != DatawalletVersion::ZERO || target == DatawalletVersion::ZERO {
            debug!(%current, %target, "datawallet already initialized");
            return Ok(());
        }

        self.open_upgrade_run().await?;
        let _guard = self.guard_run();
        self.finalize_version_upgrade(target).await?;

        self.store
            .set_version(CursorKey::IdentityDatawalletVersion, target)?;
        self.store
            .set_version(CursorKey::DeviceDatawalletVersion, target)?;
        info!(version = %target, "datawallet initialized");
        Ok(())
    }
}
