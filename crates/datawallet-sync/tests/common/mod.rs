//! Shared fixtures: an in-memory backbone and controller builders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use datawallet_sync::{
    Backbone, BackboneError, CreateDatawalletModificationsRequest,
    CreateDatawalletModificationsResponse, DatawalletInfo, DatawalletSecrets, DeviceSecrets,
    FinalizeDatawalletVersionUpgradeRequest, FinalizeDatawalletVersionUpgradeResponse,
    FinalizeExternalEventSyncRequest, FinalizeExternalEventSyncResponse, Migration,
    MigrationContext, MigrationTable, NoopMigration, OUTDATED_INDEX_CODE, OpenedPayload, Page,
    PageRequest, StartSyncRunResponse, SyncConfig, SyncController, SyncControllerBuilder,
    WireModification, WireModificationCreate,
};
use datawallet_types::{
    BackboneModificationId, DatawalletCollection, DatawalletVersion, ExternalEvent,
    ExternalEventId, ExternalEventResult, ModificationIndex, ModificationKind, PayloadCategory,
    SyncRunId, SyncRunKind,
};
use parking_lot::Mutex;
use serde_json::Value;

pub const IDENTITY: &str = "did:e:localhost:dids:alice";

/// Master key both test devices of the identity share.
pub fn shared_secrets() -> Arc<DeviceSecrets> {
    Arc::new(DeviceSecrets::new([7u8; 32]))
}

// ============================================================================
// In-memory backbone
// ============================================================================

#[derive(Default)]
struct State {
    version: DatawalletVersion,
    log: Vec<WireModification>,
    /// One batch per `ExternalEventSync` run, oldest first.
    pending_events: VecDeque<Vec<ExternalEvent>>,
    open_runs: HashMap<SyncRunId, (SyncRunKind, Vec<ExternalEvent>)>,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, BackboneError>,
    event_results: Vec<Vec<ExternalEventResult>>,
    upgrades: Vec<DatawalletVersion>,
    pushed_batches: Vec<usize>,
}

impl State {
    fn last_index(&self) -> Option<ModificationIndex> {
        self.log.last().map(|m| m.index)
    }

    /// Store `modifications` right after the current head, provided the
    /// client had consumed everything up to it.
    fn append(
        &mut self,
        local_index: Option<ModificationIndex>,
        modifications: Vec<WireModificationCreate>,
    ) -> Result<Option<ModificationIndex>, BackboneError> {
        if modifications.is_empty() {
            return Ok(None);
        }
        if local_index != self.last_index() {
            return Err(BackboneError::rejected(
                OUTDATED_INDEX_CODE,
                "the local index is outdated",
            ));
        }
        self.pushed_batches.push(modifications.len());
        for m in modifications {
            let index = ModificationIndex::after(self.last_index());
            self.log.push(WireModification {
                id: BackboneModificationId::new(format!("DWM{}", index.get())),
                index,
                object_identifier: m.object_identifier,
                payload_category: m.payload_category,
                collection: m.collection,
                kind: m.kind,
                encrypted_payload: m.encrypted_payload,
                datawallet_version: m.datawallet_version,
                local_id: m.local_id,
            });
        }
        Ok(self.last_index())
    }
}

/// Backbone double with a call log and failure injection.
///
/// Pushes are only accepted when their `local_index` equals the head of the
/// log, so index contiguity is enforced the way the real backbone does.
#[derive(Default)]
pub struct FakeBackbone {
    state: Mutex<State>,
    runs: AtomicUsize,
    datawallet_delay: Mutex<Option<Duration>>,
    replay_log: AtomicBool,
    offline: AtomicBool,
    lose_response: Mutex<Option<&'static str>>,
}

impl FakeBackbone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn at_version(version: u32) -> Arc<Self> {
        let backbone = Self::default();
        backbone.state.lock().version = DatawalletVersion::new(version);
        Arc::new(backbone)
    }

    pub fn version(&self) -> DatawalletVersion {
        self.state.lock().version
    }

    pub fn set_version(&self, version: u32) {
        self.state.lock().version = DatawalletVersion::new(version);
    }

    /// Queue one batch of events, delivered by the next external-event run.
    pub fn queue_events(&self, events: Vec<ExternalEvent>) {
        self.state.lock().pending_events.push_back(events);
    }

    /// Fail the next call of `method` with `err`.
    pub fn fail_next(&self, method: &'static str, err: BackboneError) {
        self.state.lock().failures.insert(method, err);
    }

    /// Fail every call with a transport error while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Carry out the next call of `method`, then drop the connection before
    /// the response arrives: the call fails and the backbone goes offline.
    pub fn lose_next_response(&self, method: &'static str) {
        *self.lose_response.lock() = Some(method);
    }

    /// Return the whole log from `get_datawallet_modifications`, ignoring
    /// `after_index`.
    pub fn replay_log(&self) {
        self.replay_log.store(true, Ordering::Relaxed);
    }

    /// Slow down `get_datawallet` so concurrent callers overlap.
    pub fn delay_datawallet(&self, delay: Duration) {
        *self.datawallet_delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == method).count()
    }

    pub fn log(&self) -> Vec<WireModification> {
        self.state.lock().log.clone()
    }

    pub fn event_results(&self) -> Vec<Vec<ExternalEventResult>> {
        self.state.lock().event_results.clone()
    }

    pub fn upgrades(&self) -> Vec<DatawalletVersion> {
        self.state.lock().upgrades.clone()
    }

    pub fn pushed_batches(&self) -> Vec<usize> {
        self.state.lock().pushed_batches.clone()
    }

    /// Another device of the identity writes one entry to the log.
    pub async fn append_remote(
        &self,
        secrets: &DeviceSecrets,
        collection: DatawalletCollection,
        id: &str,
        kind: ModificationKind,
        payload: Option<Value>,
    ) -> ModificationIndex {
        let index = ModificationIndex::after(self.state.lock().last_index());
        let (category, encrypted) = match payload {
            Some(value) => {
                let sealed = secrets
                    .seal(OpenedPayload::new(index, value))
                    .await
                    .expect("seal remote payload");
                (Some(PayloadCategory::TechnicalData), Some(sealed.to_base64()))
            }
            None => (None, None),
        };
        let mut state = self.state.lock();
        let version = state.version;
        let head = state.last_index();
        state
            .append(
                head,
                vec![WireModificationCreate {
                    object_identifier: id.to_string(),
                    payload_category: category.map(|c| c.as_str().to_string()),
                    collection: collection.as_str().to_string(),
                    kind: kind.as_str().to_string(),
                    encrypted_payload: encrypted,
                    datawallet_version: version,
                    local_id: None,
                }],
            )
            .expect("append remote entry");
        index
    }

    /// Log the call and fire an injected failure, if any.
    fn enter(&self, method: &'static str) -> Result<(), BackboneError> {
        let mut state = self.state.lock();
        state.calls.push(method);
        if self.offline.load(Ordering::Relaxed) {
            return Err(BackboneError::Transport("offline".into()));
        }
        match state.failures.remove(method) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Deliver `response` unless it is the one to lose.
    fn respond<T>(&self, method: &'static str, response: T) -> Result<T, BackboneError> {
        let mut lose = self.lose_response.lock();
        if *lose == Some(method) {
            *lose = None;
            self.set_offline(true);
            return Err(BackboneError::Transport("connection reset".into()));
        }
        Ok(response)
    }
}

fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Page<T> {
    let size = page.size.max(1) as usize;
    let total_pages = items.len().div_ceil(size) as u32;
    let start = page.number as usize * size;
    Page {
        items: items.iter().skip(start).take(size).cloned().collect(),
        page_number: page.number,
        total_pages,
    }
}

#[async_trait]
impl Backbone for FakeBackbone {
    async fn start_sync_run(
        &self,
        kind: SyncRunKind,
    ) -> Result<StartSyncRunResponse, BackboneError> {
        self.enter("start_sync_run")?;
        let mut state = self.state.lock();
        let events = match kind {
            SyncRunKind::ExternalEventSync => match state.pending_events.pop_front() {
                Some(events) => events,
                None => return Ok(StartSyncRunResponse::no_new_events()),
            },
            SyncRunKind::DatawalletVersionUpgrade => Vec::new(),
        };
        let n = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let id = SyncRunId::new(format!("SYR{n}"));
        state.open_runs.insert(id.clone(), (kind, events));
        Ok(StartSyncRunResponse::created(id))
    }

    async fn get_external_events_of_sync_run(
        &self,
        sync_run: &SyncRunId,
        page: PageRequest,
    ) -> Result<Page<ExternalEvent>, BackboneError> {
        self.enter("get_external_events_of_sync_run")?;
        let state = self.state.lock();
        match state.open_runs.get(sync_run) {
            Some((_, events)) => Ok(paginate(events, page)),
            None => Err(BackboneError::rejected("error.platform.recordNotFound", "no such run")),
        }
    }

    async fn finalize_external_event_sync(
        &self,
        sync_run: &SyncRunId,
        request: FinalizeExternalEventSyncRequest,
    ) -> Result<FinalizeExternalEventSyncResponse, BackboneError> {
        self.enter("finalize_external_event_sync")?;
        let mut state = self.state.lock();
        match state.open_runs.get(sync_run) {
            Some((SyncRunKind::ExternalEventSync, _)) => {}
            _ => {
                return Err(BackboneError::rejected(
                    "error.platform.recordNotFound",
                    "no such run",
                ));
            }
        }
        let new_index = state.append(request.local_index, request.datawallet_modifications)?;
        state.open_runs.remove(sync_run);
        state.event_results.push(request.external_event_results);
        let response = FinalizeExternalEventSyncResponse {
            new_unsynced_external_events_exist: !state.pending_events.is_empty(),
            new_datawallet_modification_index: new_index,
        };
        drop(state);
        self.respond("finalize_external_event_sync", response)
    }

    async fn finalize_datawallet_version_upgrade(
        &self,
        sync_run: &SyncRunId,
        request: FinalizeDatawalletVersionUpgradeRequest,
    ) -> Result<FinalizeDatawalletVersionUpgradeResponse, BackboneError> {
        self.enter("finalize_datawallet_version_upgrade")?;
        let mut state = self.state.lock();
        match state.open_runs.get(sync_run) {
            Some((SyncRunKind::DatawalletVersionUpgrade, _)) => {}
            _ => {
                return Err(BackboneError::rejected(
                    "error.platform.recordNotFound",
                    "no such run",
                ));
            }
        }
        let new_index = state.append(request.local_index, request.datawallet_modifications)?;
        state.open_runs.remove(sync_run);
        state.version = request.new_datawallet_version;
        state.upgrades.push(request.new_datawallet_version);
        drop(state);
        self.respond(
            "finalize_datawallet_version_upgrade",
            FinalizeDatawalletVersionUpgradeResponse {
                new_datawallet_modification_index: new_index,
            },
        )
    }

    async fn get_datawallet(&self) -> Result<DatawalletInfo, BackboneError> {
        self.enter("get_datawallet")?;
        let delay = *self.datawallet_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(DatawalletInfo {
            version: self.state.lock().version,
        })
    }

    async fn get_datawallet_modifications(
        &self,
        after_index: Option<ModificationIndex>,
        page: PageRequest,
    ) -> Result<Page<WireModification>, BackboneError> {
        self.enter("get_datawallet_modifications")?;
        let replay = self.replay_log.load(Ordering::Relaxed);
        let state = self.state.lock();
        let newer: Vec<WireModification> = state
            .log
            .iter()
            .filter(|m| replay || after_index.is_none_or(|after| m.index > after))
            .cloned()
            .collect();
        Ok(paginate(&newer, page))
    }

    async fn create_datawallet_modifications(
        &self,
        request: CreateDatawalletModificationsRequest,
    ) -> Result<CreateDatawalletModificationsResponse, BackboneError> {
        self.enter("create_datawallet_modifications")?;
        let appended = self
            .state
            .lock()
            .append(request.local_index, request.modifications)?;
        match appended {
            Some(new_index) => self.respond(
                "create_datawallet_modifications",
                CreateDatawalletModificationsResponse { new_index },
            ),
            None => Err(BackboneError::rejected(
                "error.platform.validation.invalidPropertyValue",
                "no modifications",
            )),
        }
    }
}

// ============================================================================
// Events and migrations
// ============================================================================

pub fn event(id: &str, event_type: &str, payload: Value) -> ExternalEvent {
    ExternalEvent {
        id: ExternalEventId::new(id),
        event_type: event_type.to_string(),
        payload,
    }
}

/// `NoopMigration` for every version in `1..=steps`.
pub fn noop_table(steps: u32) -> MigrationTable {
    (1..=steps).fold(MigrationTable::new(), |table, v| table.register(v, NoopMigration))
}

/// Records the versions it ran at, fails at `fail_at`.
pub struct RecordingMigration {
    pub ran: Arc<Mutex<Vec<u32>>>,
    pub fail_at: Option<u32>,
}

#[async_trait]
impl Migration for RecordingMigration {
    async fn migrate(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        if self.fail_at == Some(ctx.version.get()) {
            anyhow::bail!("migration to {} failed", ctx.version);
        }
        self.ran.lock().push(ctx.version.get());
        Ok(())
    }
}

/// `RecordingMigration` for every version in `1..=steps`, sharing one log.
pub fn recording_table(steps: u32, fail_at: Option<u32>) -> (MigrationTable, Arc<Mutex<Vec<u32>>>) {
    let ran = Arc::new(Mutex::new(Vec::new()));
    let table = (1..=steps).fold(MigrationTable::new(), |table, v| {
        table.register(
            v,
            RecordingMigration {
                ran: ran.clone(),
                fail_at,
            },
        )
    });
    (table, ran)
}

// ============================================================================
// Controllers
// ============================================================================

/// Builder over the fake backbone with `steps` no-op migrations per axis.
pub fn builder(
    backbone: Arc<FakeBackbone>,
    secrets: Arc<DeviceSecrets>,
    steps: u32,
) -> SyncControllerBuilder {
    datawallet_telemetry::init_test_tracing();
    SyncController::builder(SyncConfig::new(IDENTITY).with_page_size(2))
        .backbone(backbone)
        .secrets(secrets)
        .identity_migrations(noop_table(steps))
        .device_migrations(noop_table(steps))
}

pub fn controller(backbone: Arc<FakeBackbone>, steps: u32) -> SyncController {
    builder(backbone, shared_secrets(), steps)
        .build()
        .expect("controller builds")
}
