//! The backbone boundary: sync runs, external events and the shared
//! modification log.
//!
//! [`Backbone`] abstracts the authenticated request/response transport. The
//! engine never constructs HTTP requests itself; an application supplies an
//! implementation, tests supply an in-memory one.
//!
//! All wire structs serialize in camelCase. Encrypted payloads travel as
//! base64 strings.

use std::future::Future;

use async_trait::async_trait;
use datawallet_types::{
    BackboneModificationId, DatawalletVersion, ExternalEvent, ExternalEventResult,
    LocalModificationId, ModificationIndex, SyncRunId, SyncRunKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::MAX_PAGES;

/// Code the backbone rejects requests with when the client's supported
/// datawallet version is lower than the identity's.
pub const INSUFFICIENT_VERSION_CODE: &str =
    "error.platform.validation.datawallet.insufficientSupportedDatawalletVersion";

/// Code the backbone rejects a push with when its `local_index` is stale.
pub const OUTDATED_INDEX_CODE: &str = "error.platform.validation.datawallet.outdatedLocalIndex";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackboneError {
    /// The request never got a backbone answer.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The backbone answered with an error.
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl BackboneError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        BackboneError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_insufficient_version(&self) -> bool {
        matches!(self, BackboneError::Rejected { code, .. } if code == INSUFFICIENT_VERSION_CODE)
    }
}

// ── Pagination ──────────────────────────────────────────────────────────────

/// Zero-based page request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub number: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn first(size: u32) -> Self {
        Self { number: 0, size }
    }

    pub fn next(self) -> Self {
        Self {
            number: self.number + 1,
            size: self.size,
        }
    }
}

/// One page of a paginated listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_number: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.page_number + 1 < self.total_pages
    }
}

/// Drain a paginated endpoint into one ordered list.
pub async fn collect_pages<T, F, Fut>(page_size: u32, mut fetch: F) -> Result<Vec<T>, BackboneError>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, BackboneError>>,
{
    let mut items = Vec::new();
    let mut request = PageRequest::first(page_size);
    for _ in 0..MAX_PAGES {
        let page = fetch(request).await?;
        let has_more = page.has_more();
        items.extend(page.items);
        if !has_more {
            return Ok(items);
        }
        request = request.next();
    }
    Err(BackboneError::Transport(format!(
        "pagination did not terminate after {MAX_PAGES} pages"
    )))
}

// ── Sync runs ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartSyncRunStatus {
    Created,
    NoNewEvents,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncRunResponse {
    pub status: StartSyncRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_run_id: Option<SyncRunId>,
}

impl StartSyncRunResponse {
    pub fn created(id: SyncRunId) -> Self {
        Self {
            status: StartSyncRunStatus::Created,
            sync_run_id: Some(id),
        }
    }

    pub fn no_new_events() -> Self {
        Self {
            status: StartSyncRunStatus::NoNewEvents,
            sync_run_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeExternalEventSyncRequest {
    pub external_event_results: Vec<ExternalEventResult>,
    /// See [`CreateDatawalletModificationsRequest::local_index`].
    #[serde(default)]
    pub local_index: Option<ModificationIndex>,
    pub datawallet_modifications: Vec<WireModificationCreate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeExternalEventSyncResponse {
    pub new_unsynced_external_events_exist: bool,
    /// Index of the last stored modification, when any were sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_datawallet_modification_index: Option<ModificationIndex>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeDatawalletVersionUpgradeRequest {
    pub new_datawallet_version: DatawalletVersion,
    #[serde(default)]
    pub local_index: Option<ModificationIndex>,
    pub datawallet_modifications: Vec<WireModificationCreate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeDatawalletVersionUpgradeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_datawallet_modification_index: Option<ModificationIndex>,
}

// ── Datawallet log ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatawalletInfo {
    pub version: DatawalletVersion,
}

/// A stored log entry as the backbone returns it.
///
/// Tags stay strings so that an entry written by newer code decodes into a
/// typed error instead of failing the whole page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireModification {
    pub id: BackboneModificationId,
    pub index: ModificationIndex,
    pub object_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_category: Option<String>,
    pub collection: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_payload: Option<String>,
    pub datawallet_version: DatawalletVersion,
    /// Echo of [`WireModificationCreate::local_id`]; absent on entries
    /// written by clients that do not send one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalModificationId>,
}

/// A log entry as the client submits it; the backbone assigns id and index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireModificationCreate {
    pub object_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_category: Option<String>,
    pub collection: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_payload: Option<String>,
    pub datawallet_version: DatawalletVersion,
    /// The queue id of the local modification. The backbone stores it with
    /// the entry, so a device that never saw the acknowledgement of a push
    /// recognizes its own entries on the next pull.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalModificationId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatawalletModificationsRequest {
    /// The last index this device has consumed. The backbone rejects the push
    /// with [`OUTDATED_INDEX_CODE`] when its log has moved past it.
    #[serde(default)]
    pub local_index: Option<ModificationIndex>,
    pub modifications: Vec<WireModificationCreate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatawalletModificationsResponse {
    pub new_index: ModificationIndex,
}

/// Authenticated request/response access to the backbone.
#[async_trait]
pub trait Backbone: Send + Sync {
    async fn start_sync_run(
        &self,
        kind: SyncRunKind,
    ) -> Result<StartSyncRunResponse, BackboneError>;

    async fn get_external_events_of_sync_run(
        &self,
        sync_run: &SyncRunId,
        page: PageRequest,
    ) -> Result<Page<ExternalEvent>, BackboneError>;

    async fn finalize_external_event_sync(
        &self,
        sync_run: &SyncRunId,
        request: FinalizeExternalEventSyncRequest,
    ) -> Result<FinalizeExternalEventSyncResponse, BackboneError>;

    async fn finalize_datawallet_version_upgrade(
        &self,
        sync_run: &SyncRunId,
        request: FinalizeDatawalletVersionUpgradeRequest,
    ) -> Result<FinalizeDatawalletVersionUpgradeResponse, BackboneError>;

    async fn get_datawallet(&self) -> Result<DatawalletInfo, BackboneError>;

    /// Entries with an index strictly greater than `after_index`.
    async fn get_datawallet_modifications(
        &self,
        after_index: Option<ModificationIndex>,
        page: PageRequest,
    ) -> Result<Page<WireModification>, BackboneError>;

    async fn create_datawallet_modifications(
        &self,
        request: CreateDatawalletModificationsRequest,
    ) -> Result<CreateDatawalletModificationsResponse, BackboneError>;
}
