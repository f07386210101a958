//! External events and sync runs.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::ExternalEventId;

/// The flavours of backbone sync run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
pub enum SyncRunKind {
    /// Pulls and finalizes external events.
    ExternalEventSync,
    /// Brackets one identity-level datawallet migration step.
    DatawalletVersionUpgrade,
}

impl SyncRunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunKind::ExternalEventSync => "ExternalEventSync",
            SyncRunKind::DatawalletVersionUpgrade => "DatawalletVersionUpgrade",
        }
    }
}

impl std::fmt::Display for SyncRunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The closed set of external event types this engine knows how to route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
pub enum ExternalEventType {
    MessageReceived,
    MessageDelivered,
    RelationshipStatusChanged,
    RelationshipReactivationRequested,
    RelationshipReactivationCompleted,
    IdentityDeletionProcessStarted,
    IdentityDeletionProcessStatusChanged,
    PeerToBeDeleted,
    PeerDeletionCancelled,
    PeerDeleted,
}

impl ExternalEventType {
    /// Parse a wire tag. Unknown tags yield `None`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalEventType::MessageReceived => "MessageReceived",
            ExternalEventType::MessageDelivered => "MessageDelivered",
            ExternalEventType::RelationshipStatusChanged => "RelationshipStatusChanged",
            ExternalEventType::RelationshipReactivationRequested => {
                "RelationshipReactivationRequested"
            }
            ExternalEventType::RelationshipReactivationCompleted => {
                "RelationshipReactivationCompleted"
            }
            ExternalEventType::IdentityDeletionProcessStarted => "IdentityDeletionProcessStarted",
            ExternalEventType::IdentityDeletionProcessStatusChanged => {
                "IdentityDeletionProcessStatusChanged"
            }
            ExternalEventType::PeerToBeDeleted => "PeerToBeDeleted",
            ExternalEventType::PeerDeletionCancelled => "PeerDeletionCancelled",
            ExternalEventType::PeerDeleted => "PeerDeleted",
        }
    }
}

impl std::fmt::Display for ExternalEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A backbone-originated notification, as retrieved for a sync run.
///
/// The type tag stays a raw string here: decoding it is the applier
/// registry's job, so that an unknown tag fails only this event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEvent {
    pub id: ExternalEventId,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Outcome of applying one external event, reported on finalize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEventResult {
    pub external_event_id: ExternalEventId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ExternalEventResult {
    pub fn succeeded(id: ExternalEventId) -> Self {
        Self { external_event_id: id, error_code: None }
    }

    pub fn failed(id: ExternalEventId, code: impl Into<String>) -> Self {
        Self { external_event_id: id, error_code: Some(code.into()) }
    }

    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }
}
