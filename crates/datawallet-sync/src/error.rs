//! Engine error taxonomy.
//!
//! [`SyncError`] is what every public operation returns. It is `Clone` so the
//! result of one in-flight synchronization can be handed to every caller
//! attached to it. Each variant maps to a stable string [`code`](SyncError::code)
//! that is reported to the backbone for per-event failures.
//!
//! Collaborator hooks (appliers, migrations, cache fetchers, processors)
//! return `anyhow::Result`. [`error_code`] recovers a domain code from those
//! by downcasting to [`SyncError`] or [`CodedError`].

use datawallet_types::{DatawalletVersion, ModificationIndex, SyncRunKind};
use thiserror::Error;

use crate::backbone::BackboneError;
use crate::constants::UNKNOWN_ERROR_CODE;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The identity runs a schema this build cannot interpret.
    #[error(
        "supported datawallet version {supported} is lower than the identity's ({})",
        fmt_version(.required)
    )]
    InsufficientSupportedVersion {
        supported: DatawalletVersion,
        required: Option<DatawalletVersion>,
    },

    #[error("current datawallet version {current} is bigger than target {target}")]
    CurrentBiggerThanTarget {
        current: DatawalletVersion,
        target: DatawalletVersion,
    },

    #[error("no migration registered for datawallet version {version}")]
    MissingMigration { version: DatawalletVersion },

    #[error("invalid migration table: {0}")]
    InvalidMigrationTable(String),

    #[error("migration to {version} failed: {message}")]
    MigrationFailed {
        version: DatawalletVersion,
        message: String,
    },

    #[error("no active {expected} sync run to finalize")]
    NoActiveSyncRun { expected: SyncRunKind },

    #[error("a sync run is already active")]
    SyncRunAlreadyActive,

    #[error("unsupported external event type: {0}")]
    UnsupportedExternalEventType(String),

    #[error("unsupported collection: {0}")]
    UnsupportedCollection(String),

    #[error("unsupported modification type: {0}")]
    UnsupportedModificationKind(String),

    #[error("unsupported payload category: {0}")]
    UnsupportedPayloadCategory(String),

    #[error("modification {index} requires a payload but has none")]
    MissingPayload { index: ModificationIndex },

    /// The backbone acknowledged a push at a different index than the one
    /// its payloads were sealed for.
    #[error("backbone acknowledged index {actual:?}, expected {expected}")]
    IndexMismatch {
        expected: ModificationIndex,
        actual: Option<ModificationIndex>,
    },

    #[error("backbone: {0}")]
    Backbone(#[from] BackboneError),

    #[error("storage: {0}")]
    Storage(String),

    #[error("secrets: {0}")]
    Secrets(String),

    #[error("processing: {0}")]
    Processing(String),

    #[error("serialization: {0}")]
    Serialization(String),

    #[error("config: {0}")]
    Config(String),
}

fn fmt_version(v: &Option<DatawalletVersion>) -> String {
    v.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

impl SyncError {
    /// Stable, machine-readable error code.
    pub fn code(&self) -> &str {
        match self {
            SyncError::InsufficientSupportedVersion { .. } => {
                "error.sync.datawallet.insufficientSupportedVersion"
            }
            SyncError::CurrentBiggerThanTarget { .. } => {
                "error.sync.datawallet.currentBiggerThanTarget"
            }
            SyncError::MissingMigration { .. } => "error.sync.datawallet.missingMigration",
            SyncError::InvalidMigrationTable(_) => "error.sync.datawallet.invalidMigrationTable",
            SyncError::MigrationFailed { .. } => "error.sync.datawallet.migrationFailed",
            SyncError::NoActiveSyncRun { .. } => "error.sync.noActiveSyncRun",
            SyncError::SyncRunAlreadyActive => "error.sync.syncRunAlreadyActive",
            SyncError::UnsupportedExternalEventType(_) => {
                "error.sync.externalEvents.unsupportedType"
            }
            SyncError::UnsupportedCollection(_) => "error.sync.datawallet.unsupportedCollection",
            SyncError::UnsupportedModificationKind(_) => {
                "error.sync.datawallet.unsupportedModificationType"
            }
            SyncError::UnsupportedPayloadCategory(_) => {
                "error.sync.datawallet.unsupportedPayloadCategory"
            }
            SyncError::MissingPayload { .. } => "error.sync.datawallet.missingPayload",
            SyncError::IndexMismatch { .. } => "error.sync.datawallet.indexMismatch",
            SyncError::Backbone(BackboneError::Rejected { code, .. }) => code.as_str(),
            SyncError::Backbone(BackboneError::Transport(_)) => "error.sync.backbone.transport",
            SyncError::Storage(_) => "error.sync.storage",
            SyncError::Secrets(_) => "error.sync.secrets",
            SyncError::Processing(_) => "error.sync.processing",
            SyncError::Serialization(_) => "error.sync.serialization",
            SyncError::Config(_) => "error.sync.config",
        }
    }

    /// Non-retryable: re-issuing the sync cannot succeed without a code or
    /// configuration change.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::InsufficientSupportedVersion { .. }
                | SyncError::CurrentBiggerThanTarget { .. }
                | SyncError::MissingMigration { .. }
                | SyncError::InvalidMigrationTable(_)
                | SyncError::NoActiveSyncRun { .. }
                | SyncError::SyncRunAlreadyActive
        )
    }

    /// Normalize a backbone failure.
    ///
    /// A rejection for an insufficient client version becomes the same
    /// [`SyncError::InsufficientSupportedVersion`] the local pre-check raises.
    pub fn from_backbone(err: BackboneError, supported: DatawalletVersion) -> Self {
        if err.is_insufficient_version() {
            SyncError::InsufficientSupportedVersion {
                supported,
                required: None,
            }
        } else {
            SyncError::Backbone(err)
        }
    }

    /// Wrap a collaborator failure, keeping it if it already is a `SyncError`.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<SyncError>() {
            Ok(e) => e,
            Err(e) => SyncError::Processing(format!("{e:#}")),
        }
    }
}

impl From<crate::store::StoreError> for SyncError {
    fn from(e: crate::store::StoreError) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<crate::secrets::SecretsError> for SyncError {
    fn from(e: crate::secrets::SecretsError) -> Self {
        SyncError::Secrets(e.to_string())
    }
}

impl From<crate::migrations::MigrationTableError> for SyncError {
    fn from(e: crate::migrations::MigrationTableError) -> Self {
        SyncError::InvalidMigrationTable(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// A failure with a domain code, for collaborators that are not part of
/// this crate's taxonomy.
///
/// ```
/// use datawallet_sync::{error_code, CodedError};
///
/// let err = anyhow::Error::new(CodedError::new("error.relationships.wrongStatus", "not active"));
/// assert_eq!(error_code(&err), "error.relationships.wrongStatus");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct CodedError {
    pub code: String,
    pub message: String,
}

impl CodedError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The domain code of a collaborator failure, or `error.sync.unknown`.
pub fn error_code(err: &anyhow::Error) -> String {
    if let Some(e) = err.downcast_ref::<SyncError>() {
        return e.code().to_string();
    }
    if let Some(e) = err.downcast_ref::<CodedError>() {
        return e.code.clone();
    }
    UNKNOWN_ERROR_CODE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::INSUFFICIENT_VERSION_CODE;

    #[test]
    fn test_codes_are_stable() {
        let err = SyncError::InsufficientSupportedVersion {
            supported: DatawalletVersion::new(3),
            required: Some(DatawalletVersion::new(5)),
        };
        assert_eq!(err.code(), "error.sync.datawallet.insufficientSupportedVersion");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("v5"));

        let err = SyncError::UnsupportedExternalEventType("Foo".into());
        assert_eq!(err.code(), "error.sync.externalEvents.unsupportedType");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_backbone_rejection_is_normalized() {
        let err = SyncError::from_backbone(
            BackboneError::Rejected {
                code: INSUFFICIENT_VERSION_CODE.into(),
                message: "upgrade".into(),
            },
            DatawalletVersion::new(2),
        );
        assert!(matches!(
            err,
            SyncError::InsufficientSupportedVersion { supported, required: None }
                if supported == DatawalletVersion::new(2)
        ));

        let err = SyncError::from_backbone(
            BackboneError::Transport("connection reset".into()),
            DatawalletVersion::new(2),
        );
        assert_eq!(err.code(), "error.sync.backbone.transport");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_code_downcasts() {
        let err = anyhow::Error::new(SyncError::MissingPayload {
            index: ModificationIndex::new(4),
        });
        assert_eq!(error_code(&err), "error.sync.datawallet.missingPayload");

        let err = anyhow::Error::new(CodedError::new("error.messages.unknown", "nope"));
        assert_eq!(error_code(&err), "error.messages.unknown");

        let err = anyhow::anyhow!("something broke");
        assert_eq!(error_code(&err), UNKNOWN_ERROR_CODE);
    }

    #[test]
    fn test_from_anyhow_keeps_sync_errors() {
        let err = SyncError::from_anyhow(anyhow::Error::new(SyncError::SyncRunAlreadyActive));
        assert_eq!(err, SyncError::SyncRunAlreadyActive);

        let err = SyncError::from_anyhow(anyhow::anyhow!("boom").context("applying"));
        assert!(matches!(err, SyncError::Processing(ref m) if m.contains("boom")));
    }
}
