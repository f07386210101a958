//! Typed identifiers for local modifications, backbone records and identities.
//!
//! Two families live here:
//!
//! - [`LocalModificationId`] wraps a UUIDv7 (time-ordered, minted on this
//!   device). It never leaves the device; the backbone assigns its own ids.
//! - Backbone-assigned and application-level ids ([`IdentityAddress`],
//!   [`SyncRunId`], [`ExternalEventId`], [`BackboneModificationId`],
//!   [`ObjectId`]) are opaque strings. We never parse them, only compare and
//!   echo them back.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Id of a modification queued on this device but not yet pushed (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalModificationId(uuid::Uuid);

impl LocalModificationId {
    /// Create a new time-ordered ID (UUIDv7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for human display only.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl Default for LocalModificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for LocalModificationId {
    fn from(u: uuid::Uuid) -> Self {
        Self(u)
    }
}

impl fmt::Display for LocalModificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for LocalModificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalModificationId({})", self.short())
    }
}

// ── Opaque string ids ───────────────────────────────────────────────────────

/// The address of an identity (e.g. `did:e:example.com:dids:abc123`).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityAddress(String);

/// Backbone-assigned id of a sync run.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncRunId(String);

/// Backbone-assigned id of an external event.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalEventId(String);

/// Backbone-assigned id of a stored datawallet modification.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackboneModificationId(String);

/// Id of a synchronized object (relationship, message, file, attribute ...).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

macro_rules! impl_opaque_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap a raw id string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw id string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume into the raw id string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_opaque_id!(IdentityAddress, "IdentityAddress");
impl_opaque_id!(SyncRunId, "SyncRunId");
impl_opaque_id!(ExternalEventId, "ExternalEventId");
impl_opaque_id!(BackboneModificationId, "BackboneModificationId");
impl_opaque_id!(ObjectId, "ObjectId");
