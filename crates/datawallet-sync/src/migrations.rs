//! Datawallet schema migrations.
//!
//! Two independent tables, one per axis:
//!
//! | Axis       | Runs                             | Recorded as                        |
//! |------------|----------------------------------|------------------------------------|
//! | `Identity` | once per identity, in a sync run | `newDatawalletVersion` on finalize |
//! | `Device`   | once per device, locally         | `DeviceDatawalletVersion` cursor   |
//!
//! Each table maps target version `v` to the step that migrates `v-1 -> v`.
//! [`Migrations::new`] validates both tables at startup: versions must be
//! exactly `1..=N` and both axes must reach the same `N`, which becomes the
//! supported version. A missing step is therefore a construction error, not
//! something discovered halfway through an upgrade.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use datawallet_types::{
    DatawalletCollection, DatawalletVersion, LocalModification, ModificationKind, PayloadCategory,
};
use thiserror::Error;
use tracing::debug;

use crate::collection::SynchronizedCollection;
use crate::error::SyncError;
use crate::store::{CollectionStore, SyncStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MigrationAxis {
    Identity,
    Device,
}

impl MigrationAxis {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationAxis::Identity => "identity",
            MigrationAxis::Device => "device",
        }
    }
}

impl std::fmt::Display for MigrationAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationTableError {
    #[error("{axis} migrations: version 0 is the starting point and cannot be migrated to")]
    ZeroVersion { axis: MigrationAxis },
    #[error("{axis} migrations: version {version} registered twice")]
    Duplicate {
        axis: MigrationAxis,
        version: DatawalletVersion,
    },
    #[error("{axis} migrations: no step for {missing}")]
    Gap {
        axis: MigrationAxis,
        missing: DatawalletVersion,
    },
    #[error("identity migrations reach {identity} but device migrations reach {device}")]
    AxisMismatch {
        identity: DatawalletVersion,
        device: DatawalletVersion,
    },
}

/// What a migration step gets to work with.
pub struct MigrationContext {
    pub axis: MigrationAxis,
    /// The version this step migrates to.
    pub version: DatawalletVersion,
    documents: Arc<dyn CollectionStore>,
    queue: Option<Arc<dyn SyncStore>>,
}

impl MigrationContext {
    pub(crate) fn new(
        axis: MigrationAxis,
        version: DatawalletVersion,
        documents: Arc<dyn CollectionStore>,
        queue: Option<Arc<dyn SyncStore>>,
    ) -> Self {
        Self {
            axis,
            version,
            documents,
            queue,
        }
    }

    pub fn documents(&self) -> &dyn CollectionStore {
        self.documents.as_ref()
    }

    /// A writer whose queued modifications carry this step's version.
    ///
    /// Device steps never share their writes: the writer they get does not
    /// queue anything.
    pub fn collection(&self, collection: DatawalletCollection) -> SynchronizedCollection {
        let queue = match self.axis {
            MigrationAxis::Identity => self.queue.clone(),
            MigrationAxis::Device => None,
        };
        SynchronizedCollection::new(collection, self.documents.clone(), queue).stamped(self.version)
    }

    /// Queue a raw modification (identity steps only).
    pub fn enqueue(&self, modification: &LocalModification) -> Result<(), SyncError> {
        match (&self.queue, self.axis) {
            (Some(queue), MigrationAxis::Identity) => Ok(queue.enqueue(modification)?),
            _ => Ok(()),
        }
    }
}

/// One migration step.
#[async_trait]
pub trait Migration: Send + Sync {
    async fn migrate(&self, ctx: &MigrationContext) -> anyhow::Result<()>;
}

/// A step with nothing to do.
pub struct NoopMigration;

#[async_trait]
impl Migration for NoopMigration {
    async fn migrate(&self, _ctx: &MigrationContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Identity step that shares every object already stored locally.
///
/// Used as the first identity migration when the datawallet is switched on
/// for an identity that already has local state: queues a TechnicalData
/// Create for every document of the given collections.
pub struct SeedExistingObjects {
    collections: Vec<DatawalletCollection>,
}

impl SeedExistingObjects {
    pub fn new(collections: impl IntoIterator<Item = DatawalletCollection>) -> Self {
        Self {
            collections: collections.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Migration for SeedExistingObjects {
    async fn migrate(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        for &collection in &self.collections {
            let objects = ctx.documents().list(collection)?;
            debug!(%collection, count = objects.len(), "seeding existing objects");
            for (id, document) in objects {
                ctx.enqueue(&LocalModification::write(
                    ModificationKind::Create,
                    collection,
                    id,
                    PayloadCategory::TechnicalData,
                    document,
                    ctx.version,
                ))?;
            }
        }
        Ok(())
    }
}

/// The steps of one axis, keyed by target version.
#[derive(Default)]
pub struct MigrationTable {
    steps: BTreeMap<DatawalletVersion, Arc<dyn Migration>>,
    duplicates: Vec<DatawalletVersion>,
}

impl MigrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the step migrating `version - 1 -> version`.
    pub fn register(mut self, version: u32, migration: impl Migration + 'static) -> Self {
        let version = DatawalletVersion::new(version);
        if self.steps.insert(version, Arc::new(migration)).is_some() {
            self.duplicates.push(version);
        }
        self
    }

    pub fn max_version(&self) -> DatawalletVersion {
        self.steps
            .keys()
            .next_back()
            .copied()
            .unwrap_or(DatawalletVersion::ZERO)
    }

    pub fn get(&self, version: DatawalletVersion) -> Option<Arc<dyn Migration>> {
        self.steps.get(&version).cloned()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn validate(&self, axis: MigrationAxis) -> Result<DatawalletVersion, MigrationTableError> {
        if let Some(&version) = self.duplicates.first() {
            return Err(MigrationTableError::Duplicate { axis, version });
        }
        if self.steps.contains_key(&DatawalletVersion::ZERO) {
            return Err(MigrationTableError::ZeroVersion { axis });
        }
        let max = self.max_version();
        if let Some(missing) = DatawalletVersion::ZERO
            .steps_to(max)
            .find(|v| !self.steps.contains_key(v))
        {
            return Err(MigrationTableError::Gap { axis, missing });
        }
        Ok(max)
    }
}

/// Both validated tables and the version they reach.
pub struct Migrations {
    identity: MigrationTable,
    device: MigrationTable,
    supported: DatawalletVersion,
}

impl Migrations {
    pub fn new(
        identity: MigrationTable,
        device: MigrationTable,
    ) -> Result<Self, MigrationTableError> {
        let identity_max = identity.validate(MigrationAxis::Identity)?;
        let device_max = device.validate(MigrationAxis::Device)?;
        if identity_max != device_max {
            return Err(MigrationTableError::AxisMismatch {
                identity: identity_max,
                device: device_max,
            });
        }
        Ok(Self {
            identity,
            device,
            supported: identity_max,
        })
    }

    /// No migrations: the supported version is 0.
    pub fn none() -> Self {
        Self {
            identity: MigrationTable::new(),
            device: MigrationTable::new(),
            supported: DatawalletVersion::ZERO,
        }
    }

    /// The highest version this build can interpret.
    pub fn supported_version(&self) -> DatawalletVersion {
        self.supported
    }

    fn table(&self, axis: MigrationAxis) -> &MigrationTable {
        match axis {
            MigrationAxis::Identity => &self.identity,
            MigrationAxis::Device => &self.device,
        }
    }

    /// The ordered steps taking `axis` from `current` to the supported version.
    ///
    /// Empty when already there.
    pub fn plan(
        &self,
        axis: MigrationAxis,
        current: DatawalletVersion,
    ) -> Result<Vec<(DatawalletVersion, Arc<dyn Migration>)>, SyncError> {
        let target = self.supported;
        if current > target {
            return Err(SyncError::CurrentBiggerThanTarget { current, target });
        }
        current
            .steps_to(target)
            .map(|version| {
                self.table(axis)
                    .get(version)
                    .map(|m| (version, m))
                    .ok_or(SyncError::MissingMigration { version })
            })
            .collect()
    }
}
