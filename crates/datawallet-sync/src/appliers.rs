//! External-event appliers and their registry.
//!
//! The registry is built once at startup and maps each known
//! [`ExternalEventType`] to the collaborator that applies it. Unknown tags,
//! and known tags nobody registered, resolve to
//! [`SyncError::UnsupportedExternalEventType`], which fails only that event.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use datawallet_types::{ChangedItem, ExternalEvent, ExternalEventType};

use crate::error::SyncError;

/// Applies one kind of external event to local state.
#[async_trait]
pub trait ExternalEventApplier: Send + Sync {
    /// Apply the event; report the local item it changed, if any.
    async fn apply(&self, event: &ExternalEvent) -> anyhow::Result<Option<ChangedItem>>;
}

#[derive(Default)]
pub struct ApplierRegistry {
    appliers: HashMap<ExternalEventType, Arc<dyn ExternalEventApplier>>,
}

impl std::fmt::Debug for ApplierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplierRegistry")
            .field("types", &self.registered())
            .finish()
    }
}

impl ApplierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an applier, replacing any previous one for the same type.
    pub fn register(
        &mut self,
        event_type: ExternalEventType,
        applier: Arc<dyn ExternalEventApplier>,
    ) -> Option<Arc<dyn ExternalEventApplier>> {
        self.appliers.insert(event_type, applier)
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(
        mut self,
        event_type: ExternalEventType,
        applier: impl ExternalEventApplier + 'static,
    ) -> Self {
        self.register(event_type, Arc::new(applier));
        self
    }

    pub fn get(&self, event_type: ExternalEventType) -> Option<Arc<dyn ExternalEventApplier>> {
        self.appliers.get(&event_type).cloned()
    }

    /// Registered types, in declaration order of [`ExternalEventType`].
    pub fn registered(&self) -> Vec<ExternalEventType> {
        let mut types: Vec<_> = self.appliers.keys().copied().collect();
        types.sort_by_key(|t| *t as u8);
        types
    }

    /// Decode a raw type tag and find its applier.
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn ExternalEventApplier>, SyncError> {
        ExternalEventType::from_str(tag)
            .and_then(|t| self.get(t))
            .ok_or_else(|| SyncError::UnsupportedExternalEventType(tag.to_string()))
    }

    /// Route one event to its applier.
    pub async fn apply(&self, event: &ExternalEvent) -> anyhow::Result<Option<ChangedItem>> {
        let applier = self.resolve(&event.event_type)?;
        applier.apply(event).await
    }
}
