//! Capability Registry (C6): maps a capability verb (`reason`, `search`,
//! `read`, `scrape`, `execute`, `email`, `sms`, `imagine`, `speak`,
//! `transcribe`) to the ordered list of services that can satisfy it.
//!
//! `resolve` always prefers a curated provider (priority `[0, 99]`) over a
//! community one (priority `>= 100`) by picking the lowest active priority.

use std::collections::HashMap;

use saturn_store::{SnapshotStore, StoreError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub service_slug: String,
    pub priority: u32,
    pub active: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CapabilityState {
    providers: HashMap<String, Vec<ProviderEntry>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("no active provider registered for capability {0}")]
    NoProvider(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct CapabilityRegistry {
    store: SnapshotStore<CapabilityState>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new(store: SnapshotStore<CapabilityState>) -> Self {
        Self { store }
    }

    /// Register (or re-register) a provider for a capability. Registering
    /// the same `service_slug` twice for one capability replaces its entry.
    pub async fn register(
        &self,
        capability: impl Into<String>,
        entry: ProviderEntry,
    ) -> Result<(), CapabilityError> {
        let capability = capability.into();
        self.store
            .mutate(move |state| -> Result<(), CapabilityError> {
                let entries = state.providers.entry(capability).or_default();
                entries.retain(|existing| existing.service_slug != entry.service_slug);
                entries.push(entry);
                Ok(())
            })
            .await
    }

    pub async fn set_active(
        &self,
        capability: &str,
        service_slug: &str,
        active: bool,
    ) -> Result<(), CapabilityError> {
        let capability = capability.to_string();
        let service_slug = service_slug.to_string();
        self.store
            .mutate(move |state| -> Result<(), CapabilityError> {
                if let Some(entries) = state.providers.get_mut(&capability) {
                    for entry in entries.iter_mut() {
                        if entry.service_slug == service_slug {
                            entry.active = active;
                        }
                    }
                }
                Ok(())
            })
            .await
    }

    /// Resolve a capability to the active provider with the lowest
    /// priority number. Curated providers (`[0, 99]`) therefore win over
    /// community providers (`>= 100`) whenever both are active.
    pub async fn resolve(&self, capability: &str) -> Result<String, CapabilityError> {
        let capability_key = capability.to_string();
        self.store
            .view(move |state| {
                state
                    .providers
                    .get(&capability_key)
                    .into_iter()
                    .flatten()
                    .filter(|entry| entry.active)
                    .min_by_key(|entry| entry.priority)
                    .map(|entry| entry.service_slug.clone())
            })
            .await
            .ok_or_else(|| CapabilityError::NoProvider(capability.to_string()))
    }

    pub async fn providers_for(&self, capability: &str) -> Vec<ProviderEntry> {
        let capability_key = capability.to_string();
        self.store
            .view(move |state| state.providers.get(&capability_key).cloned().unwrap_or_default())
            .await
    }

    /// Every capability with at least one registered provider, for catalog
    /// listings. Order is not significant.
    pub async fn capabilities(&self) -> Vec<String> {
        self.store
            .view(|state| state.providers.keys().cloned().collect())
            .await
    }
}
