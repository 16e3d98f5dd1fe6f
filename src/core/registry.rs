//! Resource registry.
//!
//! Read-mostly: every scheduling pass works from an immutable snapshot that is
//! rebuilt lazily after administrative changes invalidate it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::core::resource::{Capability, CapabilityKind, Resource};
use crate::core::ValidationError;
use crate::util::{ResourceId, Technology};

/// Immutable view of all registered resources, ordered by id.
pub type RegistrySnapshot = Arc<[Arc<Resource>]>;

/// Holds resource definitions.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: RwLock<BTreeMap<ResourceId, Arc<Resource>>>,
    snapshot: RwLock<Option<RegistrySnapshot>>,
}

impl ResourceRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with resources.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid resource.
    pub fn with_resources(
        resources: impl IntoIterator<Item = Resource>,
    ) -> Result<Self, ValidationError> {
        let registry = Self::new();
        for resource in resources {
            registry.register(resource)?;
        }
        Ok(registry)
    }

    /// Add or replace a resource definition.
    ///
    /// # Errors
    ///
    /// Returns the validation error of an invalid definition; nothing is stored then.
    pub fn register(&self, resource: Resource) -> Result<(), ValidationError> {
        resource.validate()?;
        info!(resource = %resource.id, "resource registered");
        self.resources
            .write()
            .insert(resource.id.clone(), Arc::new(resource));
        self.invalidate();
        Ok(())
    }

    /// Remove a resource definition.
    pub fn remove(&self, id: &str) -> Option<Arc<Resource>> {
        let removed = self.resources.write().remove(id);
        if removed.is_some() {
            info!(resource = %id, "resource removed");
            self.invalidate();
        }
        removed
    }

    /// Drop the cached snapshot.
    pub fn invalidate(&self) {
        *self.snapshot.write() = None;
    }

    /// Current snapshot, rebuilt if invalidated.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        if let Some(snapshot) = self.snapshot.read().as_ref() {
            return Arc::clone(snapshot);
        }
        let built: RegistrySnapshot = self.resources.read().values().cloned().collect();
        debug!(resources = built.len(), "registry snapshot rebuilt");
        *self.snapshot.write() = Some(Arc::clone(&built));
        built
    }

    /// Resource by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Resource>> {
        self.resources.read().get(id).cloned()
    }

    /// Allocatable resources offering `kind` for `technology` (id order).
    #[must_use]
    pub fn candidates(&self, kind: CapabilityKind, technology: Technology) -> Vec<Arc<Resource>> {
        self.snapshot()
            .iter()
            .filter(|r| r.allocatable && r.offers(kind, technology))
            .cloned()
            .collect()
    }

    /// Allocatable value providers (id order).
    #[must_use]
    pub fn value_providers(&self) -> Vec<Arc<Resource>> {
        self.snapshot()
            .iter()
            .filter(|r| r.allocatable && r.capability(CapabilityKind::ValueProvider).is_some())
            .cloned()
            .collect()
    }

    /// Resolve the provider behind an alias capability of `owner`.
    #[must_use]
    pub fn alias_provider(&self, owner: &Resource, capability: &Capability) -> Option<Arc<Resource>> {
        match capability {
            Capability::Alias { provider, .. } => {
                let id = provider.as_deref().unwrap_or(&owner.id);
                self.get(id)
                    .filter(|r| r.capability(CapabilityKind::ValueProvider).is_some())
            }
            _ => None,
        }
    }
}
