//! Object manager factory: creates, tracks, auto-launches and shuts down
//! the object managers of one module type.
//!
//! A factory owns exactly the managers it has launched. Tracking is keyed
//! by instance name; launching the same name twice while still tracked is
//! an error. `shutdown` tolerates individual disposal trouble (disposal
//! itself never fails, it only logs) and always clears the tracked set.

use dashmap::DashMap;
use std::sync::Arc;

use crate::capability::CapabilityInstance;
use crate::config::ConfigSource;
use crate::descriptor::ModuleDescriptor;
use crate::manager::{ManagerError, ObjectManager};
use crate::registry::RegistryAdapter;

/// Builds the target object for one descriptor.
pub type TargetFactory =
    Arc<dyn Fn(&ModuleDescriptor) -> anyhow::Result<CapabilityInstance> + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum FactoryError {
    #[error("descriptor '{instance}' has module type '{found}', factory builds '{expected}'")]
    ModuleTypeMismatch {
        instance: String,
        expected: String,
        found: String,
    },

    #[error("instance '{instance}' is already launched")]
    AlreadyLaunched { instance: String },

    #[error("creating the target for instance '{instance}' failed")]
    TargetCreation {
        instance: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("launching instance '{instance}' failed")]
    Launch {
        instance: String,
        #[source]
        source: ManagerError,
    },
}

pub struct ObjectManagerFactory {
    module_type: String,
    adapter: Arc<dyn RegistryAdapter>,
    config: Arc<dyn ConfigSource>,
    make_target: TargetFactory,
    /// Construction-time descriptor pool consumed by `auto_launch`.
    descriptors: Vec<Arc<ModuleDescriptor>>,
    launched: DashMap<String, Arc<ObjectManager>>,
}

impl ObjectManagerFactory {
    pub fn new(
        module_type: impl Into<String>,
        adapter: Arc<dyn RegistryAdapter>,
        config: Arc<dyn ConfigSource>,
        make_target: impl Fn(&ModuleDescriptor) -> anyhow::Result<CapabilityInstance>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            module_type: module_type.into(),
            adapter,
            config,
            make_target: Arc::new(make_target),
            descriptors: Vec::new(),
            launched: DashMap::new(),
        }
    }

    /// Add a descriptor to the construction-time pool.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: ModuleDescriptor) -> Self {
        self.descriptors.push(Arc::new(descriptor));
        self
    }

    #[inline]
    #[must_use]
    pub fn module_type(&self) -> &str {
        &self.module_type
    }

    /// Create a manager and its target for `descriptor`, track it, then
    /// drive it through configure and subscribe.
    ///
    /// # Errors
    /// `ModuleTypeMismatch`, `AlreadyLaunched`, `TargetCreation`, or
    /// `Launch` when configuration/subscription fails; in the last case
    /// the manager stays tracked (in FAILED) so an external actor can
    /// still `close` it.
    pub fn launch(&self, descriptor: ModuleDescriptor) -> Result<Arc<ObjectManager>, FactoryError> {
        self.launch_arc(Arc::new(descriptor))
    }

    fn launch_arc(
        &self,
        descriptor: Arc<ModuleDescriptor>,
    ) -> Result<Arc<ObjectManager>, FactoryError> {
        if descriptor.module_type != self.module_type {
            return Err(FactoryError::ModuleTypeMismatch {
                instance: descriptor.name.clone(),
                expected: self.module_type.clone(),
                found: descriptor.module_type.clone(),
            });
        }
        let target =
            (self.make_target)(&descriptor).map_err(|source| FactoryError::TargetCreation {
                instance: descriptor.name.clone(),
                source,
            })?;
        let manager = ObjectManager::new(descriptor.clone(), target, self.adapter.clone());
        match self.launched.entry(descriptor.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(FactoryError::AlreadyLaunched {
                    instance: descriptor.name.clone(),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(manager.clone());
            }
        }
        tracing::info!(
            module_type = %self.module_type,
            instance = %descriptor.name,
            id = %manager.id(),
            "Launched object manager"
        );
        manager
            .configure(self.config.as_ref())
            .and_then(|()| manager.resolve())
            .map_err(|source| FactoryError::Launch {
                instance: descriptor.name.clone(),
                source,
            })?;
        Ok(manager)
    }

    /// Launch every pool descriptor marked auto-launch. Individual
    /// failures are logged and do not stop the remaining launches; the
    /// managers that were created (including failed-but-tracked ones) are
    /// returned.
    pub fn auto_launch(&self) -> Vec<Arc<ObjectManager>> {
        let mut managers = Vec::new();
        for descriptor in &self.descriptors {
            if !descriptor.auto_launch {
                continue;
            }
            match self.launch_arc(descriptor.clone()) {
                Ok(manager) => managers.push(manager),
                Err(FactoryError::Launch { instance, source }) => {
                    tracing::warn!(
                        module_type = %self.module_type,
                        instance = %instance,
                        error = %source,
                        "Auto-launched instance failed while being driven"
                    );
                    if let Some(manager) = self.launched.get(&instance) {
                        managers.push(Arc::clone(manager.value()));
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        module_type = %self.module_type,
                        error = %error,
                        "Skipping auto-launch descriptor"
                    );
                }
            }
        }
        managers
    }

    #[must_use]
    pub fn has_launched(&self, descriptor: &ModuleDescriptor) -> bool {
        self.launched.contains_key(&descriptor.name)
    }

    #[must_use]
    pub fn launch_count(&self) -> usize {
        self.launched.len()
    }

    /// All currently tracked managers (for inspection tooling).
    #[must_use]
    pub fn managers(&self) -> Vec<Arc<ObjectManager>> {
        self.launched
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Dispose the matching manager if tracked; no-op otherwise.
    pub fn close(&self, descriptor: &ModuleDescriptor) {
        if let Some((_, manager)) = self.launched.remove(&descriptor.name) {
            manager.close();
        }
    }

    /// Dispose every tracked manager and clear the tracked set.
    pub fn shutdown(&self) {
        let managers: Vec<Arc<ObjectManager>> = self
            .launched
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.launched.clear();
        for manager in managers {
            manager.close();
        }
        tracing::info!(module_type = %self.module_type, "Factory shut down");
    }
}

impl std::fmt::Debug for ObjectManagerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectManagerFactory")
            .field("module_type", &self.module_type)
            .field("descriptors", &self.descriptors.len())
            .field("launched", &self.launched.len())
            .finish_non_exhaustive()
    }
}
