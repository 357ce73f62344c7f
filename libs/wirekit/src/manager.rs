//! The object manager: per-module-instance state machine.
//!
//! Design notes:
//! - Single-writer actor. Every mutation (configure, bind/unbind,
//!   expose, activate, close) runs under one core mutex. Registry
//!   notifications, which may originate on arbitrary threads, enter
//!   through a FIFO mailbox and are applied by whichever thread can take
//!   the core; a notification arriving while this manager is already
//!   mid-operation (including re-entrantly, when the registry echoes this
//!   manager's own exposure back at it) is parked and applied before the
//!   draining thread leaves.
//! - Exposure is all-or-nothing: the first failed registration rolls back
//!   this attempt's earlier registrations and fails the manager.
//! - DISPOSED accepts nothing. FAILED accepts exactly one operation,
//!   `close()`, so an external actor can reclaim subscriptions.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};
use uuid::Uuid;

use crate::capability::{CapabilityInstance, MANAGED_PROPERTY, RANKING_PROPERTY};
use crate::config::{ConfigError, ConfigSource};
use crate::descriptor::{DependencyPoint, ModuleDescriptor};
use crate::registry::{
    AdapterError, CapabilityListener, Provider, RegistrationId, RegistryAdapter, SubscriptionId,
};
use crate::resolution::{BindAction, PointRuntime, UnbindAction};
use crate::snapshot::{BoundProviderSnapshot, DependencySnapshot, ExposureSnapshot, ManagerSnapshot};

/// Lifecycle stage of one module instance.
///
/// The declaration order is the total order behind [`ObjectManager::has_reached`];
/// transition legality is the explicit graph driven by the manager, never
/// this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedState {
    Newborn,
    Configured,
    ResolvingDependencies,
    DependenciesResolved,
    ServicesExposed,
    Active,
    Disposed,
    Failed,
}

#[derive(thiserror::Error, Debug)]
pub enum ManagerError {
    #[error("instance '{instance}' in state {state:?} cannot {operation}")]
    InvalidState {
        instance: String,
        state: ManagedState,
        operation: &'static str,
    },

    #[error("configuration of instance '{instance}' failed")]
    Configuration {
        instance: String,
        #[source]
        source: ConfigError,
    },

    #[error("subscription for point '{point}' of instance '{instance}' failed")]
    Subscription {
        instance: String,
        point: String,
        #[source]
        source: AdapterError,
    },

    #[error("callback '{callback}' of instance '{instance}' failed")]
    Callback {
        instance: String,
        callback: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("exposing point '{point}' of instance '{instance}' failed")]
    Exposure {
        instance: String,
        point: String,
        #[source]
        source: AdapterError,
    },
}

enum RegistryEvent {
    Appeared { point: usize, provider: Provider },
    Gone { point: usize, registration: RegistrationId },
}

struct ManagerCore {
    state: ManagedState,
    points: Vec<PointRuntime>,
    subscriptions: Vec<SubscriptionId>,
    exposed: Vec<RegistrationId>,
    config: BTreeMap<String, serde_json::Value>,
    failure: Option<anyhow::Error>,
}

impl ManagerCore {
    fn new(descriptor: &ModuleDescriptor) -> Self {
        Self {
            state: ManagedState::Newborn,
            points: descriptor
                .dependencies
                .iter()
                .map(|_| PointRuntime::new())
                .collect(),
            subscriptions: Vec::new(),
            exposed: Vec::new(),
            config: BTreeMap::new(),
            failure: None,
        }
    }
}

/// Owns one target instance and drives it through configuration,
/// resolution, exposure, activation and disposal.
pub struct ObjectManager {
    id: Uuid,
    descriptor: Arc<ModuleDescriptor>,
    target: CapabilityInstance,
    adapter: Arc<dyn RegistryAdapter>,
    core: Mutex<ManagerCore>,
    mailbox: Mutex<VecDeque<RegistryEvent>>,
}

/// Routes registry notifications for one dependency point into the
/// owning manager's mailbox.
struct PointListener {
    manager: Weak<ObjectManager>,
    point: usize,
}

impl CapabilityListener for PointListener {
    fn provider_appeared(&self, provider: &Provider) {
        if let Some(manager) = self.manager.upgrade() {
            manager.deliver(RegistryEvent::Appeared {
                point: self.point,
                provider: provider.clone(),
            });
        }
    }

    fn provider_gone(&self, registration: RegistrationId) {
        if let Some(manager) = self.manager.upgrade() {
            manager.deliver(RegistryEvent::Gone {
                point: self.point,
                registration,
            });
        }
    }
}

impl ObjectManager {
    pub(crate) fn new(
        descriptor: Arc<ModuleDescriptor>,
        target: CapabilityInstance,
        adapter: Arc<dyn RegistryAdapter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            core: Mutex::new(ManagerCore::new(&descriptor)),
            mailbox: Mutex::new(VecDeque::new()),
            descriptor,
            target,
            adapter,
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[inline]
    #[must_use]
    pub fn module_type(&self) -> &str {
        &self.descriptor.module_type
    }

    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn state(&self) -> ManagedState {
        self.core.lock().state
    }

    /// "Has reached at least `state`" in the total state order; an
    /// observer query, not a transition-legality check.
    #[must_use]
    pub fn has_reached(&self, state: ManagedState) -> bool {
        self.core.lock().state >= state
    }

    /// Rendered failure cause, once FAILED.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.core.lock().failure.as_ref().map(|e| format!("{e:#}"))
    }

    // ---- factory-driven transitions ----

    /// NEWBORN → CONFIGURED: apply configure points once.
    pub(crate) fn configure(&self, source: &dyn ConfigSource) -> Result<(), ManagerError> {
        let mut core = self.core.lock();
        if core.state != ManagedState::Newborn {
            return Err(ManagerError::InvalidState {
                instance: self.descriptor.name.clone(),
                state: core.state,
                operation: "configure",
            });
        }
        if let Err(error) = self.apply_configure_points(&mut core, source) {
            self.fail_locked(&mut core, anyhow::Error::new(error.clone()));
            return Err(ManagerError::Configuration {
                instance: self.descriptor.name.clone(),
                source: error,
            });
        }
        if let Some(callback) = &self.descriptor.on_configure {
            if let Err(source) = callback(&self.target, &core.config) {
                let source = source.context("configure callback");
                // The caller gets the rich error; the retained cause is a
                // rendered copy of the same chain.
                self.fail_locked(&mut core, anyhow::anyhow!("{source:#}"));
                return Err(ManagerError::Callback {
                    instance: self.descriptor.name.clone(),
                    callback: "configure".to_owned(),
                    source,
                });
            }
        }
        core.state = ManagedState::Configured;
        tracing::debug!(instance = %self.descriptor.name, "Configured");
        Ok(())
    }

    fn apply_configure_points(
        &self,
        core: &mut ManagerCore,
        source: &dyn ConfigSource,
    ) -> Result<(), ConfigError> {
        if self.descriptor.configures.is_empty() {
            return Ok(());
        }
        let instance = &self.descriptor.name;
        let section =
            source
                .instance_config(instance)
                .ok_or_else(|| ConfigError::MissingSection {
                    instance: instance.clone(),
                })?;
        let values = section
            .as_object()
            .ok_or_else(|| ConfigError::InvalidSection {
                instance: instance.clone(),
            })?;
        for point in &self.descriptor.configures {
            let value = values
                .get(&point.name)
                .ok_or_else(|| ConfigError::MissingValue {
                    instance: instance.clone(),
                    name: point.name.clone(),
                })?;
            if !point.expected.admits(value) {
                return Err(ConfigError::TypeMismatch {
                    instance: instance.clone(),
                    name: point.name.clone(),
                    expected: point.expected,
                });
            }
            core.config.insert(point.name.clone(), value.clone());
        }
        Ok(())
    }

    /// CONFIGURED → RESOLVING_DEPENDENCIES / DEPENDENCIES_RESOLVED:
    /// subscribe every dependency point and evaluate. Pre-existing
    /// providers arrive as replayed events and are applied before this
    /// call returns.
    pub(crate) fn resolve(self: &Arc<Self>) -> Result<(), ManagerError> {
        let mut core = self.core.lock();
        if core.state != ManagedState::Configured {
            return Err(ManagerError::InvalidState {
                instance: self.descriptor.name.clone(),
                state: core.state,
                operation: "subscribe",
            });
        }
        for (index, point) in self.descriptor.dependencies.iter().enumerate() {
            let listener = Arc::new(PointListener {
                manager: Arc::downgrade(self),
                point: index,
            });
            match self
                .adapter
                .subscribe(point.capability, point.filter.clone(), listener)
            {
                Ok(subscription) => core.subscriptions.push(subscription),
                Err(error) => {
                    self.fail_locked(&mut core, anyhow::Error::new(error.clone()));
                    return Err(ManagerError::Subscription {
                        instance: self.descriptor.name.clone(),
                        point: point.name.clone(),
                        source: error,
                    });
                }
            }
        }
        core.state = if self.all_satisfied(&core) {
            ManagedState::DependenciesResolved
        } else {
            ManagedState::ResolvingDependencies
        };
        tracing::debug!(
            instance = %self.descriptor.name,
            state = ?core.state,
            points = self.descriptor.dependencies.len(),
            "Subscribed dependency points"
        );
        if core.state == ManagedState::DependenciesResolved {
            self.advance_locked(&mut core);
        }
        drop(core);
        self.pump();
        Ok(())
    }

    /// Dispose from any state. Idempotent and infallible: adapter and
    /// callback errors on this path are logged and do not prevent
    /// DISPOSED.
    pub fn close(&self) {
        let mut core = self.core.lock();
        if core.state == ManagedState::Disposed {
            return;
        }
        let was_active = core.state == ManagedState::Active;
        self.retract_exposures(&mut core);
        if was_active {
            if let Some(callback) = &self.descriptor.on_deactivate {
                if let Err(error) = callback(&self.target) {
                    tracing::warn!(
                        instance = %self.descriptor.name,
                        error = %error,
                        "Deactivation callback failed during close"
                    );
                }
            }
        }
        for subscription in core.subscriptions.drain(..) {
            if let Err(error) = self.adapter.unsubscribe(subscription) {
                tracing::warn!(
                    instance = %self.descriptor.name,
                    subscription = subscription.value(),
                    error = %error,
                    "Failed to unsubscribe dependency point"
                );
            }
        }
        core.state = ManagedState::Disposed;
        tracing::info!(instance = %self.descriptor.name, "Disposed");
        drop(core);
        // Flush anything that queued up while we held the core.
        self.pump();
    }

    // ---- event intake ----

    fn deliver(&self, event: RegistryEvent) {
        self.mailbox.lock().push_back(event);
        self.pump();
    }

    /// Drain the mailbox if no other thread is mid-operation. The thread
    /// holding the core always re-checks the mailbox after releasing it,
    /// so an event parked here is picked up by exactly one drainer.
    fn pump(&self) {
        loop {
            let processed = {
                let Some(mut core) = self.core.try_lock() else {
                    return;
                };
                match self.mailbox.lock().pop_front() {
                    Some(event) => {
                        self.apply_event(&mut core, event);
                        true
                    }
                    None => false,
                }
            };
            if !processed && self.mailbox.lock().is_empty() {
                return;
            }
        }
    }

    fn apply_event(&self, core: &mut ManagerCore, event: RegistryEvent) {
        match core.state {
            ManagedState::Disposed | ManagedState::Failed => return,
            // Subscriptions only exist from the resolving states onward.
            ManagedState::Newborn | ManagedState::Configured => return,
            _ => {}
        }
        let was_satisfied = self.all_satisfied(core);
        let outcome = match event {
            RegistryEvent::Appeared { point, provider } => {
                self.handle_appeared(core, point, &provider)
            }
            RegistryEvent::Gone {
                point,
                registration,
            } => self.handle_gone(core, point, registration),
        };
        if let Err(cause) = outcome {
            self.fail_locked(core, cause);
            return;
        }
        let satisfied = self.all_satisfied(core);
        if satisfied == was_satisfied {
            return;
        }
        if satisfied {
            if core.state == ManagedState::ResolvingDependencies {
                core.state = ManagedState::DependenciesResolved;
                tracing::info!(instance = %self.descriptor.name, "Dependencies resolved");
                self.advance_locked(core);
            }
        } else if matches!(
            core.state,
            ManagedState::ServicesExposed | ManagedState::Active
        ) {
            self.demote_locked(core);
        }
    }

    fn handle_appeared(
        &self,
        core: &mut ManagerCore,
        index: usize,
        provider: &Provider,
    ) -> anyhow::Result<()> {
        let point = &self.descriptor.dependencies[index];
        match core.points[index].provider_appeared(point, provider) {
            BindAction::None => Ok(()),
            BindAction::Bind(bind) => self.run_bind(point, &bind),
            BindAction::Replace { unbind, bind } => {
                self.run_unbind(point, &unbind)?;
                self.run_bind(point, &bind)
            }
        }
    }

    fn handle_gone(
        &self,
        core: &mut ManagerCore,
        index: usize,
        registration: RegistrationId,
    ) -> anyhow::Result<()> {
        let point = &self.descriptor.dependencies[index];
        match core.points[index].provider_gone(point, registration) {
            UnbindAction::None => Ok(()),
            UnbindAction::Unbind(unbind) => self.run_unbind(point, &unbind),
            UnbindAction::Promote { unbind, bind } => {
                self.run_unbind(point, &unbind)?;
                self.run_bind(point, &bind)
            }
        }
    }

    fn run_bind(&self, point: &DependencyPoint, provider: &Provider) -> anyhow::Result<()> {
        tracing::debug!(
            instance = %self.descriptor.name,
            point = %point.name,
            registration = provider.id.value(),
            ranking = provider.ranking,
            "Bound provider"
        );
        if let Some(callback) = &point.on_bind {
            callback(&self.target, provider)
                .map_err(|e| e.context(format!("bind callback of point '{}'", point.name)))?;
        }
        Ok(())
    }

    fn run_unbind(&self, point: &DependencyPoint, provider: &Provider) -> anyhow::Result<()> {
        tracing::debug!(
            instance = %self.descriptor.name,
            point = %point.name,
            registration = provider.id.value(),
            "Unbound provider"
        );
        if let Some(callback) = &point.on_unbind {
            callback(&self.target, provider)
                .map_err(|e| e.context(format!("unbind callback of point '{}'", point.name)))?;
        }
        Ok(())
    }

    // ---- internal transitions (core held) ----

    fn all_satisfied(&self, core: &ManagerCore) -> bool {
        self.descriptor
            .dependencies
            .iter()
            .zip(&core.points)
            .all(|(point, runtime)| runtime.satisfied(point))
    }

    /// DEPENDENCIES_RESOLVED → SERVICES_EXPOSED → ACTIVE, or FAILED.
    fn advance_locked(&self, core: &mut ManagerCore) {
        for point in &self.descriptor.exposes {
            let payload = match (point.provide)(&self.target) {
                Ok(payload) => payload,
                Err(error) => {
                    self.fail_locked(
                        core,
                        error.context(format!("provide callback of point '{}'", point.name)),
                    );
                    return;
                }
            };
            let mut properties = point.properties.clone();
            properties.insert(RANKING_PROPERTY.to_owned(), serde_json::json!(point.ranking));
            if point.managed {
                properties.insert(MANAGED_PROPERTY.to_owned(), serde_json::json!(true));
            }
            match self.adapter.register(point.capability, payload, properties) {
                Ok(registration) => core.exposed.push(registration),
                Err(error) => {
                    // All-or-nothing: fail_locked retracts what this
                    // attempt already registered.
                    self.fail_locked(
                        core,
                        anyhow::Error::new(ManagerError::Exposure {
                            instance: self.descriptor.name.clone(),
                            point: point.name.clone(),
                            source: error,
                        }),
                    );
                    return;
                }
            }
        }
        core.state = ManagedState::ServicesExposed;
        tracing::info!(
            instance = %self.descriptor.name,
            exposed = core.exposed.len(),
            "Services exposed"
        );
        if let Some(callback) = &self.descriptor.on_activate {
            if let Err(error) = callback(&self.target) {
                self.fail_locked(core, error.context("activation callback"));
                return;
            }
        }
        core.state = ManagedState::Active;
        tracing::info!(instance = %self.descriptor.name, "Active");
    }

    /// SERVICES_EXPOSED / ACTIVE → RESOLVING_DEPENDENCIES. Exposure
    /// handles are unregistered first.
    fn demote_locked(&self, core: &mut ManagerCore) {
        let was_active = core.state == ManagedState::Active;
        self.retract_exposures(core);
        if was_active {
            if let Some(callback) = &self.descriptor.on_deactivate {
                if let Err(error) = callback(&self.target) {
                    self.fail_locked(core, error.context("deactivation callback"));
                    return;
                }
            }
        }
        core.state = ManagedState::ResolvingDependencies;
        tracing::info!(instance = %self.descriptor.name, "Demoted to dependency resolution");
    }

    fn retract_exposures(&self, core: &mut ManagerCore) {
        for registration in core.exposed.drain(..) {
            if let Err(error) = self.adapter.unregister(registration) {
                tracing::warn!(
                    instance = %self.descriptor.name,
                    registration = registration.value(),
                    error = %error,
                    "Failed to unregister exposed capability"
                );
            }
        }
    }

    /// Terminal failure: retract exposures, retain the cause.
    fn fail_locked(&self, core: &mut ManagerCore, cause: anyhow::Error) {
        self.retract_exposures(core);
        tracing::error!(
            instance = %self.descriptor.name,
            error = %cause,
            "Manager failed"
        );
        core.failure = Some(cause);
        core.state = ManagedState::Failed;
    }

    // ---- observability ----

    /// Read-only summary for inspection and management tooling.
    #[must_use]
    pub fn snapshot(&self) -> ManagerSnapshot {
        let core = self.core.lock();
        ManagerSnapshot {
            instance: self.descriptor.name.clone(),
            id: self.id,
            module_type: self.descriptor.module_type.clone(),
            state: core.state,
            dependencies: self
                .descriptor
                .dependencies
                .iter()
                .zip(&core.points)
                .map(|(point, runtime)| DependencySnapshot {
                    point: point.name.clone(),
                    capability: point.capability.as_str().to_owned(),
                    kind: point.kind,
                    required: point.required,
                    min_cardinality: point.min_cardinality,
                    satisfied: runtime.satisfied(point),
                    bound: runtime
                        .bound_providers()
                        .map(|provider| BoundProviderSnapshot {
                            registration: provider.id.value(),
                            ranking: provider.ranking,
                        })
                        .collect(),
                })
                .collect(),
            exposures: self
                .descriptor
                .exposes
                .iter()
                .zip(&core.exposed)
                .map(|(point, registration)| ExposureSnapshot {
                    point: point.name.clone(),
                    capability: point.capability.as_str().to_owned(),
                    registration: registration.value(),
                    managed: point.managed,
                })
                .collect(),
            config: core.config.clone(),
            failure: core.failure.as_ref().map(|error| format!("{error:#}")),
        }
    }
}

impl std::fmt::Debug for ObjectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectManager")
            .field("id", &self.id)
            .field("instance", &self.descriptor.name)
            .field("module_type", &self.descriptor.module_type)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
