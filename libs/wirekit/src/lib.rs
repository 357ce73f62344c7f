//! Wirekit: live capability wiring for independently packaged modules.
//!
//! Modules declare what they need (inject/track points) and what they
//! offer (expose points) in a [`ModuleDescriptor`]; an
//! [`ObjectManagerFactory`] launches one [`ObjectManager`] per descriptor,
//! which subscribes to a [`RegistryAdapter`], binds providers as they come
//! and go, and publishes the module's own capabilities only while every
//! required point is satisfied.
//!
//! Typical flow:
//! - Build a descriptor with explicit bind/unbind callbacks and expose
//!   projections.
//! - Hand it to a per-type factory together with a registry adapter and a
//!   config source.
//! - `launch` drives the instance through configuration and subscription;
//!   from there the registry drives it: providers appearing complete the
//!   resolution and the manager exposes and activates, providers
//!   disappearing demote it and retract its capabilities.
//!
//! Each manager serializes all of its work through a per-instance gate, so
//! callbacks never observe concurrent mutation; see [`manager`] for the
//! mailbox details.

pub mod capability;
pub mod config;
pub mod descriptor;
pub mod factory;
pub mod manager;
pub mod registry;
mod resolution;
pub mod snapshot;

pub use capability::{
    CapabilityInstance, CapabilityTypeId, Filter, MANAGED_PROPERTY, Properties, RANKING_PROPERTY,
};
pub use config::{ConfigError, ConfigSource, EmptyConfigSource, StaticConfigSource};
pub use descriptor::{
    BindCallback, ConfigureCallback, ConfigurePoint, DependencyKind, DependencyPoint, ExposePoint,
    LifecycleCallback, ModuleDescriptor, ProvideCallback, ValueKind,
};
pub use factory::{FactoryError, ObjectManagerFactory, TargetFactory};
pub use manager::{ManagedState, ManagerError, ObjectManager};
pub use registry::{
    AdapterError, CapabilityListener, InMemoryRegistry, Provider, RegistrationId, RegistryAdapter,
    SubscriptionId,
};
pub use snapshot::{
    BoundProviderSnapshot, DependencySnapshot, ExposureSnapshot, ManagerSnapshot,
};
