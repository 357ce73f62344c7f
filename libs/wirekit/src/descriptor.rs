//! The dependency point model: pure data plus matching logic.
//!
//! A [`ModuleDescriptor`] is the engine's sole input boundary: it arrives
//! already parsed, with an explicit callback table instead of any runtime
//! method lookup. Point kinds are a closed set dispatched by tag.

use serde::Serialize;
use std::{fmt, sync::Arc};

use crate::capability::{CapabilityInstance, CapabilityTypeId, Filter, Properties};
use crate::registry::Provider;

/// Invoked when a provider is bound to or unbound from a dependency point.
/// Receives the manager's target object and the provider in question.
pub type BindCallback =
    Arc<dyn Fn(&CapabilityInstance, &Provider) -> anyhow::Result<()> + Send + Sync>;

/// Invoked on activation/deactivation with the manager's target object.
pub type LifecycleCallback = Arc<dyn Fn(&CapabilityInstance) -> anyhow::Result<()> + Send + Sync>;

/// Invoked once after all configure points validated, handing the applied
/// values to the target object.
pub type ConfigureCallback = Arc<
    dyn Fn(&CapabilityInstance, &std::collections::BTreeMap<String, serde_json::Value>) -> anyhow::Result<()>
        + Send
        + Sync,
>;

/// Projects the target object into the capability payload to register for
/// an expose point (e.g. upcast a concrete service to its contract trait).
pub type ProvideCallback =
    Arc<dyn Fn(&CapabilityInstance) -> anyhow::Result<CapabilityInstance> + Send + Sync>;

/// Closed set of dependency point kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Cardinality 0 or 1 active binding; ranking picks among candidates.
    Inject,
    /// Cardinality 0..N; every accepted provider is bound.
    Track,
}

/// Expected JSON kind of a configure value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ValueKind {
    /// True when `value` is of this kind. `Float` admits any JSON number;
    /// `Integer` only integral ones.
    #[must_use]
    pub fn admits(self, value: &serde_json::Value) -> bool {
        match self {
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Float => value.is_number(),
            ValueKind::String => value.is_string(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
        }
    }
}

/// A declared need for capabilities of one type.
#[derive(Clone)]
pub struct DependencyPoint {
    pub name: String,
    pub kind: DependencyKind,
    pub capability: CapabilityTypeId,
    pub filter: Option<Filter>,
    pub required: bool,
    /// 0 for optional points, ≥1 for required ones.
    pub min_cardinality: usize,
    pub on_bind: Option<BindCallback>,
    pub on_unbind: Option<BindCallback>,
}

impl DependencyPoint {
    /// A required inject point (exactly one active binding, min cardinality 1).
    #[must_use]
    pub fn inject(name: impl Into<String>, capability: CapabilityTypeId) -> Self {
        Self {
            name: name.into(),
            kind: DependencyKind::Inject,
            capability,
            filter: None,
            required: true,
            min_cardinality: 1,
            on_bind: None,
            on_unbind: None,
        }
    }

    /// An optional track point (0..N bindings, min cardinality 0).
    #[must_use]
    pub fn track(name: impl Into<String>, capability: CapabilityTypeId) -> Self {
        Self {
            name: name.into(),
            kind: DependencyKind::Track,
            capability,
            filter: None,
            required: false,
            min_cardinality: 0,
            on_bind: None,
            on_unbind: None,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self.min_cardinality = 0;
        self
    }

    /// Require at least `min` bound providers (marks the point required).
    #[must_use]
    pub fn with_min_cardinality(mut self, min: usize) -> Self {
        self.min_cardinality = min;
        self.required = min > 0;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn on_bind(
        mut self,
        callback: impl Fn(&CapabilityInstance, &Provider) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.on_bind = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_unbind(
        mut self,
        callback: impl Fn(&CapabilityInstance, &Provider) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.on_unbind = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for DependencyPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyPoint")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("capability", &self.capability)
            .field("filter", &self.filter)
            .field("required", &self.required)
            .field("min_cardinality", &self.min_cardinality)
            .field("on_bind", &self.on_bind.is_some())
            .field("on_unbind", &self.on_unbind.is_some())
            .finish()
    }
}

/// A declared capability this module publishes once ready.
#[derive(Clone)]
pub struct ExposePoint {
    pub name: String,
    pub capability: CapabilityTypeId,
    pub properties: Properties,
    pub ranking: i64,
    /// Additionally exported for remote management tooling. Recorded on the
    /// registration and in snapshots; the management protocol itself lives
    /// in higher layers.
    pub managed: bool,
    pub provide: ProvideCallback,
}

impl ExposePoint {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        capability: CapabilityTypeId,
        provide: impl Fn(&CapabilityInstance) -> anyhow::Result<CapabilityInstance>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            capability,
            properties: Properties::new(),
            ranking: 0,
            managed: false,
            provide: Arc::new(provide),
        }
    }

    #[must_use]
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_ranking(mut self, ranking: i64) -> Self {
        self.ranking = ranking;
        self
    }

    #[must_use]
    pub fn managed(mut self) -> Self {
        self.managed = true;
        self
    }
}

impl fmt::Debug for ExposePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExposePoint")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .field("properties", &self.properties)
            .field("ranking", &self.ranking)
            .field("managed", &self.managed)
            .finish_non_exhaustive()
    }
}

/// A named configuration value applied once during configuration.
#[derive(Clone, Debug)]
pub struct ConfigurePoint {
    pub name: String,
    pub expected: ValueKind,
}

impl ConfigurePoint {
    #[must_use]
    pub fn new(name: impl Into<String>, expected: ValueKind) -> Self {
        Self {
            name: name.into(),
            expected,
        }
    }
}

/// Immutable description of one module instance: what it needs, what it
/// offers, how it is configured.
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub module_type: String,
    /// Instance identity under one factory.
    pub name: String,
    pub dependencies: Vec<DependencyPoint>,
    pub exposes: Vec<ExposePoint>,
    pub configures: Vec<ConfigurePoint>,
    pub auto_launch: bool,
    pub on_configure: Option<ConfigureCallback>,
    pub on_activate: Option<LifecycleCallback>,
    pub on_deactivate: Option<LifecycleCallback>,
}

impl ModuleDescriptor {
    #[must_use]
    pub fn new(module_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module_type: module_type.into(),
            name: name.into(),
            dependencies: Vec::new(),
            exposes: Vec::new(),
            configures: Vec::new(),
            auto_launch: false,
            on_configure: None,
            on_activate: None,
            on_deactivate: None,
        }
    }

    #[must_use]
    pub fn with_dependency(mut self, point: DependencyPoint) -> Self {
        self.dependencies.push(point);
        self
    }

    #[must_use]
    pub fn with_expose(mut self, point: ExposePoint) -> Self {
        self.exposes.push(point);
        self
    }

    #[must_use]
    pub fn with_configure(mut self, point: ConfigurePoint) -> Self {
        self.configures.push(point);
        self
    }

    /// Mark for launch by `Factory::auto_launch()`.
    #[must_use]
    pub fn auto_launch(mut self) -> Self {
        self.auto_launch = true;
        self
    }

    /// Hand the applied configure values to the target once they validate.
    #[must_use]
    pub fn on_configure(
        mut self,
        callback: impl Fn(
            &CapabilityInstance,
            &std::collections::BTreeMap<String, serde_json::Value>,
        ) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.on_configure = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_activate(
        mut self,
        callback: impl Fn(&CapabilityInstance) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_activate = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_deactivate(
        mut self,
        callback: impl Fn(&CapabilityInstance) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_deactivate = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("module_type", &self.module_type)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("exposes", &self.exposes)
            .field("configures", &self.configures)
            .field("auto_launch", &self.auto_launch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    trait Probe: Send + Sync {}

    #[test]
    fn inject_defaults_to_required_single() {
        let point = DependencyPoint::inject("probe", CapabilityTypeId::of::<dyn Probe>());
        assert_eq!(point.kind, DependencyKind::Inject);
        assert!(point.required);
        assert_eq!(point.min_cardinality, 1);

        let point = point.optional();
        assert!(!point.required);
        assert_eq!(point.min_cardinality, 0);
    }

    #[test]
    fn track_defaults_to_optional() {
        let point = DependencyPoint::track("probes", CapabilityTypeId::of::<dyn Probe>());
        assert!(!point.required);
        assert_eq!(point.min_cardinality, 0);

        let point = point.with_min_cardinality(2);
        assert!(point.required, "non-zero minimum marks the point required");
        assert_eq!(point.min_cardinality, 2);
    }

    #[test]
    fn value_kind_admits_matrix() {
        assert!(ValueKind::Bool.admits(&json!(true)));
        assert!(!ValueKind::Bool.admits(&json!(1)));

        assert!(ValueKind::Integer.admits(&json!(3)));
        assert!(!ValueKind::Integer.admits(&json!(3.5)));

        assert!(ValueKind::Float.admits(&json!(3.5)));
        assert!(ValueKind::Float.admits(&json!(3)), "Float admits integers");

        assert!(ValueKind::String.admits(&json!("x")));
        assert!(ValueKind::Array.admits(&json!([1, 2])));
        assert!(ValueKind::Object.admits(&json!({"a": 1})));
        assert!(!ValueKind::Object.admits(&json!([1])));
    }

    #[test]
    fn descriptor_builder_collects_points_in_order() {
        let capability = CapabilityTypeId::of::<dyn Probe>();
        let descriptor = ModuleDescriptor::new("sensor", "sensor-1")
            .with_dependency(DependencyPoint::inject("a", capability))
            .with_dependency(DependencyPoint::track("b", capability))
            .with_configure(ConfigurePoint::new("rate", ValueKind::Integer))
            .auto_launch();

        assert_eq!(descriptor.module_type, "sensor");
        assert_eq!(descriptor.name, "sensor-1");
        assert_eq!(descriptor.dependencies.len(), 2);
        assert_eq!(descriptor.dependencies[0].name, "a");
        assert_eq!(descriptor.dependencies[1].name, "b");
        assert_eq!(descriptor.configures.len(), 1);
        assert!(descriptor.auto_launch);
    }
}
