//! Capability identity, payloads and property matching.
//!
//! Design goals:
//! - Providers and consumers address capabilities by *interface type*
//!   (trait object) without knowing each other.
//! - Payloads are `Arc<T>` (T may be unsized) behind a type-erased wrapper
//!   with a checked downcast; no transport or serialization assumptions.
//! - Properties are plain JSON values so registries, filters and snapshots
//!   share one representation.

use serde::Serialize;
use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};

/// Well-known property carrying provider ranking (integer, default 0).
///
/// Rankings break ties between candidate providers for a singular inject
/// point: higher wins, equal ranks fall back to registration order.
pub const RANKING_PROPERTY: &str = "capability.ranking";

/// Well-known property marking a capability as additionally exported for
/// remote management tooling.
pub const MANAGED_PROPERTY: &str = "capability.managed";

/// Properties attached to a capability registration.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Stable identity of a capability interface. Uses fully-qualified
/// `type_name::<T>()`, which works for `T = dyn Trait`.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct CapabilityTypeId(&'static str);

impl CapabilityTypeId {
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        CapabilityTypeId(std::any::type_name::<T>())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for CapabilityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Display for CapabilityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Type-erased capability payload.
///
/// Stores exactly an `Arc<T>` boxed behind `Arc<dyn Any>`; `downcast`
/// recovers it cheaply. The same wrapper carries the target object a
/// manager owns, so bind callbacks and expose projections speak one type.
#[derive(Clone)]
pub struct CapabilityInstance(Arc<dyn Any + Send + Sync>);

impl CapabilityInstance {
    /// Wrap an `Arc<T>`. `T` can be a trait object like `dyn MyApi`.
    #[must_use]
    pub fn new<T>(value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self(Arc::new(value))
    }

    /// Wrap a concrete value directly.
    #[must_use]
    pub fn of<T: Send + Sync + 'static>(value: T) -> Self {
        Self::new(Arc::new(value))
    }

    /// Recover the stored `Arc<T>`; `None` if the payload is a different type.
    #[must_use]
    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.0.downcast_ref::<Arc<T>>().cloned()
    }
}

impl fmt::Debug for CapabilityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CapabilityInstance(..)")
    }
}

/// Conjunction of `key == value` clauses over registration [`Properties`].
///
/// An empty filter matches everything. Registries apply filters when
/// routing provider events to subscriptions.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Filter {
    clauses: Vec<(String, serde_json::Value)>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `key == value` clause.
    #[must_use]
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.clauses.push((key.into(), value.into()));
        self
    }

    /// True when every clause is present and equal in `properties`.
    #[must_use]
    pub fn matches(&self, properties: &Properties) -> bool {
        self.clauses
            .iter()
            .all(|(key, value)| properties.get(key) == Some(value))
    }
}

/// Read the ranking out of registration properties (absent or non-integer → 0).
#[must_use]
pub fn ranking_of(properties: &Properties) -> i64 {
    properties
        .get(RANKING_PROPERTY)
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0)
}
