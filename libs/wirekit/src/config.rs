//! Configuration sources for configure points.
//!
//! The engine consumes already-materialized configuration: a [`ConfigSource`]
//! hands out one raw JSON section per module instance, and the object
//! manager resolves its declared configure points against that section
//! exactly once, during the NEWBORN → CONFIGURED transition. Lookup is
//! strict: a declared point with no value, or a value of the wrong kind,
//! fails configuration.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Configuration error raised while applying configure points.
#[derive(thiserror::Error, Clone, Debug)]
pub enum ConfigError {
    #[error("instance '{instance}' has no configuration section")]
    MissingSection { instance: String },

    #[error("instance '{instance}' configuration must be an object")]
    InvalidSection { instance: String },

    #[error("missing configure value '{name}' for instance '{instance}'")]
    MissingValue { instance: String, name: String },

    #[error("configure value '{name}' for instance '{instance}' is not of kind {expected:?}")]
    TypeMismatch {
        instance: String,
        name: String,
        expected: crate::descriptor::ValueKind,
    },
}

/// Provider of per-instance configuration (raw JSON sections only).
pub trait ConfigSource: Send + Sync {
    /// Returns the raw JSON section for the instance, if any.
    fn instance_config(&self, instance: &str) -> Option<serde_json::Value>;
}

/// A `ConfigSource` with nothing in it.
///
/// Instances whose descriptors declare no configure points configure fine
/// against it; anything with a declared point fails strictly.
#[derive(Debug, Default)]
pub struct EmptyConfigSource;

impl ConfigSource for EmptyConfigSource {
    fn instance_config(&self, _instance: &str) -> Option<serde_json::Value> {
        None
    }
}

/// Map-backed `ConfigSource` for embedders and tests.
#[derive(Default)]
pub struct StaticConfigSource {
    sections: RwLock<HashMap<String, serde_json::Value>>,
}

impl StaticConfigSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the section for one instance.
    pub fn set(&self, instance: impl Into<String>, section: serde_json::Value) {
        self.sections.write().insert(instance.into(), section);
    }

    /// Drop the section for one instance.
    pub fn remove(&self, instance: &str) {
        self.sections.write().remove(instance);
    }
}

impl ConfigSource for StaticConfigSource {
    fn instance_config(&self, instance: &str) -> Option<serde_json::Value> {
        self.sections.read().get(instance).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_source_has_no_sections() {
        let source = EmptyConfigSource;
        assert!(source.instance_config("anything").is_none());
    }

    #[test]
    fn static_source_set_and_remove() {
        let source = StaticConfigSource::new();
        assert!(source.instance_config("calc").is_none());

        source.set("calc", json!({"precision": 4}));
        assert_eq!(
            source.instance_config("calc"),
            Some(json!({"precision": 4}))
        );

        source.set("calc", json!({"precision": 8}));
        assert_eq!(
            source.instance_config("calc"),
            Some(json!({"precision": 8})),
            "second set should overwrite the first"
        );

        source.remove("calc");
        assert!(source.instance_config("calc").is_none());
    }
}
