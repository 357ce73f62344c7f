//! Read-only snapshots of managed instances for inspection tooling.
//!
//! A snapshot merges static descriptor data with the runtime state of one
//! object manager at the instant it was taken; it carries no control
//! surface.

use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::descriptor::DependencyKind;
use crate::manager::ManagedState;

#[derive(Clone, Debug, Serialize)]
pub struct ManagerSnapshot {
    pub instance: String,
    pub id: Uuid,
    pub module_type: String,
    pub state: ManagedState,
    pub dependencies: Vec<DependencySnapshot>,
    pub exposures: Vec<ExposureSnapshot>,
    pub config: BTreeMap<String, serde_json::Value>,
    pub failure: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DependencySnapshot {
    pub point: String,
    pub capability: String,
    pub kind: DependencyKind,
    pub required: bool,
    pub min_cardinality: usize,
    pub satisfied: bool,
    /// Bound providers in ranking order.
    pub bound: Vec<BoundProviderSnapshot>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BoundProviderSnapshot {
    pub registration: u64,
    pub ranking: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExposureSnapshot {
    pub point: String,
    pub capability: String,
    pub registration: u64,
    pub managed: bool,
}
