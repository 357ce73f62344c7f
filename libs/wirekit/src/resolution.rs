//! Per-point dependency resolution.
//!
//! A [`PointRuntime`] tracks every live provider matching one dependency
//! point and decides, for each appeared/gone notification, which bind and
//! unbind operations the object manager must perform. The candidate set is
//! ordered by descending ranking with ties broken by registration order;
//! for inject points the head of that order is the preferred binding and
//! the tail are pending backups.
//!
//! This module is pure bookkeeping: callbacks run in the object manager,
//! which also owns the serialization gate.

use crate::descriptor::{DependencyKind, DependencyPoint};
use crate::registry::{Provider, RegistrationId};

/// What the manager must do after a provider appeared.
#[derive(Debug)]
pub(crate) enum BindAction {
    /// Duplicate delivery or a backup candidate; nothing to do.
    None,
    Bind(Provider),
    /// A strictly higher-ranked candidate displaces the active binding.
    Replace { unbind: Provider, bind: Provider },
}

/// What the manager must do after a provider disappeared.
#[derive(Debug)]
pub(crate) enum UnbindAction {
    /// Unknown id or an unbound backup; nothing to do.
    None,
    Unbind(Provider),
    /// The bound provider left and a backup takes over in the same step.
    Promote { unbind: Provider, bind: Provider },
}

struct Candidate {
    provider: Provider,
    bound: bool,
}

/// Runtime state of one dependency point.
#[derive(Default)]
pub(crate) struct PointRuntime {
    /// Live matching providers, ordered by (ranking desc, registration asc).
    candidates: Vec<Candidate>,
}

impl PointRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn position_of(&self, id: RegistrationId) -> Option<usize> {
        self.candidates.iter().position(|c| c.provider.id == id)
    }

    fn insert_sorted(&mut self, provider: Provider) -> usize {
        let at = self
            .candidates
            .iter()
            .position(|c| {
                (c.provider.ranking, std::cmp::Reverse(c.provider.id))
                    < (provider.ranking, std::cmp::Reverse(provider.id))
            })
            .unwrap_or(self.candidates.len());
        self.candidates.insert(
            at,
            Candidate {
                provider,
                bound: false,
            },
        );
        at
    }

    fn bound_inject_index(&self) -> Option<usize> {
        self.candidates.iter().position(|c| c.bound)
    }

    pub(crate) fn provider_appeared(
        &mut self,
        point: &DependencyPoint,
        provider: &Provider,
    ) -> BindAction {
        if self.position_of(provider.id).is_some() {
            // Duplicate delivery of an already-known registration.
            return BindAction::None;
        }
        let at = self.insert_sorted(provider.clone());
        match point.kind {
            DependencyKind::Track => {
                self.candidates[at].bound = true;
                BindAction::Bind(provider.clone())
            }
            DependencyKind::Inject => match self.bound_inject_index() {
                None => {
                    self.candidates[at].bound = true;
                    BindAction::Bind(provider.clone())
                }
                Some(current) => {
                    let displaced = &self.candidates[current].provider;
                    if provider.ranking > displaced.ranking {
                        let unbind = displaced.clone();
                        self.candidates[current].bound = false;
                        self.candidates[at].bound = true;
                        BindAction::Replace {
                            unbind,
                            bind: provider.clone(),
                        }
                    } else {
                        // Retained as a pending backup.
                        BindAction::None
                    }
                }
            },
        }
    }

    pub(crate) fn provider_gone(
        &mut self,
        point: &DependencyPoint,
        id: RegistrationId,
    ) -> UnbindAction {
        let Some(at) = self.position_of(id) else {
            return UnbindAction::None;
        };
        let removed = self.candidates.remove(at);
        if !removed.bound {
            return UnbindAction::None;
        }
        match point.kind {
            DependencyKind::Track => UnbindAction::Unbind(removed.provider),
            DependencyKind::Inject => match self.candidates.first_mut() {
                Some(backup) => {
                    backup.bound = true;
                    UnbindAction::Promote {
                        unbind: removed.provider,
                        bind: backup.provider.clone(),
                    }
                }
                None => UnbindAction::Unbind(removed.provider),
            },
        }
    }

    pub(crate) fn bound_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.bound).count()
    }

    /// Bound providers in ranking order.
    pub(crate) fn bound_providers(&self) -> impl Iterator<Item = &Provider> {
        self.candidates
            .iter()
            .filter(|c| c.bound)
            .map(|c| &c.provider)
    }

    pub(crate) fn satisfied(&self, point: &DependencyPoint) -> bool {
        self.bound_count() >= point.min_cardinality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityInstance, CapabilityTypeId, Properties};
    use std::sync::Arc;

    fn provider(id: u64, ranking: i64) -> Provider {
        Provider {
            id: RegistrationId::from_raw(id),
            instance: CapabilityInstance::of(id),
            properties: Arc::new(Properties::new()),
            ranking,
        }
    }

    fn inject_point() -> DependencyPoint {
        DependencyPoint::inject("p", CapabilityTypeId::of::<u64>())
    }

    fn track_point() -> DependencyPoint {
        DependencyPoint::track("p", CapabilityTypeId::of::<u64>())
    }

    fn bound_ids(rt: &PointRuntime) -> Vec<u64> {
        rt.bound_providers().map(|p| p.id.value()).collect()
    }

    #[test]
    fn inject_binds_first_provider_only() {
        let point = inject_point();
        let mut rt = PointRuntime::new();

        assert!(matches!(
            rt.provider_appeared(&point, &provider(1, 0)),
            BindAction::Bind(_)
        ));
        assert!(
            matches!(rt.provider_appeared(&point, &provider(2, 0)), BindAction::None),
            "equal-ranked newcomer stays a backup"
        );
        assert_eq!(bound_ids(&rt), vec![1]);
        assert!(rt.satisfied(&point));
    }

    #[test]
    fn inject_replaces_only_on_strictly_higher_ranking() {
        let point = inject_point();
        let mut rt = PointRuntime::new();
        rt.provider_appeared(&point, &provider(1, 5));

        match rt.provider_appeared(&point, &provider(2, 9)) {
            BindAction::Replace { unbind, bind } => {
                assert_eq!(unbind.id.value(), 1);
                assert_eq!(bind.id.value(), 2);
            }
            other => panic!("expected replacement, got {other:?}"),
        }
        assert_eq!(bound_ids(&rt), vec![2]);

        assert!(
            matches!(rt.provider_appeared(&point, &provider(3, 9)), BindAction::None),
            "equal ranking never displaces the active binding"
        );
    }

    #[test]
    fn inject_promotes_best_backup_when_bound_leaves() {
        let point = inject_point();
        let mut rt = PointRuntime::new();
        rt.provider_appeared(&point, &provider(1, 5));
        rt.provider_appeared(&point, &provider(2, 3));
        rt.provider_appeared(&point, &provider(3, 4));

        match rt.provider_gone(&point, RegistrationId::from_raw(1)) {
            UnbindAction::Promote { unbind, bind } => {
                assert_eq!(unbind.id.value(), 1);
                assert_eq!(bind.id.value(), 3, "highest-ranked backup wins");
            }
            other => panic!("expected promotion, got {other:?}"),
        }
        assert_eq!(bound_ids(&rt), vec![3]);
        assert!(rt.satisfied(&point), "promotion keeps the point satisfied");
    }

    #[test]
    fn inject_backup_ties_break_by_registration_order() {
        let point = inject_point();
        let mut rt = PointRuntime::new();
        rt.provider_appeared(&point, &provider(5, 1));
        rt.provider_appeared(&point, &provider(9, 1));
        rt.provider_appeared(&point, &provider(7, 1));

        match rt.provider_gone(&point, RegistrationId::from_raw(5)) {
            UnbindAction::Promote { bind, .. } => {
                assert_eq!(bind.id.value(), 7, "earlier registration wins the tie");
            }
            other => panic!("expected promotion, got {other:?}"),
        }
    }

    #[test]
    fn inject_unbind_without_backup_unsatisfies() {
        let point = inject_point();
        let mut rt = PointRuntime::new();
        rt.provider_appeared(&point, &provider(1, 0));

        assert!(matches!(
            rt.provider_gone(&point, RegistrationId::from_raw(1)),
            UnbindAction::Unbind(_)
        ));
        assert_eq!(rt.bound_count(), 0);
        assert!(!rt.satisfied(&point));
    }

    #[test]
    fn removing_unbound_backup_is_silent() {
        let point = inject_point();
        let mut rt = PointRuntime::new();
        rt.provider_appeared(&point, &provider(1, 2));
        rt.provider_appeared(&point, &provider(2, 1));

        assert!(matches!(
            rt.provider_gone(&point, RegistrationId::from_raw(2)),
            UnbindAction::None
        ));
        assert_eq!(bound_ids(&rt), vec![1]);
    }

    #[test]
    fn duplicate_and_unknown_deliveries_are_noops() {
        let point = track_point();
        let mut rt = PointRuntime::new();

        assert!(matches!(
            rt.provider_appeared(&point, &provider(1, 0)),
            BindAction::Bind(_)
        ));
        assert!(matches!(
            rt.provider_appeared(&point, &provider(1, 0)),
            BindAction::None
        ));
        assert_eq!(rt.bound_count(), 1);

        assert!(matches!(
            rt.provider_gone(&point, RegistrationId::from_raw(42)),
            UnbindAction::None
        ));
    }

    #[test]
    fn track_binds_every_provider_in_ranking_order() {
        let point = track_point();
        let mut rt = PointRuntime::new();
        rt.provider_appeared(&point, &provider(1, 0));
        rt.provider_appeared(&point, &provider(2, 8));
        rt.provider_appeared(&point, &provider(3, 4));

        assert_eq!(rt.bound_count(), 3);
        assert_eq!(bound_ids(&rt), vec![2, 3, 1]);

        assert!(matches!(
            rt.provider_gone(&point, RegistrationId::from_raw(2)),
            UnbindAction::Unbind(_)
        ));
        assert_eq!(bound_ids(&rt), vec![3, 1]);
    }

    #[test]
    fn min_cardinality_drives_satisfaction() {
        let point =
            DependencyPoint::track("p", CapabilityTypeId::of::<u64>()).with_min_cardinality(2);
        let mut rt = PointRuntime::new();
        assert!(!rt.satisfied(&point));

        rt.provider_appeared(&point, &provider(1, 0));
        assert!(!rt.satisfied(&point));

        rt.provider_appeared(&point, &provider(2, 0));
        assert!(rt.satisfied(&point));

        rt.provider_gone(&point, RegistrationId::from_raw(1));
        assert!(!rt.satisfied(&point));
    }
}
