//! Registry adapter: the narrow interface to the shared capability
//! directory, plus the in-memory adapter used by tests and embedders that
//! do not bring their own.
//!
//! Design notes:
//! - Handles are opaque ids issued by the adapter; nothing is keyed by
//!   object identity.
//! - `InMemoryRegistry` linearizes mutations under one lock and hands the
//!   resulting events to a dispatch queue drained *outside* that lock, so
//!   a listener may call back into the registry (a module exposing its own
//!   capability while reacting to a provider) without deadlocking.
//! - `subscribe` replays already-present matching registrations to the new
//!   listener, so launch order does not matter.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::capability::{CapabilityInstance, CapabilityTypeId, Filter, Properties, ranking_of};

/// Handle for one capability registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RegistrationId(u64);

impl RegistrationId {
    #[inline]
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

/// Handle for one capability subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[inline]
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

/// One provider of a capability, as delivered to listeners.
#[derive(Clone)]
pub struct Provider {
    pub id: RegistrationId,
    pub instance: CapabilityInstance,
    pub properties: Arc<Properties>,
    pub ranking: i64,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("properties", &self.properties)
            .field("ranking", &self.ranking)
            .finish_non_exhaustive()
    }
}

/// Receiver of provider-appeared / provider-gone notifications.
///
/// Notifications may arrive on arbitrary threads; implementations must
/// serialize internally and tolerate duplicates and unknown ids.
pub trait CapabilityListener: Send + Sync {
    fn provider_appeared(&self, provider: &Provider);
    fn provider_gone(&self, registration: RegistrationId);
}

#[derive(thiserror::Error, Clone, Debug)]
pub enum AdapterError {
    #[error("unknown registration handle {registration:?}")]
    UnknownRegistration { registration: RegistrationId },

    #[error("unknown subscription handle {subscription:?}")]
    UnknownSubscription { subscription: SubscriptionId },

    #[error("capability registration rejected: {reason}")]
    Rejected { reason: String },
}

/// The capability directory as this engine consumes it.
///
/// Implementations must be safe for concurrent registration,
/// unregistration and subscription calls from many object managers.
pub trait RegistryAdapter: Send + Sync + 'static {
    /// Start receiving provider events for one capability type. Existing
    /// matching providers are replayed to the listener.
    ///
    /// # Errors
    /// Adapter-specific; the in-memory adapter never fails here.
    fn subscribe(
        &self,
        capability: CapabilityTypeId,
        filter: Option<Filter>,
        listener: Arc<dyn CapabilityListener>,
    ) -> Result<SubscriptionId, AdapterError>;

    /// # Errors
    /// `UnknownSubscription` if the handle was never issued or already
    /// dropped.
    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), AdapterError>;

    /// Publish a capability instance.
    ///
    /// # Errors
    /// Adapter-specific rejection.
    fn register(
        &self,
        capability: CapabilityTypeId,
        instance: CapabilityInstance,
        properties: Properties,
    ) -> Result<RegistrationId, AdapterError>;

    /// # Errors
    /// `UnknownRegistration` if the handle was never issued or already
    /// dropped.
    fn unregister(&self, registration: RegistrationId) -> Result<(), AdapterError>;
}

struct RegistrationRecord {
    capability: CapabilityTypeId,
    provider: Provider,
}

struct SubscriptionRecord {
    capability: CapabilityTypeId,
    filter: Option<Filter>,
    listener: Arc<dyn CapabilityListener>,
}

impl SubscriptionRecord {
    fn matches(&self, capability: CapabilityTypeId, properties: &Properties) -> bool {
        self.capability == capability
            && self.filter.as_ref().is_none_or(|f| f.matches(properties))
    }
}

enum DispatchJob {
    Appeared {
        listener: Arc<dyn CapabilityListener>,
        provider: Provider,
    },
    Gone {
        listener: Arc<dyn CapabilityListener>,
        registration: RegistrationId,
    },
}

#[derive(Default)]
struct Inner {
    registrations: BTreeMap<RegistrationId, RegistrationRecord>,
    subscriptions: BTreeMap<SubscriptionId, SubscriptionRecord>,
}

/// In-memory capability registry.
///
/// Mutations are linearized under `inner`; the events each mutation
/// produces are queued in the same critical section, so queue order equals
/// linearization order. Exactly one thread drains the queue at a time; a
/// re-entrant call from inside a listener parks its events and lets the
/// outer drain pick them up.
#[derive(Default)]
pub struct InMemoryRegistry {
    inner: Mutex<Inner>,
    queue: Mutex<VecDeque<DispatchJob>>,
    draining: AtomicBool,
    next_registration: AtomicU64,
    next_subscription: AtomicU64,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live registrations.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.inner.lock().registrations.len()
    }

    /// Number of live registrations of one capability type.
    #[must_use]
    pub fn registration_count_of(&self, capability: CapabilityTypeId) -> usize {
        self.inner
            .lock()
            .registrations
            .values()
            .filter(|r| r.capability == capability)
            .count()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    fn drain(&self) {
        loop {
            if self.draining.swap(true, Ordering::Acquire) {
                // Another frame is draining (possibly this thread,
                // re-entrantly from a listener); it will pick our jobs up.
                return;
            }
            loop {
                let job = self.queue.lock().pop_front();
                match job {
                    Some(job) => self.run_job(job),
                    None => break,
                }
            }
            self.draining.store(false, Ordering::Release);
            if self.queue.lock().is_empty() {
                return;
            }
            // Jobs landed between the flag release and the check; retry.
        }
    }

    fn run_job(&self, job: DispatchJob) {
        match job {
            DispatchJob::Appeared { listener, provider } => {
                tracing::trace!(registration = provider.id.value(), "Dispatching provider-appeared");
                listener.provider_appeared(&provider);
            }
            DispatchJob::Gone {
                listener,
                registration,
            } => {
                tracing::trace!(registration = registration.value(), "Dispatching provider-gone");
                listener.provider_gone(registration);
            }
        }
    }
}

impl RegistryAdapter for InMemoryRegistry {
    fn subscribe(
        &self,
        capability: CapabilityTypeId,
        filter: Option<Filter>,
        listener: Arc<dyn CapabilityListener>,
    ) -> Result<SubscriptionId, AdapterError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed) + 1);
        {
            let mut inner = self.inner.lock();
            let mut queue = self.queue.lock();
            // Replay existing matches in registration order.
            for record in inner.registrations.values() {
                let matches = record.capability == capability
                    && filter
                        .as_ref()
                        .is_none_or(|f| f.matches(&record.provider.properties));
                if matches {
                    queue.push_back(DispatchJob::Appeared {
                        listener: listener.clone(),
                        provider: record.provider.clone(),
                    });
                }
            }
            inner.subscriptions.insert(
                id,
                SubscriptionRecord {
                    capability,
                    filter,
                    listener,
                },
            );
        }
        self.drain();
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), AdapterError> {
        self.inner
            .lock()
            .subscriptions
            .remove(&subscription)
            .map(|_| ())
            .ok_or(AdapterError::UnknownSubscription { subscription })
    }

    fn register(
        &self,
        capability: CapabilityTypeId,
        instance: CapabilityInstance,
        properties: Properties,
    ) -> Result<RegistrationId, AdapterError> {
        let id = RegistrationId(self.next_registration.fetch_add(1, Ordering::Relaxed) + 1);
        let provider = Provider {
            id,
            instance,
            ranking: ranking_of(&properties),
            properties: Arc::new(properties),
        };
        {
            let mut inner = self.inner.lock();
            let mut queue = self.queue.lock();
            for record in inner.subscriptions.values() {
                if record.matches(capability, &provider.properties) {
                    queue.push_back(DispatchJob::Appeared {
                        listener: record.listener.clone(),
                        provider: provider.clone(),
                    });
                }
            }
            inner
                .registrations
                .insert(id, RegistrationRecord { capability, provider });
        }
        tracing::debug!(capability = %capability, registration = id.value(), "Registered capability");
        self.drain();
        Ok(id)
    }

    fn unregister(&self, registration: RegistrationId) -> Result<(), AdapterError> {
        {
            let mut inner = self.inner.lock();
            let record = inner
                .registrations
                .remove(&registration)
                .ok_or(AdapterError::UnknownRegistration { registration })?;
            let mut queue = self.queue.lock();
            for sub in inner.subscriptions.values() {
                if sub.matches(record.capability, &record.provider.properties) {
                    queue.push_back(DispatchJob::Gone {
                        listener: sub.listener.clone(),
                        registration,
                    });
                }
            }
        }
        tracing::debug!(registration = registration.value(), "Unregistered capability");
        self.drain();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    trait Sensor: Send + Sync {
        fn read(&self) -> i64;
    }

    struct FixedSensor(i64);
    impl Sensor for FixedSensor {
        fn read(&self) -> i64 {
            self.0
        }
    }

    fn sensor_type() -> CapabilityTypeId {
        CapabilityTypeId::of::<dyn Sensor>()
    }

    fn sensor(value: i64) -> CapabilityInstance {
        CapabilityInstance::new(Arc::new(FixedSensor(value)) as Arc<dyn Sensor>)
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Appeared(u64, i64),
        Gone(u64),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }

    impl CapabilityListener for Recorder {
        fn provider_appeared(&self, provider: &Provider) {
            self.events
                .lock()
                .push(Event::Appeared(provider.id.value(), provider.ranking));
        }

        fn provider_gone(&self, registration: RegistrationId) {
            self.events.lock().push(Event::Gone(registration.value()));
        }
    }

    #[test]
    fn register_notifies_matching_subscription() {
        let registry = InMemoryRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry
            .subscribe(sensor_type(), None, recorder.clone())
            .unwrap();

        let id = registry
            .register(sensor_type(), sensor(1), Properties::new())
            .unwrap();

        assert_eq!(recorder.events(), vec![Event::Appeared(id.value(), 0)]);
        assert_eq!(registry.registration_count(), 1);
    }

    #[test]
    fn subscribe_replays_existing_registrations_in_order() {
        let registry = InMemoryRegistry::new();
        let a = registry
            .register(sensor_type(), sensor(1), Properties::new())
            .unwrap();
        let b = registry
            .register(sensor_type(), sensor(2), Properties::new())
            .unwrap();

        let recorder = Arc::new(Recorder::default());
        registry
            .subscribe(sensor_type(), None, recorder.clone())
            .unwrap();

        assert_eq!(
            recorder.events(),
            vec![
                Event::Appeared(a.value(), 0),
                Event::Appeared(b.value(), 0)
            ],
            "replay should follow registration order"
        );
    }

    #[test]
    fn filter_limits_delivery() {
        let registry = InMemoryRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry
            .subscribe(
                sensor_type(),
                Some(Filter::new().eq("zone", "north")),
                recorder.clone(),
            )
            .unwrap();

        let mut matching = Properties::new();
        matching.insert("zone".to_owned(), json!("north"));
        let hit = registry
            .register(sensor_type(), sensor(1), matching)
            .unwrap();

        let mut other = Properties::new();
        other.insert("zone".to_owned(), json!("south"));
        registry.register(sensor_type(), sensor(2), other).unwrap();

        assert_eq!(recorder.events(), vec![Event::Appeared(hit.value(), 0)]);
    }

    #[test]
    fn unregister_notifies_gone_and_unknown_handles_error() {
        let registry = InMemoryRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry
            .subscribe(sensor_type(), None, recorder.clone())
            .unwrap();

        let id = registry
            .register(sensor_type(), sensor(1), Properties::new())
            .unwrap();
        registry.unregister(id).unwrap();

        assert_eq!(
            recorder.events(),
            vec![Event::Appeared(id.value(), 0), Event::Gone(id.value())]
        );
        assert_eq!(registry.registration_count(), 0);

        assert!(matches!(
            registry.unregister(id),
            Err(AdapterError::UnknownRegistration { .. })
        ));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = InMemoryRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let sub = registry
            .subscribe(sensor_type(), None, recorder.clone())
            .unwrap();

        registry.unsubscribe(sub).unwrap();
        registry
            .register(sensor_type(), sensor(1), Properties::new())
            .unwrap();

        assert!(recorder.events().is_empty());
        assert!(matches!(
            registry.unsubscribe(sub),
            Err(AdapterError::UnknownSubscription { .. })
        ));
    }

    #[test]
    fn ranking_is_extracted_from_properties() {
        let registry = InMemoryRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry
            .subscribe(sensor_type(), None, recorder.clone())
            .unwrap();

        let mut props = Properties::new();
        props.insert(crate::capability::RANKING_PROPERTY.to_owned(), json!(9));
        let id = registry.register(sensor_type(), sensor(1), props).unwrap();

        assert_eq!(recorder.events(), vec![Event::Appeared(id.value(), 9)]);
    }

    #[test]
    fn listener_may_register_reentrantly() {
        trait Echo: Send + Sync {}
        struct EchoImpl;
        impl Echo for EchoImpl {}

        struct Chainer {
            registry: Arc<InMemoryRegistry>,
            fired: AtomicBool,
        }

        impl CapabilityListener for Chainer {
            fn provider_appeared(&self, _provider: &Provider) {
                if !self.fired.swap(true, Ordering::SeqCst) {
                    // A module reacting to a provider by exposing its own
                    // capability; must not deadlock the dispatch loop.
                    self.registry
                        .register(
                            CapabilityTypeId::of::<dyn Echo>(),
                            CapabilityInstance::new(Arc::new(EchoImpl) as Arc<dyn Echo>),
                            Properties::new(),
                        )
                        .unwrap();
                }
            }

            fn provider_gone(&self, _registration: RegistrationId) {}
        }

        let registry = Arc::new(InMemoryRegistry::new());
        let echo_recorder = Arc::new(Recorder::default());
        registry
            .subscribe(CapabilityTypeId::of::<dyn Echo>(), None, echo_recorder.clone())
            .unwrap();
        registry
            .subscribe(
                sensor_type(),
                None,
                Arc::new(Chainer {
                    registry: registry.clone(),
                    fired: AtomicBool::new(false),
                }),
            )
            .unwrap();

        registry
            .register(sensor_type(), sensor(1), Properties::new())
            .unwrap();

        assert_eq!(
            echo_recorder.events().len(),
            1,
            "re-entrant registration should still be dispatched"
        );
    }

    #[test]
    fn concurrent_registration_delivers_everything() {
        let registry = Arc::new(InMemoryRegistry::new());
        let recorder = Arc::new(Recorder::default());
        registry
            .subscribe(sensor_type(), None, recorder.clone())
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..16 {
                    registry
                        .register(sensor_type(), sensor(i * 16 + j), Properties::new())
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.registration_count(), 128);
        assert_eq!(
            recorder.events().len(),
            128,
            "every registration should reach the subscriber exactly once"
        );
    }
}
