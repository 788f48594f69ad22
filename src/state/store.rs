//! ConfigStore - Mirror of the backend's authoritative configuration
//!
//! Holds the last confirmed snapshot plus the shared view state (active layer,
//! selected input) and notifies topic subscribers when any of them change.
//! Nothing here writes speculatively: the only way in for configuration is
//! `publish`, driven by an inbound broadcast.

use super::types::{ConfigSnapshot, LayerId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Notification topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    ConfigurationLoaded,
    ConfigurationUpdated,
    ActiveLayerChanged,
    SelectedInputChanged,
}

impl Topic {
    pub fn all() -> &'static [Topic] {
        &[
            Topic::ConfigurationLoaded,
            Topic::ConfigurationUpdated,
            Topic::ActiveLayerChanged,
            Topic::SelectedInputChanged,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ConfigurationLoaded => "configuration-loaded",
            Topic::ConfigurationUpdated => "configuration-updated",
            Topic::ActiveLayerChanged => "active-layer-changed",
            Topic::SelectedInputChanged => "selected-input-changed",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload delivered to subscribers
#[derive(Debug, Clone)]
pub enum Notification {
    ConfigurationLoaded(Arc<ConfigSnapshot>),
    ConfigurationUpdated(Arc<ConfigSnapshot>),
    ActiveLayerChanged(LayerId),
    SelectedInputChanged(Option<SelectedInput>),
}

impl Notification {
    pub fn topic(&self) -> Topic {
        match self {
            Notification::ConfigurationLoaded(_) => Topic::ConfigurationLoaded,
            Notification::ConfigurationUpdated(_) => Topic::ConfigurationUpdated,
            Notification::ActiveLayerChanged(_) => Topic::ActiveLayerChanged,
            Notification::SelectedInputChanged(_) => Topic::SelectedInputChanged,
        }
    }
}

/// Input currently open in the editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedInput {
    pub layer: LayerId,
    pub input_id: String,
}

type SubscriberFn = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: BTreeMap<Topic, Vec<(u64, SubscriberFn)>>,
}

impl Registry {
    fn remove(&mut self, topic: Topic, id: u64) {
        if let Some(list) = self.subscribers.get_mut(&topic) {
            list.retain(|(sub_id, _)| *sub_id != id);
        }
    }
}

struct Inner {
    snapshot: Option<Arc<ConfigSnapshot>>,
    active_layer: LayerId,
    selected: Option<SelectedInput>,
}

/// Copy-on-read mirror of confirmed configuration with topic subscriptions
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<Inner>>,
    registry: Arc<RwLock<Registry>>,
}

/// Disposer returned by [`ConfigStore::subscribe`]
///
/// The callback stays registered until `unsubscribe` is called or the handle
/// is dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    topic: Topic,
    id: u64,
    registry: Weak<RwLock<Registry>>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove the callback now
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.write().remove(self.topic, self.id);
        }
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                snapshot: None,
                active_layer: LayerId::A,
                selected: None,
            })),
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }

    /// Deep, independent copy of the confirmed configuration
    ///
    /// Before the first broadcast this is the default (empty A-D) layout.
    pub fn get(&self) -> ConfigSnapshot {
        self.inner
            .read()
            .snapshot
            .as_ref()
            .map(|s| ConfigSnapshot::clone(s))
            .unwrap_or_default()
    }

    /// Whether an authoritative snapshot has been received yet
    pub fn is_loaded(&self) -> bool {
        self.inner.read().snapshot.is_some()
    }

    pub fn active_layer(&self) -> LayerId {
        self.inner.read().active_layer
    }

    pub fn selected_input(&self) -> Option<SelectedInput> {
        self.inner.read().selected.clone()
    }

    /// Register interest in one topic
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .subscribers
            .entry(topic)
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            topic,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of live subscribers for a topic
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry
            .read()
            .subscribers
            .get(&topic)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Replace the mirror with an authoritative snapshot
    ///
    /// Returns the topic that fired, or `None` when the snapshot is
    /// structurally identical to the current one.
    pub(crate) fn publish(&self, snapshot: ConfigSnapshot) -> Option<Topic> {
        let notification = {
            let mut inner = self.inner.write();
            match inner.snapshot.as_deref() {
                Some(current) if *current == snapshot => {
                    debug!("Identical configuration snapshot, notification suppressed");
                    return None;
                }
                Some(_) => {
                    let snapshot = Arc::new(snapshot);
                    inner.snapshot = Some(Arc::clone(&snapshot));
                    Notification::ConfigurationUpdated(snapshot)
                }
                None => {
                    let snapshot = Arc::new(snapshot);
                    inner.snapshot = Some(Arc::clone(&snapshot));
                    Notification::ConfigurationLoaded(snapshot)
                }
            }
        };

        let topic = notification.topic();
        self.notify(&notification);
        Some(topic)
    }

    /// Record the layer the backend is evaluating; notifies only on change
    pub(crate) fn set_active_layer(&self, layer: LayerId) -> bool {
        {
            let mut inner = self.inner.write();
            if inner.active_layer == layer {
                return false;
            }
            inner.active_layer = layer;
        }
        self.notify(&Notification::ActiveLayerChanged(layer));
        true
    }

    /// Record the input open in the editor; notifies only on change
    pub(crate) fn set_selected_input(&self, selected: Option<SelectedInput>) -> bool {
        {
            let mut inner = self.inner.write();
            if inner.selected == selected {
                return false;
            }
            inner.selected = selected.clone();
        }
        self.notify(&Notification::SelectedInputChanged(selected));
        true
    }

    /// Deliver outside of any store lock so callbacks may read the store
    fn notify(&self, notification: &Notification) {
        let callbacks: Vec<SubscriberFn> = self
            .registry
            .read()
            .subscribers
            .get(&notification.topic())
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        for callback in callbacks {
            callback(notification);
        }
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{ActionKind, InputMapping, TargetKind, TargetName};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_test_snapshot() -> ConfigSnapshot {
        let mut snapshot = ConfigSnapshot::default();
        snapshot
            .internal_channels
            .insert("Pan".to_string(), Default::default());
        snapshot
    }

    fn counter_for(store: &ConfigStore, topic: Topic) -> (Arc<AtomicUsize>, Subscription) {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let sub = store.subscribe(topic, move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        (counter, sub)
    }

    #[test]
    fn test_first_publish_is_loaded_then_updated() {
        let store = ConfigStore::new();
        let (loaded, _l) = counter_for(&store, Topic::ConfigurationLoaded);
        let (updated, _u) = counter_for(&store, Topic::ConfigurationUpdated);

        assert_eq!(store.publish(make_test_snapshot()), Some(Topic::ConfigurationLoaded));

        let mut changed = make_test_snapshot();
        changed
            .internal_channels
            .insert("Tilt".to_string(), Default::default());
        assert_eq!(store.publish(changed), Some(Topic::ConfigurationUpdated));

        assert_eq!(loaded.load(Ordering::SeqCst), 1);
        assert_eq!(updated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identical_snapshot_suppressed() {
        let store = ConfigStore::new();
        let (updated, _u) = counter_for(&store, Topic::ConfigurationUpdated);

        store.publish(make_test_snapshot());
        assert_eq!(store.publish(make_test_snapshot()), None);
        assert_eq!(
            updated.load(Ordering::SeqCst),
            0,
            "Structurally identical snapshot must not notify"
        );
    }

    #[test]
    fn test_get_returns_independent_copy() {
        let store = ConfigStore::new();
        store.publish(make_test_snapshot());

        let mut copy = store.get();
        copy.internal_channels.clear();
        copy.layers.get_mut(&LayerId::A).unwrap().input_mappings.insert(
            "A".to_string(),
            InputMapping {
                target_kind: TargetKind::LayerSwitch,
                target_name: TargetName::Single("B".to_string()),
                action: Some(ActionKind::ActivateLayer),
                params: Default::default(),
                extra_params: Default::default(),
            },
        );

        let fresh = store.get();
        assert!(fresh.internal_channels.contains_key("Pan"));
        assert!(fresh.mapping(LayerId::A, "A").is_none());
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let store = ConfigStore::new();
        let (count, sub) = counter_for(&store, Topic::ActiveLayerChanged);
        assert_eq!(store.subscriber_count(Topic::ActiveLayerChanged), 1);

        assert!(store.set_active_layer(LayerId::B));
        sub.unsubscribe();
        assert_eq!(store.subscriber_count(Topic::ActiveLayerChanged), 0);
        assert!(store.set_active_layer(LayerId::C));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        {
            let (_c, _scoped) = counter_for(&store, Topic::ActiveLayerChanged);
            assert_eq!(store.subscriber_count(Topic::ActiveLayerChanged), 1);
        }
        assert_eq!(store.subscriber_count(Topic::ActiveLayerChanged), 0);
    }

    #[test]
    fn test_view_state_notifies_only_on_change() {
        let store = ConfigStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = store.subscribe(Topic::SelectedInputChanged, move |n| {
            seen_clone.lock().push(n.topic());
        });

        let selected = SelectedInput {
            layer: LayerId::A,
            input_id: "LEFT_STICK_X".to_string(),
        };
        assert!(store.set_selected_input(Some(selected.clone())));
        assert!(!store.set_selected_input(Some(selected)));
        assert!(store.set_selected_input(None));
        assert!(!store.set_active_layer(LayerId::A), "A is already active");

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_callback_can_read_store() {
        let store = ConfigStore::new();
        let reader = store.clone();
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_clone = observed.clone();
        let _sub = store.subscribe(Topic::ConfigurationLoaded, move |_| {
            observed_clone.store(reader.get().internal_channels.len(), Ordering::SeqCst);
        });

        store.publish(make_test_snapshot());
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}
