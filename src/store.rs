use crate::context::{Detached, ExecutionContext};
use crate::kind::{ExperimentDefinition, ExperimentKind};
use crate::observer::{Change, Notification, ObserverId, ObserverRegistry, StoreObserver};
use crate::snapshot::Snapshot;
use crate::storable::Storable;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Every override value and every definition, captured together
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkState {
    pub values: HashMap<Storable, Storable>,
    pub definitions: HashMap<Storable, ExperimentDefinition>,
}

/// One experiment as an editor sees it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExperimentState {
    pub key: Storable,
    pub kind: ExperimentKind,
    /// The override if one is set, the definition's default otherwise
    pub value: Storable,
    pub default_value: Storable,
    pub overridden: bool,
}

#[derive(Default)]
struct StoreState {
    values: HashMap<Storable, Storable>,
    experiments: HashMap<Storable, ExperimentDefinition>,
    observers: ObserverRegistry,
}

/// The concurrent store behind every experiment
///
/// `ExperimentStore` holds override values, experiment definitions and
/// observers behind a single mutex. Every accessor is atomic. Writes that
/// would not change anything are dropped without notifying anyone; real
/// changes pick the observers to notify while still holding the lock, then
/// hand the notifications off after it has been released. Writers never wait
/// for observers registered on an asynchronous context.
///
/// The store is a cheap handle: clones share the same state.
///
/// # Examples
///
/// ```
/// use sovran_experiments::{ExperimentStore, Storable};
///
/// let store = ExperimentStore::new();
/// let key = Storable::from("greeting");
///
/// assert_eq!(store.get_raw(&key), None);
/// store.set_raw(key.clone(), Some(Storable::from("Nice!")));
/// assert_eq!(store.get_raw(&key), Some(Storable::from("Nice!")));
/// ```
#[derive(Clone, Default)]
pub struct ExperimentStore {
    state: Arc<Mutex<StoreState>>,
}

impl ExperimentStore {
    /// Creates a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default store
    ///
    /// Created on first use and never torn down. Tests should prefer their
    /// own [`ExperimentStore::new`] instances.
    pub fn shared() -> &'static ExperimentStore {
        static SHARED: OnceLock<ExperimentStore> = OnceLock::new();
        SHARED.get_or_init(ExperimentStore::new)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Each mutation is a single map operation, so a panicking holder
        // can't leave the maps half-written.
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("experiment store lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Runs `f` under the lock and dispatches whatever it asks for after unlocking
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut StoreState) -> Notification,
    {
        let notification = {
            let mut state = self.lock();
            f(&mut *state)
        };
        notification.dispatch();
    }

    /// Takes a [`Snapshot`] of the current override values
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self)
    }

    /// The override value for `key`, if one has been set
    pub fn get_raw(&self, key: &Storable) -> Option<Storable> {
        self.lock().values.get(key).cloned()
    }

    /// Sets or clears the override value for `key`
    ///
    /// Does nothing, and notifies no one, when the value is unchanged.
    pub fn set_raw(&self, key: Storable, value: Option<Storable>) {
        self.update(|state| {
            if state.values.get(&key) == value.as_ref() {
                return Notification::none();
            }
            tracing::trace!(?key, ?value, "experiment value changed");
            match value {
                Some(value) => state.values.insert(key, value),
                None => state.values.remove(&key),
            };
            state.observers.notification(&[Change::Values])
        });
    }

    /// Clears the override for `key` so its default applies again
    pub fn reset_value(&self, key: &Storable) {
        self.set_raw(key.clone(), None);
    }

    /// Clears every override in one step
    pub fn reset_all_values(&self) {
        self.update(|state| {
            if state.values.is_empty() {
                return Notification::none();
            }
            tracing::trace!(count = state.values.len(), "clearing all experiment values");
            state.values.clear();
            state.observers.notification(&[Change::Values])
        });
    }

    /// The definition registered for `key`, if any
    pub fn get_definition(&self, key: &Storable) -> Option<ExperimentDefinition> {
        self.lock().experiments.get(key).cloned()
    }

    /// Registers, replaces or removes the definition for `key`
    ///
    /// Does nothing, and notifies no one, when the definition is unchanged.
    pub fn set_definition(&self, key: Storable, definition: Option<ExperimentDefinition>) {
        self.update(|state| {
            if state.experiments.get(&key) == definition.as_ref() {
                return Notification::none();
            }
            tracing::trace!(?key, ?definition, "experiment definition changed");
            match definition {
                Some(definition) => state.experiments.insert(key, definition),
                None => state.experiments.remove(&key),
            };
            state.observers.notification(&[Change::Definitions])
        });
    }

    /// A copy of every override value
    pub fn bulk_values(&self) -> HashMap<Storable, Storable> {
        self.lock().values.clone()
    }

    /// A copy of every definition
    pub fn bulk_definitions(&self) -> HashMap<Storable, ExperimentDefinition> {
        self.lock().experiments.clone()
    }

    /// Values and definitions read together in one atomic step
    pub fn bulk_state(&self) -> BulkState {
        let state = self.lock();
        BulkState {
            values: state.values.clone(),
            definitions: state.experiments.clone(),
        }
    }

    /// Replaces values and definitions together in one atomic step
    ///
    /// Always notifies observers of both kinds of change.
    pub fn set_bulk_state(&self, bulk: BulkState) {
        self.update(|state| {
            tracing::trace!(
                values = bulk.values.len(),
                definitions = bulk.definitions.len(),
                "replacing experiment store state"
            );
            state.values = bulk.values;
            state.experiments = bulk.definitions;
            state
                .observers
                .notification(&[Change::Definitions, Change::Values])
        });
    }

    /// Every defined experiment joined with its current value
    ///
    /// Ordered by the key's debug rendering so editors list entries stably.
    pub fn experiment_states(&self) -> Vec<ExperimentState> {
        experiment_states(&self.bulk_state())
    }

    /// Registers an observer the store keeps alive until it is removed
    ///
    /// Notifications reach it on a background thread ([`Detached`]).
    pub fn add_observer(&self, id: ObserverId, observer: Arc<dyn StoreObserver>) {
        self.add_observer_on(id, observer, Arc::new(Detached));
    }

    /// Registers an observer whose notifications run on `context`
    pub fn add_observer_on(
        &self,
        id: ObserverId,
        observer: Arc<dyn StoreObserver>,
        context: Arc<dyn ExecutionContext>,
    ) {
        tracing::debug!(?id, "adding store observer");
        self.lock().observers.insert_strong(id, observer, context);
    }

    /// Registers an observer without keeping it alive
    ///
    /// Once every other `Arc` to the observer is gone it is dropped from the
    /// registry on the next notification. Deliveries already handed off keep
    /// it alive until they have run.
    pub fn add_weak_observer(&self, id: ObserverId, observer: &Arc<dyn StoreObserver>) {
        self.add_weak_observer_on(id, observer, Arc::new(Detached));
    }

    /// Registers a weak observer whose notifications run on `context`
    pub fn add_weak_observer_on(
        &self,
        id: ObserverId,
        observer: &Arc<dyn StoreObserver>,
        context: Arc<dyn ExecutionContext>,
    ) {
        tracing::debug!(?id, "adding weak store observer");
        self.lock().observers.insert_weak(id, observer, context);
    }

    /// Removes whichever observer is registered under `id`
    ///
    /// Notifications still queued for the observer are dropped. A callback
    /// that is already running when this is called is not interrupted and may
    /// finish after this returns.
    ///
    /// # Returns
    ///
    /// Returns `true` if an observer was registered under `id`.
    pub fn remove_observer(&self, id: &ObserverId) -> bool {
        tracing::debug!(?id, "removing store observer");
        self.lock().observers.remove(id)
    }

    /// Number of registered observers, including weak ones not yet pruned
    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }
}

pub(crate) fn experiment_states(bulk: &BulkState) -> Vec<ExperimentState> {
    let mut states: Vec<(String, ExperimentState)> = bulk
        .definitions
        .iter()
        .map(|(key, definition)| {
            let current = bulk.values.get(key);
            let state = ExperimentState {
                key: key.clone(),
                kind: definition.kind.clone(),
                value: current
                    .cloned()
                    .unwrap_or_else(|| definition.default_value.clone()),
                default_value: definition.default_value.clone(),
                overridden: current.is_some(),
            };
            (format!("{:?}", key), state)
        })
        .collect();
    states.sort_by(|a, b| a.0.cmp(&b.0));
    states.into_iter().map(|(_, state)| state).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Immediate;
    use crate::error::ExperimentError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn counted(store: &ExperimentStore) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        store.add_observer_on(
            ObserverId::unique(),
            Arc::new(move |_: Change| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(Immediate),
        );
        count
    }

    #[test]
    fn test_clearing_absent_value_is_noop() {
        let store = ExperimentStore::new();
        let count = counted(&store);
        store.set_raw(Storable::from("k"), None);
        store.reset_all_values();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reset_all_values() {
        let store = ExperimentStore::new();
        store.set_raw(Storable::from("a"), Some(Storable::new(1i32)));
        store.set_raw(Storable::from("b"), Some(Storable::new(2i32)));
        let count = counted(&store);

        store.reset_all_values();
        assert!(store.bulk_values().is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observer_can_read_store_from_callback() {
        let store = ExperimentStore::new();
        let reader = store.clone();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        store.add_observer_on(
            ObserverId::new("reader"),
            Arc::new(move |_: Change| {
                *sink.lock().unwrap() = reader.get_raw(&Storable::from("k"));
            }),
            Arc::new(Immediate),
        );

        store.set_raw(Storable::from("k"), Some(Storable::new(9u8)));
        assert_eq!(*seen.lock().unwrap(), Some(Storable::new(9u8)));
    }

    #[test]
    fn test_default_delivery_reads_store_off_the_writer() {
        let store = ExperimentStore::new();
        let reader = store.clone();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        store.add_observer(
            ObserverId::new("reader"),
            Arc::new(move |_: Change| {
                let _ = tx.lock().unwrap().send(reader.get_raw(&Storable::from("k")));
            }),
        );

        store.set_raw(Storable::from("k"), Some(Storable::new(9u8)));
        let seen = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seen, Some(Storable::new(9u8)));
    }

    #[test]
    fn test_experiment_states_join() -> Result<(), ExperimentError> {
        let store = ExperimentStore::new();
        store.set_definition(
            Storable::from("b"),
            Some(ExperimentDefinition::bounded(5i32, 0..=10)?),
        );
        store.set_definition(
            Storable::from("a"),
            Some(ExperimentDefinition::string("x")),
        );
        store.set_raw(Storable::from("b"), Some(Storable::new(7i32)));
        // Overrides without a definition are not listed
        store.set_raw(Storable::from("c"), Some(Storable::new(1i32)));

        let states = store.experiment_states();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].key, Storable::from("a"));
        assert_eq!(states[0].value, Storable::from("x"));
        assert!(!states[0].overridden);
        assert_eq!(states[1].value, Storable::new(7i32));
        assert_eq!(states[1].default_value, Storable::new(5i32));
        assert!(states[1].overridden);
        Ok(())
    }

    #[test]
    fn test_shared_store_is_one_instance() {
        let a = ExperimentStore::shared();
        let b = ExperimentStore::shared();
        assert!(Arc::ptr_eq(&a.state, &b.state));
    }
}
