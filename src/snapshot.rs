use crate::kind::ExperimentDefinition;
use crate::storable::Storable;
use crate::store::ExperimentStore;
use crate::value::{BoundedValue, ExperimentValue};
use std::collections::HashMap;
use std::ops::RangeInclusive;

/// A frozen view of a store's override values
///
/// A snapshot copies every override value once, when it is created, and
/// answers all of its reads from that copy. The same snapshot therefore
/// returns the same value for a key no matter what happens to the store in
/// the meantime; take a new snapshot to see newer values.
///
/// Reading through a snapshot also registers the experiment's definition in
/// the store, which is how editors learn about experiments in the first place.
///
/// # Examples
///
/// ```
/// use sovran_experiments::{ExperimentStore, Storable};
///
/// let store = ExperimentStore::new();
/// let before = store.snapshot();
/// assert_eq!(before.string("Hi!", "Hello"), "Hi!");
///
/// store.set_raw(Storable::from("Hello"), Some(Storable::from("Nice!")));
/// assert_eq!(before.string("Hi!", "Hello"), "Hi!");
/// assert_eq!(store.snapshot().string("Hi!", "Hello"), "Nice!");
/// ```
#[derive(Clone)]
pub struct Snapshot {
    values: HashMap<Storable, Storable>,
    store: ExperimentStore,
}

impl Snapshot {
    pub fn new(store: &ExperimentStore) -> Self {
        Self::from_values(store.clone(), store.bulk_values())
    }

    pub(crate) fn from_values(store: ExperimentStore, values: HashMap<Storable, Storable>) -> Self {
        Self { values, store }
    }

    /// Reads a string experiment, registering it as a string with `default`
    pub fn string(&self, default: impl Into<String>, key: impl Into<Storable>) -> String {
        let default: String = default.into();
        let key: Storable = key.into();
        self.store.set_definition(
            key.clone(),
            Some(ExperimentDefinition::string(default.clone())),
        );
        self.captured(&key).unwrap_or(default)
    }

    /// Reads a bounded numeric experiment, registering `range` and `default`
    ///
    /// A range whose bounds are out of order is not registered; the read
    /// still answers from the snapshot.
    pub fn value<T: BoundedValue>(
        &self,
        default: T,
        key: impl Into<Storable>,
        range: RangeInclusive<T>,
    ) -> T {
        let key: Storable = key.into();
        match ExperimentDefinition::bounded(default, range) {
            Ok(definition) => self.store.set_definition(key.clone(), Some(definition)),
            Err(error) => tracing::warn!(?key, %error, "not registering experiment"),
        }
        self.captured(&key).unwrap_or(default)
    }

    fn captured<T: ExperimentValue>(&self, key: &Storable) -> Option<T> {
        self.values.get(key).and_then(T::from_storable)
    }

    /// The captured override for `key`, without registering anything
    pub fn raw(&self, key: &Storable) -> Option<&Storable> {
        self.values.get(key)
    }

    /// Every captured override
    pub fn values(&self) -> &HashMap<Storable, Storable> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The store this snapshot reads from and registers into
    pub fn store(&self) -> &ExperimentStore {
        &self.store
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}
