use crate::context::{Dispatcher, ExecutionContext, Immediate, Job, WorkerThread};
use crate::error::ExperimentError;
use crate::observer::{Change, ObserverId, StoreObserver};
use crate::snapshot::Snapshot;
use crate::store::{experiment_states, ExperimentState, ExperimentStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Whether a bridge has a refresh queued on its execution context
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeStatus {
    Idle,
    PendingRefresh,
}

type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

struct BridgeView {
    snapshot: Arc<Snapshot>,
    states: Arc<Vec<ExperimentState>>,
}

struct BridgeShared {
    store: ExperimentStore,
    context: Arc<dyn ExecutionContext>,
    view: Mutex<BridgeView>,
    pending: AtomicBool,
    generation: AtomicU64,
    on_change: Mutex<Option<ChangeCallback>>,
}

impl BridgeShared {
    fn view(&self) -> MutexGuard<'_, BridgeView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues one refresh unless one is already waiting to run
    fn schedule(self: &Arc<Self>) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(self);
        self.context.execute(Box::new(move || shared.refresh()));
    }

    /// Rebuilds the view from the store's current state
    fn recompute(&self) {
        // The store is read while the view is locked so that racing
        // refreshes can't publish an older state over a newer one.
        let mut view = self.view();
        let bulk = self.store.bulk_state();
        let states = experiment_states(&bulk);
        *view = BridgeView {
            snapshot: Arc::new(Snapshot::from_values(self.store.clone(), bulk.values)),
            states: Arc::new(states),
        };
    }

    fn refresh(&self) {
        // Cleared first: a change landing during the rebuild queues another pass
        self.pending.store(false, Ordering::Release);
        self.recompute();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation, "experiment bridge refreshed");

        let callback = self
            .on_change
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

struct BridgeObserver {
    shared: Weak<BridgeShared>,
}

impl StoreObserver for BridgeObserver {
    fn store_did_change(&self, _change: Change) {
        if let Some(shared) = self.shared.upgrade() {
            shared.schedule();
        }
    }
}

/// Keeps a fresh snapshot and editor listing in step with a store
///
/// The bridge observes its store. Whenever the store changes it rebuilds its
/// [`Snapshot`] and [`ExperimentState`] listing from the store's current
/// state, on the execution context chosen at construction, then raises its
/// change callback once. Bursts of changes that arrive before the refresh
/// runs are folded into that single refresh, which always reflects the
/// latest state.
///
/// # Examples
///
/// ```
/// use sovran_experiments::{ExperimentStore, ManualQueue, ReactiveBridge, Storable};
/// use std::sync::Arc;
///
/// let store = ExperimentStore::new();
/// let queue = ManualQueue::new();
/// let bridge = ReactiveBridge::with_context(&store, Arc::new(queue.clone()));
///
/// store.set_raw(Storable::from("speed"), Some(Storable::new(3i32)));
/// store.set_raw(Storable::from("speed"), Some(Storable::new(4i32)));
/// assert_eq!(queue.run_pending(), 1);
///
/// assert_eq!(bridge.generation(), 1);
/// assert_eq!(bridge.snapshot().value(0i32, "speed", 0..=10), 4);
/// ```
pub struct ReactiveBridge {
    shared: Arc<BridgeShared>,
    // Registered weakly with the store; this is the only strong reference.
    _observer: Arc<dyn StoreObserver>,
    observer_id: ObserverId,
}

impl ReactiveBridge {
    /// A bridge that refreshes on the shared default [`WorkerThread`]
    pub fn new(store: &ExperimentStore) -> Result<Self, ExperimentError> {
        let worker: Arc<dyn ExecutionContext> = WorkerThread::shared()?;
        Ok(Self::with_context(store, worker))
    }

    /// A bridge that refreshes on `context`
    pub fn with_context(store: &ExperimentStore, context: Arc<dyn ExecutionContext>) -> Self {
        let shared = Arc::new(BridgeShared {
            store: store.clone(),
            context,
            view: Mutex::new(BridgeView {
                snapshot: Arc::new(Snapshot::from_values(store.clone(), HashMap::new())),
                states: Arc::new(Vec::new()),
            }),
            pending: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            on_change: Mutex::new(None),
        });

        let observer: Arc<dyn StoreObserver> = Arc::new(BridgeObserver {
            shared: Arc::downgrade(&shared),
        });
        let observer_id = ObserverId::unique();
        // Scheduling only flips a flag and queues onto `context`, so it can run on the writer
        store.add_weak_observer_on(observer_id.clone(), &observer, Arc::new(Immediate));
        // Registered before the first read, so no change can slip between them
        shared.recompute();

        Self {
            shared,
            _observer: observer,
            observer_id,
        }
    }

    /// A bridge that hands each refresh to `dispatch`
    pub fn with_dispatcher<F>(store: &ExperimentStore, dispatch: F) -> Self
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        Self::with_context(store, Arc::new(Dispatcher(dispatch)))
    }

    /// The snapshot built by the latest refresh
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.shared.view().snapshot)
    }

    /// The experiment listing built by the latest refresh
    pub fn states(&self) -> Arc<Vec<ExperimentState>> {
        Arc::clone(&self.shared.view().states)
    }

    /// Refreshes on the calling thread right now
    pub fn refresh_now(&self) {
        self.shared.refresh();
    }

    /// Installs the callback raised after every refresh, replacing any other
    pub fn set_on_change<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self
            .shared
            .on_change
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    pub fn clear_on_change(&self) {
        *self
            .shared
            .on_change
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// How many refreshes have completed
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    pub fn status(&self) -> BridgeStatus {
        if self.shared.pending.load(Ordering::Acquire) {
            BridgeStatus::PendingRefresh
        } else {
            BridgeStatus::Idle
        }
    }

    pub fn store(&self) -> &ExperimentStore {
        &self.shared.store
    }
}

impl Drop for ReactiveBridge {
    fn drop(&mut self) {
        self.shared.store.remove_observer(&self.observer_id);
    }
}
