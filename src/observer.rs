use crate::context::ExecutionContext;
use crate::storable::Storable;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Which half of the store changed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Change {
    Values,
    Definitions,
}

/// Something that wants to hear about store changes
///
/// Notifications carry no payload beyond [`Change`]: they mean "something
/// changed, re-read". They are handed off after the store's lock has been
/// released and run on the execution context the observer was registered
/// with, so an observer may read or write the store from its callback. Each
/// observer receives its changes in order; there is no ordering between
/// different observers.
///
/// Any `Fn(Change) + Send + Sync` closure is an observer.
pub trait StoreObserver: Send + Sync {
    fn store_did_change(&self, change: Change);
}

impl<F> StoreObserver for F
where
    F: Fn(Change) + Send + Sync,
{
    fn store_did_change(&self, change: Change) {
        self(change)
    }
}

/// Identity under which an observer is registered
///
/// Registering under an identity that is already taken replaces the previous
/// observer, and removal is by identity alone.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ObserverId(Storable);

impl ObserverId {
    pub fn new<T>(id: T) -> Self
    where
        T: Send + Sync + Eq + Hash + fmt::Debug + 'static,
    {
        ObserverId(Storable::new(id))
    }

    /// Mints an identity no other call will return
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ObserverId::new(UniqueId(NEXT.fetch_add(1, Ordering::Relaxed)))
    }
}

impl fmt::Debug for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverId({:?})", self.0)
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct UniqueId(u64);

enum Handle {
    Strong(Arc<dyn StoreObserver>),
    Weak(Weak<dyn StoreObserver>),
}

struct Delivery {
    change: Change,
    observer: Arc<dyn StoreObserver>,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Delivery>,
    draining: bool,
}

/// One observer's delivery lane
///
/// Changes for an observer are queued here and drained on its execution
/// context, one at a time and in order. At most one drain job is in flight,
/// so a slow observer only ever holds up its own lane.
struct Mailbox {
    context: Arc<dyn ExecutionContext>,
    active: AtomicBool,
    queue: Mutex<Queue>,
}

impl Mailbox {
    fn new(context: Arc<dyn ExecutionContext>) -> Self {
        Self {
            context,
            active: AtomicBool::new(true),
            queue: Mutex::new(Queue::default()),
        }
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.queue().pending.clear();
    }

    fn post(self: &Arc<Self>, observer: &Arc<dyn StoreObserver>, changes: &[Change]) {
        let start = {
            let mut queue = self.queue();
            queue.pending.extend(changes.iter().map(|&change| Delivery {
                change,
                observer: Arc::clone(observer),
            }));
            !std::mem::replace(&mut queue.draining, true)
        };
        if start {
            let mailbox = Arc::clone(self);
            self.context.execute(Box::new(move || mailbox.drain()));
        }
    }

    fn drain(&self) {
        loop {
            let delivery = {
                let mut queue = self.queue();
                match queue.pending.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            // Removed or replaced after this change was queued
            if !self.is_active() {
                continue;
            }
            let Delivery { change, observer } = delivery;
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| observer.store_did_change(change)));
            if result.is_err() {
                tracing::error!(?change, "store observer panicked during notification");
            }
        }
    }
}

struct Registration {
    handle: Handle,
    mailbox: Arc<Mailbox>,
}

/// Strong and weak observers keyed by identity
///
/// Lives inside the store's state and is only touched under the store lock.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    entries: HashMap<ObserverId, Registration>,
}

impl ObserverRegistry {
    pub(crate) fn insert_strong(
        &mut self,
        id: ObserverId,
        observer: Arc<dyn StoreObserver>,
        context: Arc<dyn ExecutionContext>,
    ) {
        self.insert(id, Handle::Strong(observer), context);
    }

    pub(crate) fn insert_weak(
        &mut self,
        id: ObserverId,
        observer: &Arc<dyn StoreObserver>,
        context: Arc<dyn ExecutionContext>,
    ) {
        self.insert(id, Handle::Weak(Arc::downgrade(observer)), context);
    }

    fn insert(&mut self, id: ObserverId, handle: Handle, context: Arc<dyn ExecutionContext>) {
        let registration = Registration {
            handle,
            mailbox: Arc::new(Mailbox::new(context)),
        };
        if let Some(previous) = self.entries.insert(id, registration) {
            previous.mailbox.deactivate();
        }
    }

    /// Returns whether an observer was registered under `id`
    pub(crate) fn remove(&mut self, id: &ObserverId) -> bool {
        match self.entries.remove(id) {
            Some(registration) => {
                registration.mailbox.deactivate();
                true
            }
            None => false,
        }
    }

    /// Collects every live observer, pruning weak entries whose observer is gone
    pub(crate) fn notification(&mut self, changes: &[Change]) -> Notification {
        let mut targets = Vec::with_capacity(self.entries.len());
        self.entries.retain(|id, registration| {
            let observer = match &registration.handle {
                Handle::Strong(observer) => Arc::clone(observer),
                Handle::Weak(weak) => match weak.upgrade() {
                    Some(observer) => observer,
                    None => {
                        tracing::debug!(?id, "pruning released weak observer");
                        return false;
                    }
                },
            };
            targets.push(Target {
                observer,
                mailbox: Arc::clone(&registration.mailbox),
            });
            true
        });
        Notification {
            targets,
            changes: changes.to_vec(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

struct Target {
    observer: Arc<dyn StoreObserver>,
    mailbox: Arc<Mailbox>,
}

/// Observers to notify once the store lock has been released
#[must_use = "a notification does nothing until dispatched"]
pub(crate) struct Notification {
    targets: Vec<Target>,
    changes: Vec<Change>,
}

impl Notification {
    pub(crate) fn none() -> Self {
        Self {
            targets: Vec::new(),
            changes: Vec::new(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.targets.len()
    }

    /// Hands the changes to each observer's own lane; must run without the store lock held
    pub(crate) fn dispatch(self) {
        for target in &self.targets {
            if target.mailbox.is_active() {
                target.mailbox.post(&target.observer, &self.changes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Immediate, ManualQueue};
    use std::sync::atomic::AtomicUsize;

    fn counting_observer() -> (Arc<AtomicUsize>, Arc<dyn StoreObserver>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let observer: Arc<dyn StoreObserver> = Arc::new(move |_: Change| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, observer)
    }

    fn inline() -> Arc<dyn ExecutionContext> {
        Arc::new(Immediate)
    }

    #[test]
    fn test_same_identity_replaces_across_strengths() {
        let mut registry = ObserverRegistry::default();
        let (strong_count, strong) = counting_observer();
        let (weak_count, weak) = counting_observer();

        registry.insert_strong(ObserverId::new("editor"), strong, inline());
        registry.insert_weak(ObserverId::new("editor"), &weak, inline());
        assert_eq!(registry.len(), 1);

        registry.notification(&[Change::Values]).dispatch();
        assert_eq!(strong_count.load(Ordering::SeqCst), 0);
        assert_eq!(weak_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_released_weak_observer_is_pruned() {
        let mut registry = ObserverRegistry::default();
        let (_, weak) = counting_observer();
        registry.insert_weak(ObserverId::unique(), &weak, inline());
        drop(weak);

        let notification = registry.notification(&[Change::Values]);
        assert_eq!(notification.len(), 0);
        assert_eq!(registry.len(), 0);
        notification.dispatch();
    }

    #[test]
    fn test_removed_observer_skipped_by_inflight_notification() {
        let mut registry = ObserverRegistry::default();
        let (count, observer) = counting_observer();
        let id = ObserverId::unique();
        registry.insert_strong(id.clone(), observer, inline());

        let inflight = registry.notification(&[Change::Values]);
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        inflight.dispatch();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_removal_drops_queued_deliveries() {
        let mut registry = ObserverRegistry::default();
        let queue = ManualQueue::new();
        let (count, observer) = counting_observer();
        let id = ObserverId::unique();
        registry.insert_strong(id.clone(), observer, Arc::new(queue.clone()));

        registry.notification(&[Change::Values]).dispatch();
        registry.notification(&[Change::Definitions]).dispatch();
        // Both changes share one drain job
        assert_eq!(queue.pending(), 1);

        assert!(registry.remove(&id));
        queue.run_pending();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_each_observer_drains_its_own_lane_in_order() {
        let mut registry = ObserverRegistry::default();
        let parked = ManualQueue::new();
        let (parked_count, parked_observer) = counting_observer();
        registry.insert_strong(ObserverId::new(1u8), parked_observer, Arc::new(parked.clone()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.insert_strong(
            ObserverId::new(2u8),
            Arc::new(move |change: Change| sink.lock().unwrap().push(change)),
            inline(),
        );

        registry
            .notification(&[Change::Definitions, Change::Values])
            .dispatch();

        // The parked lane holds nothing up for the inline one
        assert_eq!(*seen.lock().unwrap(), vec![Change::Definitions, Change::Values]);
        assert_eq!(parked_count.load(Ordering::SeqCst), 0);
        assert_eq!(parked.run_pending(), 1);
        assert_eq!(parked_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_observer_does_not_stop_others() {
        let mut registry = ObserverRegistry::default();
        let (count, observer) = counting_observer();
        registry.insert_strong(
            ObserverId::new(1u8),
            Arc::new(|_: Change| panic!("observer failure")),
            inline(),
        );
        registry.insert_strong(ObserverId::new(2u8), observer, inline());

        registry
            .notification(&[Change::Definitions, Change::Values])
            .dispatch();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unique_ids_differ() {
        assert_ne!(ObserverId::unique(), ObserverId::unique());
        assert_eq!(ObserverId::new("a"), ObserverId::new("a"));
    }

    #[test]
    fn test_str_and_string_identities_match() {
        assert_eq!(ObserverId::new("editor"), ObserverId::new("editor".to_string()));
        assert_eq!(ObserverId::new("editor"), ObserverId::new(Storable::from("editor")));
    }
}
