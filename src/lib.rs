//! # sovran-experiments
//!
//! Live-editable experiment values backed by a thread-safe, type-erased store.
//!
//! `sovran-experiments` lets running code expose named, typed values (strings,
//! bounded integers, bounded floats) that an editor can inspect and change
//! while the program runs. Call sites keep reading plain typed values; the
//! store remembers each experiment's shape and default, holds any overrides,
//! and tells observers whenever something actually changed.
//!
//! ## Key Features
//!
//! - **Type-erased**: keys, values and ranges of any hashable type share one store
//! - **Thread-safe**: one `Arc<Mutex<_>>` guards all state; every accessor is atomic
//! - **Change-gated**: writes that change nothing notify no one
//! - **Deadlock-free observers**: notifications run after the lock is released
//! - **Fire-and-forget delivery**: each observer drains its own lane, so a slow one stalls no one
//! - **Strong and weak observers**: keyed by identity, weak ones pruned automatically
//! - **Snapshots**: consistent, frozen reads for a whole render pass
//! - **Reactive bridge**: refreshes a snapshot on the execution context you pick
//!
//! ## Usage Examples
//!
//! ### Reading Experiments
//!
//! ```rust
//! use sovran_experiments::ExperimentStore;
//!
//! let store = ExperimentStore::new();
//! let snapshot = store.snapshot();
//!
//! // The first read registers the experiment and returns the default
//! let title = snapshot.string("Welcome", "title");
//! let columns = snapshot.value(3u32, "columns", 1..=8);
//! let opacity = snapshot.value(0.8f64, "opacity", 0.0..=1.0);
//!
//! assert_eq!(title, "Welcome");
//! assert_eq!(columns, 3);
//! assert_eq!(opacity, 0.8);
//! assert_eq!(store.experiment_states().len(), 3);
//! ```
//!
//! ### Editing Experiments
//!
//! ```rust
//! use sovran_experiments::{ExperimentKind, ExperimentStore, Storable};
//!
//! let store = ExperimentStore::new();
//! store.snapshot().value(3u32, "columns", 1..=8);
//!
//! // An editor walks the listing without knowing the concrete types
//! for state in store.experiment_states() {
//!     if let ExperimentKind::Integer(range) = &state.kind {
//!         if let Some(range) = range.recover::<u32>() {
//!             let value = (*range.end()).min(5);
//!             store.set_raw(state.key.clone(), Some(Storable::new(value)));
//!         }
//!     }
//! }
//!
//! assert_eq!(store.snapshot().value(3u32, "columns", 1..=8), 5);
//! ```
//!
//! ### Observing Changes
//!
//! ```rust
//! use sovran_experiments::{Change, ExperimentStore, Immediate, ObserverId, Storable};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let store = ExperimentStore::new();
//! let changes = Arc::new(AtomicUsize::new(0));
//!
//! // Observers run on a background thread unless registered on another context
//! let seen = Arc::clone(&changes);
//! store.add_observer_on(
//!     ObserverId::new("logger"),
//!     Arc::new(move |change: Change| {
//!         if change == Change::Values {
//!             seen.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }),
//!     Arc::new(Immediate),
//! );
//!
//! store.set_raw(Storable::from("mode"), Some(Storable::from("debug")));
//! store.set_raw(Storable::from("mode"), Some(Storable::from("debug")));
//! assert_eq!(changes.load(Ordering::SeqCst), 1);
//!
//! store.remove_observer(&ObserverId::new("logger"));
//! store.set_raw(Storable::from("mode"), None);
//! assert_eq!(changes.load(Ordering::SeqCst), 1);
//! ```
//!
//! ### Saving and Restoring
//!
//! ```rust
//! use sovran_experiments::{ExperimentStore, Storable};
//!
//! let store = ExperimentStore::new();
//! store.snapshot().string("blue", "theme");
//! let saved = store.bulk_state();
//!
//! store.set_raw(Storable::from("theme"), Some(Storable::from("red")));
//! store.set_bulk_state(saved.clone());
//! assert_eq!(store.bulk_state(), saved);
//! ```

mod bridge;
mod context;
mod error;
mod kind;
mod observer;
mod snapshot;
mod storable;
mod store;
mod value;

pub use bridge::{BridgeStatus, ReactiveBridge};
pub use context::{
    Detached, Dispatcher, ExecutionContext, Immediate, Job, ManualQueue, WorkerThread,
};
pub use error::ExperimentError;
pub use kind::{ErasedRange, ExperimentDefinition, ExperimentKind, NumericType};
pub use observer::{Change, ObserverId, StoreObserver};
pub use snapshot::Snapshot;
pub use storable::Storable;
pub use store::{BulkState, ExperimentState, ExperimentStore};
pub use value::{BoundedValue, ExperimentValue, FloatBits, NumericClass, TotalFloat};
