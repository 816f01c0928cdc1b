use sovran_experiments::{
    BridgeStatus, ExecutionContext, ExperimentError, ExperimentStore, Job, ManualQueue,
    ReactiveBridge, Storable, WorkerThread,
};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_worker_thread_delivery() -> Result<(), ExperimentError> {
    let store = ExperimentStore::new();
    let worker = Arc::new(WorkerThread::spawn("bridge-test")?);
    let bridge = ReactiveBridge::with_context(&store, worker.clone());

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let probe = Arc::clone(&worker);
    bridge.set_on_change(move || {
        tx.lock().unwrap().send(probe.is_current()).unwrap();
    });

    store.set_raw(Storable::from("k"), Some(Storable::new(1i32)));
    let on_worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(on_worker);
    assert_eq!(bridge.generation(), 1);
    assert_eq!(
        bridge.snapshot().raw(&Storable::from("k")),
        Some(&Storable::new(1i32))
    );
    Ok(())
}

#[test]
fn test_default_context_refreshes() -> Result<(), ExperimentError> {
    let store = ExperimentStore::new();
    let bridge = ReactiveBridge::new(&store)?;
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    bridge.set_on_change(move || {
        let _ = tx.lock().unwrap().send(thread::current().name().map(str::to_string));
    });

    store.snapshot().string("on", "feature");
    let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(name.as_deref(), Some("sovran-experiments"));
    assert_eq!(bridge.states().len(), 1);
    Ok(())
}

#[test]
fn test_dispatcher_hook_receives_refresh() {
    let store = ExperimentStore::new();
    let jobs: Arc<Mutex<Vec<Job>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&jobs);
    let bridge = ReactiveBridge::with_dispatcher(&store, move |job| {
        sink.lock().unwrap().push(job);
    });

    store.snapshot().value(1i32, "level", 0..=9);
    store.set_raw(Storable::from("level"), Some(Storable::new(4i32)));
    assert_eq!(bridge.status(), BridgeStatus::PendingRefresh);
    assert_eq!(bridge.states().len(), 0);

    let pending: Vec<Job> = jobs.lock().unwrap().drain(..).collect();
    assert_eq!(pending.len(), 1);
    for job in pending {
        job();
    }

    assert_eq!(bridge.status(), BridgeStatus::Idle);
    let states = bridge.states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].value, Storable::new(4i32));
    assert!(states[0].overridden);
}

#[test]
fn test_refresh_now_self_drives() {
    let store = ExperimentStore::new();
    let queue = ManualQueue::new();
    let bridge = ReactiveBridge::with_context(&store, Arc::new(queue.clone()));

    store.snapshot().string("a", "x");
    bridge.refresh_now();
    assert_eq!(bridge.generation(), 1);
    assert_eq!(bridge.states().len(), 1);

    // The queued refresh still runs and lands on the same state
    assert_eq!(queue.run_pending(), 1);
    assert_eq!(bridge.generation(), 2);
    assert_eq!(bridge.states().len(), 1);
}

#[test]
fn test_change_during_refresh_schedules_another() {
    struct Deferred(Mutex<Vec<Job>>);

    impl ExecutionContext for Deferred {
        fn execute(&self, job: Job) {
            self.0.lock().unwrap().push(job);
        }
    }

    let store = ExperimentStore::new();
    let context = Arc::new(Deferred(Mutex::new(Vec::new())));
    let bridge = ReactiveBridge::with_context(&store, context.clone());
    let writer = store.clone();
    bridge.set_on_change(move || {
        // First refresh writes once more; the second write is a no-op
        writer.set_raw(Storable::from("echo"), Some(Storable::new(true)));
    });

    store.set_raw(Storable::from("k"), Some(Storable::new(1u8)));
    let first: Vec<Job> = context.0.lock().unwrap().drain(..).collect();
    assert_eq!(first.len(), 1);
    first.into_iter().for_each(|job| job());

    let second: Vec<Job> = context.0.lock().unwrap().drain(..).collect();
    assert_eq!(second.len(), 1);
    second.into_iter().for_each(|job| job());

    assert!(context.0.lock().unwrap().is_empty());
    assert_eq!(bridge.generation(), 2);
    assert_eq!(bridge.snapshot().len(), 2);
}

#[cfg(feature = "tokio")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_runtime_context() {
    let store = ExperimentStore::new();
    let handle = tokio::runtime::Handle::current();
    let bridge = ReactiveBridge::with_context(&store, Arc::new(handle));
    let (tx, rx) = tokio::sync::oneshot::channel::<u64>();
    let tx = Mutex::new(Some(tx));
    bridge.set_on_change(move || {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(1);
        }
    });

    store.set_raw(Storable::from("k"), Some(Storable::new(1u8)));
    let fired = tokio::time::timeout(Duration::from_secs(5), rx).await;
    assert_eq!(fired.unwrap().unwrap(), 1);
}
