use crate::error::ExperimentError;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

/// A unit of work handed to an [`ExecutionContext`]
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where a [`ReactiveBridge`](crate::ReactiveBridge) runs its refreshes and
/// where store observers receive their notifications
///
/// Implementations decide only *where* a job runs; they must eventually run
/// every job they accept, in the order they accepted them.
pub trait ExecutionContext: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs every job straight away on the calling thread
#[derive(Clone, Copy, Debug, Default)]
pub struct Immediate;

impl ExecutionContext for Immediate {
    fn execute(&self, job: Job) {
        job()
    }
}

/// Runs every job on a new background thread
///
/// The store's default for observer delivery: the writer never waits on an
/// observer, and no observer waits on another. If a thread can't be started
/// the job runs on the caller instead of being lost.
#[derive(Clone, Copy, Debug, Default)]
pub struct Detached;

impl ExecutionContext for Detached {
    fn execute(&self, job: Job) {
        let slot = Arc::new(Mutex::new(Some(job)));
        let theirs = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name("sovran-experiments-observer".to_string())
            .spawn(move || {
                if let Some(job) = take_job(&theirs) {
                    run_job(job);
                }
            });
        if let Err(error) = spawned {
            tracing::warn!(%error, "could not start delivery thread; running job inline");
            if let Some(job) = take_job(&slot) {
                run_job(job);
            }
        }
    }
}

fn take_job(slot: &Mutex<Option<Job>>) -> Option<Job> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Hands every job to a caller-supplied function
///
/// Useful for re-dispatching onto an event loop the crate knows nothing about.
pub struct Dispatcher<F>(pub F);

impl<F> ExecutionContext for Dispatcher<F>
where
    F: Fn(Job) + Send + Sync,
{
    fn execute(&self, job: Job) {
        (self.0)(job)
    }
}

/// Queues jobs until its owner drains them with [`ManualQueue::run_pending`]
///
/// For UI loops that drive their own refreshes once per frame.
#[derive(Clone, Default)]
pub struct ManualQueue {
    jobs: Arc<Mutex<VecDeque<Job>>>,
}

impl ManualQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every queued job, including ones queued while draining
    ///
    /// # Returns
    ///
    /// The number of jobs that ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self
                .jobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            match job {
                Some(job) => {
                    run_job(job);
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ExecutionContext for ManualQueue {
    fn execute(&self, job: Job) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
    }
}

/// A dedicated thread that runs jobs one after another
///
/// Dropping the worker lets it finish the jobs already queued, then joins it.
pub struct WorkerThread {
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl WorkerThread {
    /// Starts a worker on a new thread called `name`
    pub fn spawn(name: impl Into<String>) -> Result<Self, ExperimentError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let name: String = name.into();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                tracing::debug!(worker = %name, "execution context started");
                for job in receiver {
                    run_job(job);
                }
                tracing::debug!(worker = %name, "execution context stopped");
            })
            .map_err(ExperimentError::Spawn)?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The lazily started, never stopped worker used by default
    pub fn shared() -> Result<Arc<WorkerThread>, ExperimentError> {
        static SHARED: OnceLock<Arc<WorkerThread>> = OnceLock::new();
        if let Some(worker) = SHARED.get() {
            return Ok(Arc::clone(worker));
        }
        let worker = Arc::new(WorkerThread::spawn("sovran-experiments")?);
        // A racing caller may have won; its worker is kept and ours is dropped.
        Ok(Arc::clone(SHARED.get_or_init(|| worker)))
    }

    /// Whether the caller is running on this worker's thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl ExecutionContext for WorkerThread {
    fn execute(&self, job: Job) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let delivered = sender.as_ref().is_some_and(|sender| sender.send(job).is_ok());
        if !delivered {
            tracing::warn!("execution context has stopped; dropping job");
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.sender
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // The last reference can be dropped by a job running on the worker itself
            if thread::current().id() != self.thread_id && handle.join().is_err() {
                tracing::error!("execution context thread panicked");
            }
        }
    }
}

#[cfg(feature = "tokio")]
impl ExecutionContext for tokio::runtime::Handle {
    fn execute(&self, job: Job) {
        self.spawn(async move { run_job(job) });
    }
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!("execution context job panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_immediate_runs_inline() {
        let ran = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ran);
        Immediate.execute(Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_queue_waits_for_drain() {
        let queue = ManualQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let seen = Arc::clone(&ran);
            queue.execute(Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending(), 3);
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(queue.run_pending(), 0);
    }

    #[test]
    fn test_worker_runs_jobs_on_its_thread() -> Result<(), ExperimentError> {
        let worker = Arc::new(WorkerThread::spawn("test-worker")?);
        let (tx, rx) = mpsc::channel();
        let probe = Arc::clone(&worker);
        worker.execute(Box::new(move || {
            tx.send(probe.is_current()).unwrap();
        }));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!worker.is_current());
        Ok(())
    }

    #[test]
    fn test_worker_survives_panicking_job() -> Result<(), ExperimentError> {
        let worker = WorkerThread::spawn("test-panics")?;
        worker.execute(Box::new(|| panic!("job failure")));
        let (tx, rx) = mpsc::channel();
        worker.execute(Box::new(move || tx.send(42).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        Ok(())
    }

    #[test]
    fn test_detached_runs_off_the_caller() {
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();
        Detached.execute(Box::new(move || {
            tx.send(thread::current().id()).unwrap();
        }));
        let ran_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(ran_on, caller);
    }

    #[test]
    fn test_dispatcher_forwards_jobs() {
        let forwarded = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&forwarded);
        let context = Dispatcher(move |job: Job| {
            count.fetch_add(1, Ordering::SeqCst);
            job();
        });
        context.execute(Box::new(|| {}));
        assert_eq!(forwarded.load(Ordering::SeqCst), 1);
    }
}
