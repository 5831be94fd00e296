//! Background jobs with dependency edges.
//!
//! The drawer hands splitting, filtering and geometry building to a
//! [`JobScheduler`]. Each scheduled job returns a [`JobHandle`] that later
//! jobs can depend on. Results travel through [`Promise`]s: the job writes its
//! output into the promise slot before its handle is signaled, so a dependent
//! job (or the orchestration thread, once the handle is complete) can read it
//! without further synchronization on the producing entry.
//!
//! Two schedulers are provided:
//!
//! - [`WorkerPool`] — a fixed set of OS threads pulling ready jobs
//! - [`InlineScheduler`] — runs jobs synchronously on the calling thread
//!   (deferred until [`flush`](JobScheduler::flush) if a dependency is still
//!   pending); deterministic, used by tests and single-threaded hosts
//!
//! # Example
//!
//! ```
//! use redlilium_draw_commands::jobs::{spawn, InlineScheduler, JobScheduler};
//!
//! let scheduler = InlineScheduler::new();
//! let a = spawn(&scheduler, &[], || 20);
//! let b = spawn(&scheduler, &[a.handle().clone()], || 22);
//! assert!(b.is_complete());
//! assert_eq!(a.take().unwrap() + b.take().unwrap(), 42);
//! ```

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{DrawError, DrawResult};

/// A unit of background work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static IS_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` when called from a [`WorkerPool`] thread.
pub fn is_worker_thread() -> bool {
    IS_WORKER.with(|w| w.get())
}

#[derive(Debug, Default)]
struct JobState {
    done: Mutex<bool>,
    signaled: Condvar,
}

/// Completion handle of a scheduled job.
///
/// Cheap to clone; all clones observe the same completion.
#[derive(Debug, Clone)]
pub struct JobHandle(Arc<JobState>);

impl JobHandle {
    /// A handle that is already complete.
    pub fn completed() -> Self {
        let handle = Self::unsignaled();
        handle.signal();
        handle
    }

    /// Create a handle completed externally through the returned
    /// [`JobCompleter`]. Used for caller-owned dependencies.
    pub fn pending() -> (JobHandle, JobCompleter) {
        let handle = Self::unsignaled();
        let completer = JobCompleter {
            handle: Some(handle.clone()),
        };
        (handle, completer)
    }

    fn unsignaled() -> Self {
        Self(Arc::new(JobState::default()))
    }

    pub fn is_complete(&self) -> bool {
        *self.0.done.lock()
    }

    /// Block until the job completes.
    ///
    /// Fails with [`DrawError::BlockingOnWorker`] on a worker thread, where
    /// blocking could starve the job being waited for.
    pub fn wait(&self) -> DrawResult<()> {
        if is_worker_thread() {
            return Err(DrawError::BlockingOnWorker);
        }
        let mut done = self.0.done.lock();
        while !*done {
            self.0.signaled.wait(&mut done);
        }
        Ok(())
    }

    /// Block until the job completes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> DrawResult<()> {
        if is_worker_thread() {
            return Err(DrawError::BlockingOnWorker);
        }
        let deadline = Instant::now() + timeout;
        let mut done = self.0.done.lock();
        while !*done {
            if self.0.signaled.wait_until(&mut done, deadline).timed_out() {
                return if *done {
                    Ok(())
                } else {
                    Err(DrawError::JobTimeout(timeout))
                };
            }
        }
        Ok(())
    }

    fn signal(&self) {
        *self.0.done.lock() = true;
        self.0.signaled.notify_all();
    }

    fn all_complete(handles: &[JobHandle]) -> bool {
        handles.iter().all(JobHandle::is_complete)
    }
}

/// Completes a handle created by [`JobHandle::pending`].
///
/// Dropping the completer completes the handle as well, so an abandoned
/// dependency never blocks a submission forever.
#[derive(Debug)]
pub struct JobCompleter {
    handle: Option<JobHandle>,
}

impl JobCompleter {
    pub fn complete(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.signal();
        }
    }
}

impl Drop for JobCompleter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.signal();
        }
    }
}

/// How long a submission may wait on a caller-supplied dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyPolicy {
    /// The drawer waits for the dependency (bounded by
    /// [`DrawConfig::end_of_frame_timeout`](crate::DrawConfig::end_of_frame_timeout))
    /// when the tick ends.
    #[default]
    EndOfFrame,
    /// The submission is held back until the dependency resolves, however
    /// many ticks that takes. Its entries are versioned in the epoch the
    /// dependency completed in.
    Infinite,
}

/// Something that runs jobs once their dependencies have completed.
pub trait JobScheduler: Send + Sync {
    /// Schedule `job` to run after every handle in `dependencies` completed.
    fn schedule(&self, dependencies: &[JobHandle], job: Job) -> JobHandle;

    /// Promote and run jobs whose dependencies completed since they were
    /// scheduled. Called by the drawer at least once per tick.
    fn flush(&self) {}

    /// Whether the current thread belongs to this scheduler.
    fn is_worker_thread(&self) -> bool {
        is_worker_thread()
    }
}

/// Write-once result slot of a scheduled job.
pub struct Promise<T> {
    handle: JobHandle,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Promise<T> {
    /// Pair an output slot with the handle of the job that fills it.
    ///
    /// Lets one job complete several promises at once.
    pub(crate) fn from_parts(handle: JobHandle, slot: Arc<Mutex<Option<T>>>) -> Self {
        Self { handle, slot }
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn is_complete(&self) -> bool {
        self.handle.is_complete()
    }

    /// Move the result out. `None` until the job completed, or if taken.
    pub fn take(&self) -> Option<T> {
        if !self.is_complete() {
            return None;
        }
        self.slot.lock().take()
    }
}

impl<T: Clone> Promise<T> {
    /// Clone the result out, leaving it in place for other readers.
    pub fn get_cloned(&self) -> Option<T> {
        if !self.is_complete() {
            return None;
        }
        self.slot.lock().clone()
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Schedule a job producing a value and return its promise.
pub fn spawn<T, F>(scheduler: &dyn JobScheduler, dependencies: &[JobHandle], f: F) -> Promise<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let slot = Arc::new(Mutex::new(None));
    let output = Arc::clone(&slot);
    let handle = scheduler.schedule(
        dependencies,
        Box::new(move || {
            let value = f();
            *output.lock() = Some(value);
        }),
    );
    Promise { handle, slot }
}

struct QueuedJob {
    dependencies: Vec<JobHandle>,
    job: Job,
    handle: JobHandle,
}

impl QueuedJob {
    fn run(self) {
        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(self.job)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            log::error!("draw job panicked: {message}");
        }
        self.handle.signal();
    }
}

// ---------------------------------------------------------------------------
// Inline scheduler
// ---------------------------------------------------------------------------

/// Runs jobs synchronously on the scheduling thread.
///
/// Jobs with incomplete dependencies are deferred until a later
/// [`schedule`](JobScheduler::schedule) or [`flush`](JobScheduler::flush)
/// finds them ready.
#[derive(Default)]
pub struct InlineScheduler {
    deferred: Mutex<Vec<QueuedJob>>,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs still waiting on dependencies.
    pub fn deferred_count(&self) -> usize {
        self.deferred.lock().len()
    }

    fn run_ready(&self) {
        loop {
            let ready = {
                let mut deferred = self.deferred.lock();
                let position = deferred
                    .iter()
                    .position(|j| JobHandle::all_complete(&j.dependencies));
                position.map(|i| deferred.remove(i))
            };
            match ready {
                Some(job) => job.run(),
                None => break,
            }
        }
    }
}

impl JobScheduler for InlineScheduler {
    fn schedule(&self, dependencies: &[JobHandle], job: Job) -> JobHandle {
        let handle = JobHandle::unsignaled();
        let queued = QueuedJob {
            dependencies: dependencies.to_vec(),
            job,
            handle: handle.clone(),
        };
        if JobHandle::all_complete(&queued.dependencies) {
            queued.run();
            self.run_ready();
        } else {
            self.deferred.lock().push(queued);
        }
        handle
    }

    fn flush(&self) {
        self.run_ready();
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PoolQueue {
    ready: VecDeque<QueuedJob>,
    waiting: Vec<QueuedJob>,
    shutdown: bool,
}

impl PoolQueue {
    /// Move jobs whose dependencies completed to the ready queue.
    fn promote(&mut self) -> usize {
        let mut promoted = 0;
        let mut i = 0;
        while i < self.waiting.len() {
            if JobHandle::all_complete(&self.waiting[i].dependencies) {
                let job = self.waiting.swap_remove(i);
                self.ready.push_back(job);
                promoted += 1;
            } else {
                i += 1;
            }
        }
        promoted
    }
}

#[derive(Default)]
struct PoolShared {
    queue: Mutex<PoolQueue>,
    available: Condvar,
}

/// Fixed-size pool of worker threads.
///
/// Dependencies on other pool jobs are resolved as soon as those jobs finish.
/// Dependencies on external handles are re-checked periodically and on every
/// [`flush`](JobScheduler::flush).
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Poll interval for waiting jobs with external dependencies.
    const DEPENDENCY_POLL: Duration = Duration::from_millis(2);

    /// Spawn a pool with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        let shared = Arc::new(PoolShared::default());
        let threads = (0..num_threads.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("draw-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .unwrap_or_else(|e| panic!("failed to spawn draw worker thread: {e}"))
            })
            .collect();
        Self { shared, threads }
    }

    /// Creates a pool sized to the number of available CPU cores.
    pub fn default_threads() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, |n| n.get()))
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }
}

fn worker_loop(shared: &PoolShared) {
    IS_WORKER.with(|w| w.set(true));
    let mut queue = shared.queue.lock();
    loop {
        queue.promote();
        if let Some(job) = queue.ready.pop_front() {
            drop(queue);
            job.run();
            queue = shared.queue.lock();
            if queue.promote() > 0 {
                shared.available.notify_all();
            }
            continue;
        }
        if queue.shutdown {
            break;
        }
        if queue.waiting.is_empty() {
            shared.available.wait(&mut queue);
        } else {
            shared
                .available
                .wait_for(&mut queue, WorkerPool::DEPENDENCY_POLL);
        }
    }
}

impl JobScheduler for WorkerPool {
    fn schedule(&self, dependencies: &[JobHandle], job: Job) -> JobHandle {
        let handle = JobHandle::unsignaled();
        let queued = QueuedJob {
            dependencies: dependencies.to_vec(),
            job,
            handle: handle.clone(),
        };
        let mut queue = self.shared.queue.lock();
        if JobHandle::all_complete(&queued.dependencies) {
            queue.ready.push_back(queued);
        } else {
            queue.waiting.push(queued);
        }
        drop(queue);
        self.shared.available.notify_one();
        handle
    }

    fn flush(&self) {
        if self.shared.queue.lock().promote() > 0 {
            self.shared.available.notify_all();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            if !queue.waiting.is_empty() {
                log::debug!(
                    "dropping {} draw job(s) with unresolved dependencies",
                    queue.waiting.len()
                );
                queue.waiting.clear();
            }
        }
        self.shared.available.notify_all();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn inline_runs_immediately() {
        let scheduler = InlineScheduler::new();
        let promise = spawn(&scheduler, &[], || 7);
        assert!(promise.is_complete());
        assert_eq!(promise.take(), Some(7));
        assert_eq!(promise.take(), None);
    }

    #[test]
    fn inline_defers_until_dependency_completes() {
        let scheduler = InlineScheduler::new();
        let (dep, completer) = JobHandle::pending();
        let promise = spawn(&scheduler, &[dep], || "done");
        assert!(!promise.is_complete());
        assert_eq!(scheduler.deferred_count(), 1);

        completer.complete();
        scheduler.flush();
        assert_eq!(promise.get_cloned(), Some("done"));
        assert_eq!(scheduler.deferred_count(), 0);
    }

    #[test]
    fn inline_chains_run_in_order() {
        let scheduler = InlineScheduler::new();
        let (dep, completer) = JobHandle::pending();
        let first = spawn(&scheduler, &[dep], || 1);
        let second = spawn(&scheduler, &[first.handle().clone()], || 2);
        assert!(!second.is_complete());
        drop(completer);
        scheduler.flush();
        assert!(first.is_complete());
        assert!(second.is_complete());
    }

    #[test]
    fn pool_runs_jobs_with_dependencies() {
        let pool = WorkerPool::new(3);
        let counter = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&counter);
        let first = spawn(&pool, &[], move || c.fetch_add(1, Ordering::SeqCst));
        let c = Arc::clone(&counter);
        let second = spawn(&pool, &[first.handle().clone()], move || {
            c.fetch_add(1, Ordering::SeqCst)
        });

        second.handle().wait().unwrap();
        assert_eq!(first.take(), Some(0));
        assert_eq!(second.take(), Some(1));
    }

    #[test]
    fn pool_resolves_external_dependency() {
        let pool = WorkerPool::new(1);
        let (dep, completer) = JobHandle::pending();
        let promise = spawn(&pool, &[dep], || 5u8);
        assert!(promise
            .handle()
            .wait_timeout(Duration::from_millis(20))
            .is_err());
        completer.complete();
        promise.handle().wait().unwrap();
        assert_eq!(promise.take(), Some(5));
    }

    #[test]
    fn wait_on_worker_thread_is_rejected() {
        let pool = WorkerPool::new(1);
        let (dep, _completer) = JobHandle::pending();
        let result = spawn(&pool, &[], move || dep.wait());
        result.handle().wait().unwrap();
        assert_eq!(result.take(), Some(Err(DrawError::BlockingOnWorker)));
    }

    #[test]
    fn panicking_job_still_completes() {
        let scheduler = InlineScheduler::new();
        let promise: Promise<u32> = spawn(&scheduler, &[], || panic!("boom"));
        assert!(promise.is_complete());
        assert_eq!(promise.take(), None);
    }
}
