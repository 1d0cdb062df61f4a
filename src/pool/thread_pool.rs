use super::arena::WorkerArena;
use super::config::{ShutdownPolicy, ThreadPoolConfig};
use super::task::{self, Job, TaskContext, TaskHandle};
use crate::backoff::Backoff;
use crate::error::{PoolError, PoolResult};
use crate::memory::HazardPtrDomain;
use crate::structures::ConcurrentQueue;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::fmt;
use std::mem;
use std::sync::atomic::{self, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;
use tracing::{debug, warn};

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const STOPPED: u8 = 2;

/// Upper bound on how long an idle worker sleeps before polling again.
const PARK_TIMEOUT: Duration = Duration::from_millis(1);

/// Identifies a worker thread: the pool it serves and its index there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WorkerTag {
    pool: usize,
    id: usize,
}

thread_local! {
    static WORKER: Cell<Option<WorkerTag>> = Cell::new(None);
}

/// State shared between the pool handle and its workers.
struct Shared {
    queue: ConcurrentQueue<Job>,
    state: AtomicU8,
    /// Tasks queued that no worker has taken yet.
    pending: AtomicUsize,
    /// Workers between starting a poll of the queue and finishing what it returned.
    active: AtomicUsize,
    /// Tasks currently executing on a worker.
    running: AtomicUsize,
    sleepers: AtomicUsize,
    next_wake: AtomicUsize,
    threads: OnceLock<Vec<Thread>>,
    quiescent: Mutex<()>,
    drained: Condvar,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    fn is_stopped(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STOPPED
    }

    fn is_quiescent(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0 && self.active.load(Ordering::SeqCst) == 0
    }

    fn finish_poll(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 && !self.is_running() && self.is_quiescent() {
            let _lock = self.quiescent.lock();
            self.drained.notify_all();
        }
    }

    fn key(&self) -> usize {
        self as *const Shared as usize
    }

    /// Wait until no task is queued or running. `helper` is the index of the
    /// calling worker when a task of this pool drains it; that worker runs
    /// the queued tasks itself and does not wait for its own activity.
    fn wait_until_drained(&self, helper: Option<usize>) {
        let own = usize::from(helper.is_some());
        let mut arena = WorkerArena::with_blocks(0);
        loop {
            if let Some(id) = helper {
                self.run_queued(id, &mut arena);
            }
            // Stopped pools have no workers left to take late submissions
            if self.is_stopped() {
                self.discard_queued();
            }
            let mut lock = self.quiescent.lock();
            if self.pending.load(Ordering::SeqCst) == 0 && self.active.load(Ordering::SeqCst) <= own {
                return;
            }
            // Idle workers touch `active` while polling, so wake up periodically
            // rather than relying on a single notification.
            self.drained.wait_for(&mut lock, PARK_TIMEOUT);
        }
    }

    fn run_queued(&self, id: usize, arena: &mut WorkerArena) {
        while let Some(job) = self.queue.pop() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            self.running.fetch_add(1, Ordering::SeqCst);
            job(Some(id), arena);
            self.running.fetch_sub(1, Ordering::SeqCst);
            arena.reset();
        }
    }

    fn park(&self) {
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        if self.queue.is_empty() && !self.is_stopped() {
            thread::park_timeout(PARK_TIMEOUT);
        }
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }

    fn wake_one(&self) {
        if self.sleepers.load(Ordering::SeqCst) == 0 {
            return;
        }
        if let Some(threads) = self.threads.get() {
            let index = self.next_wake.fetch_add(1, Ordering::Relaxed) % threads.len();
            threads[index].unpark();
        }
    }

    fn wake_all(&self) {
        if let Some(threads) = self.threads.get() {
            for thread in threads {
                thread.unpark();
            }
        }
    }

    /// Drop every queued task, completing its handle as discarded.
    fn discard_queued(&self) -> usize {
        atomic::fence(Ordering::SeqCst);
        let mut discarded = 0;
        while let Some(job) = self.queue.pop() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            drop(job);
            discarded += 1;
        }
        discarded
    }
}

fn worker_loop(id: usize, shared: &Shared, arena_blocks: usize) {
    let tag = WorkerTag { pool: shared.key(), id };
    WORKER.with(|worker| worker.set(Some(tag)));
    debug!(worker = id, "worker started");

    let mut arena = WorkerArena::with_blocks(arena_blocks);
    let mut backoff = Backoff::new();
    while !shared.is_stopped() {
        // Counted as active before the pop so a drain never sees a taken
        // task that is neither pending nor active.
        shared.active.fetch_add(1, Ordering::SeqCst);
        match shared.queue.pop() {
            Some(job) => {
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                shared.running.fetch_add(1, Ordering::SeqCst);
                job(Some(id), &arena);
                arena.reset();
                shared.running.fetch_sub(1, Ordering::SeqCst);
                shared.finish_poll();
                backoff.reset();
            }
            None => {
                shared.finish_poll();
                if backoff.is_completed() {
                    shared.park();
                } else {
                    backoff.snooze();
                }
            }
        }
    }

    WORKER.with(|worker| worker.set(None));
    debug!(worker = id, "worker stopped");
}

/// A fixed set of worker threads fed by a lock-free [`ConcurrentQueue`].
///
/// Submission and dispatch never take a lock. Idle workers back off and then
/// park with a timeout, and `submit` unparks one of them. Dropping the pool
/// drains the queue and joins every worker.
///
/// # Examples
/// ```
/// use hazcurrent::pool::{ThreadPool, ThreadPoolConfig};
///
/// let pool = ThreadPool::new(ThreadPoolConfig::default().with_worker_count(2)).unwrap();
/// let handle = pool.submit(|| 6 * 7).unwrap();
/// assert_eq!(handle.join(), Ok(42));
/// pool.shutdown(true);
/// ```
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: ThreadPoolConfig,
}

impl ThreadPool {
    pub fn new(config: ThreadPoolConfig) -> PoolResult<Self> {
        config.validate()?;
        let domain = HazardPtrDomain::with_config(config.domain)
            .map_err(|err| PoolError::InvalidConfig(err.to_string()))?;
        let shared = Arc::new(Shared {
            queue: ConcurrentQueue::with_domain(Arc::new(domain)),
            state: AtomicU8::new(RUNNING),
            pending: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            sleepers: AtomicUsize::new(0),
            next_wake: AtomicUsize::new(0),
            threads: OnceLock::new(),
            quiescent: Mutex::new(()),
            drained: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(config.worker_count);
        for id in 0..config.worker_count {
            let worker_shared = shared.clone();
            let arena_blocks = config.arena_blocks;
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, id))
                .spawn(move || worker_loop(id, &worker_shared, arena_blocks));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    warn!(worker = id, error = %err, "failed to spawn worker, stopping pool");
                    shared.state.store(STOPPED, Ordering::SeqCst);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn(err));
                }
            }
        }
        let _ = shared
            .threads
            .set(workers.iter().map(|handle| handle.thread().clone()).collect());

        debug!(workers = config.worker_count, capacity = ?config.queue_capacity, "thread pool started");
        Ok(ThreadPool {
            shared,
            workers: Mutex::new(workers),
            config,
        })
    }

    /// Queue `task` for execution on a worker.
    pub fn submit<F, R>(&self, task: F) -> PoolResult<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_with(move |_: &TaskContext<'_>| task())
    }

    /// Queue `task`, giving it access to its [`TaskContext`].
    pub fn submit_with<F, R>(&self, task: F) -> PoolResult<TaskHandle<R>>
    where
        F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let shared = &*self.shared;
        // Counted before the state check so a concurrent drain either sees
        // this task or this call sees the shutdown.
        let queued = shared.pending.fetch_add(1, Ordering::SeqCst);
        if !shared.is_running() {
            shared.pending.fetch_sub(1, Ordering::SeqCst);
            return match self.config.shutdown_policy {
                ShutdownPolicy::RejectNew => Err(PoolError::PoolShuttingDown),
                ShutdownPolicy::CallerRuns => {
                    let (job, handle) = task::package(task);
                    job(None, &WorkerArena::with_blocks(0));
                    Ok(handle)
                }
            };
        }
        if let Some(capacity) = self.config.queue_capacity {
            if queued >= capacity {
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                return Err(PoolError::QueueFull { capacity });
            }
        }

        let (job, handle) = task::package(task);
        shared.queue.push(job);
        // A shutdown without drain may have emptied the queue before this push
        atomic::fence(Ordering::SeqCst);
        if shared.is_stopped() {
            shared.discard_queued();
        } else {
            shared.wake_one();
        }
        Ok(handle)
    }

    /// Stop accepting tasks. With `drain`, waits until every queued task ran
    /// and the workers exited; otherwise queued tasks are discarded and the
    /// workers are only signalled. Calling it again has no further effect.
    pub fn shutdown(&self, drain: bool) {
        let shared = &*self.shared;
        if shared
            .state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!(drain, pending = shared.pending.load(Ordering::SeqCst), "thread pool shutting down");
        }

        if drain {
            shared.wait_until_drained(self.own_worker_id());
        }
        shared.state.store(STOPPED, Ordering::SeqCst);
        shared.wake_all();

        if drain {
            self.join_workers();
        } else {
            let discarded = shared.discard_queued();
            if discarded > 0 {
                debug!(discarded, "discarded queued tasks");
            }
        }
    }

    fn join_workers(&self) {
        let handles = mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in handles {
            // A task may drop the last reference to its own pool
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("worker thread panicked outside a task");
            }
        }
    }

    /// Index of the calling thread if it is a worker of this pool.
    fn own_worker_id(&self) -> Option<usize> {
        let key = self.shared.key();
        WORKER
            .with(|worker| worker.get())
            .filter(|tag| tag.pool == key)
            .map(|tag| tag.id)
    }

    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    pub fn config(&self) -> &ThreadPoolConfig {
        &self.config
    }

    /// Whether no task is waiting in the queue.
    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    /// Number of queued tasks not yet taken by a worker.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Number of tasks executing on a worker right now.
    pub fn active(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        !self.shared.is_running()
    }

    /// Index of the pool worker the caller runs on, if any.
    pub fn current_worker_id() -> Option<usize> {
        WORKER.with(|worker| worker.get()).map(|tag| tag.id)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.config.worker_count)
            .field("pending", &self.pending())
            .field("active", &self.active())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
