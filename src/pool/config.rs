use super::arena::DEFAULT_ARENA_BLOCKS;
use crate::error::{PoolError, PoolResult};
use crate::memory::DomainConfig;
use std::thread;

/// What `submit` does once shutdown has begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Fail with [`PoolError::PoolShuttingDown`].
    RejectNew,
    /// Run the task on the submitting thread.
    CallerRuns,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        ShutdownPolicy::RejectNew
    }
}

/// Configuration of a [`ThreadPool`](super::ThreadPool).
///
/// # Examples
/// ```
/// use hazcurrent::pool::{ShutdownPolicy, ThreadPoolConfig};
///
/// let config = ThreadPoolConfig::default()
///     .with_worker_count(4)
///     .with_queue_capacity(1024)
///     .with_shutdown_policy(ShutdownPolicy::CallerRuns);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPoolConfig {
    pub worker_count: usize,
    /// Bound on queued tasks that no worker has started yet. `None` is unbounded.
    pub queue_capacity: Option<usize>,
    pub shutdown_policy: ShutdownPolicy,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
    /// Hazard pointer domain backing the task queue.
    pub domain: DomainConfig,
    /// Initial size of each worker's scratch arena, in `ARENA_BLOCK_SIZE` blocks.
    pub arena_blocks: usize,
}

/// One worker per available core, leaving one for the submitting thread.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|cores| cores.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

impl ThreadPoolConfig {
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    pub fn with_thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_domain_config(mut self, domain: DomainConfig) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_arena_blocks(mut self, blocks: usize) -> Self {
        self.arena_blocks = blocks;
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.worker_count == 0 {
            return Err(PoolError::InvalidConfig("worker_count must be at least 1".to_owned()));
        }
        if self.queue_capacity == Some(0) {
            return Err(PoolError::InvalidConfig("queue_capacity must be at least 1".to_owned()));
        }
        self.domain
            .validate()
            .map_err(|err| PoolError::InvalidConfig(err.to_string()))
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        ThreadPoolConfig {
            worker_count: default_worker_count(),
            queue_capacity: None,
            shutdown_policy: ShutdownPolicy::default(),
            thread_name: "hazcurrent-worker".to_owned(),
            domain: DomainConfig::default(),
            arena_blocks: DEFAULT_ARENA_BLOCKS,
        }
    }
}
