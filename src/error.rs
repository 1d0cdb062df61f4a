//! Error types shared by the reclamation domain, the queue and the pool.

use std::io;
use thiserror::Error;

/// Errors raised by the hazard pointer domain and its guards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HazardError {
    /// Every hazard slot of the domain is leased.
    #[error("no free hazard slot: all {capacity} slots are leased")]
    CapacityExceeded { capacity: usize },
    /// The protected source changed between publication and validation.
    #[error("protected pointer changed before it was validated")]
    StaleRead,
    #[error("invalid domain configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Errors raised by [`ThreadPool`](crate::pool::ThreadPool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has begun shutting down and rejects new tasks.
    #[error("thread pool is shutting down")]
    PoolShuttingDown,
    /// The configured bound on queued tasks was reached.
    #[error("task queue is full ({capacity} pending tasks)")]
    QueueFull { capacity: usize },
    #[error("invalid thread pool configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to spawn worker thread")]
    Spawn(#[from] io::Error),
}

/// Reasons a [`TaskHandle`](crate::pool::TaskHandle) yields no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was cancelled before a worker started it.
    #[error("task was cancelled before it started")]
    Cancelled,
    /// The pool shut down without draining and dropped the task.
    #[error("task was discarded by pool shutdown")]
    Discarded,
}

pub type HazardResult<T> = Result<T, HazardError>;
pub type PoolResult<T> = Result<T, PoolError>;
