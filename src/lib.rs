//! Lock-free building blocks with hazard pointer based memory reclamation.
//!
//! The [`memory`] module provides a hazard pointer domain that lets lock-free
//! structures free unlinked nodes safely. [`structures::ConcurrentQueue`] is a
//! Michael-Scott queue built on it, and [`pool::ThreadPool`] schedules tasks
//! through that queue.

pub mod error;
pub mod memory;
pub mod pool;
pub mod structures;

mod backoff;
#[cfg(test)]
mod testing;

pub use self::error::{HazardError, PoolError, TaskError};
pub use self::memory::{HazardPtrDomain, HazardPtrGuard};
pub use self::pool::{ShutdownPolicy, TaskHandle, ThreadPool, ThreadPoolConfig};
pub use self::structures::ConcurrentQueue;
