//! A fixed-size thread pool whose task queue is the crate's hazard pointer
//! protected [`ConcurrentQueue`](crate::structures::ConcurrentQueue).
//!
//! Tasks are submitted as closures and observed through a [`TaskHandle`].
//! A panicking task is reported through its handle and leaves the worker
//! running. Each worker owns a bump arena that tasks use for scratch memory.

pub use self::arena::{WorkerArena, ARENA_BLOCK_SIZE, DEFAULT_ARENA_BLOCKS};
pub use self::config::{default_worker_count, ShutdownPolicy, ThreadPoolConfig};
pub use self::task::{TaskContext, TaskHandle};
pub use self::thread_pool::ThreadPool;

mod arena;
mod config;
mod task;
mod thread_pool;
