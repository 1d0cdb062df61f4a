use bumpalo::Bump;
use std::cell::Cell;
use std::fmt;

/// Granularity of arena sizing, one cache line.
pub const ARENA_BLOCK_SIZE: usize = 64;
/// Blocks reserved up front for each worker's arena.
pub const DEFAULT_ARENA_BLOCKS: usize = 16500;

/// A worker-local bump arena for task scratch memory.
///
/// Every worker owns one. A task reaches it through
/// [`TaskContext::arena`](super::TaskContext::arena), and the worker resets it
/// after the task returns, so allocations never outlive the task. Values
/// placed in the arena are not dropped; store only data without destructors
/// that matter.
pub struct WorkerArena {
    bump: Bump,
    bytes_allocated: Cell<usize>,
}

impl WorkerArena {
    /// Create an arena with room for `blocks` blocks before it grows.
    pub fn with_blocks(blocks: usize) -> Self {
        WorkerArena {
            bump: Bump::with_capacity(blocks.saturating_mul(ARENA_BLOCK_SIZE)),
            bytes_allocated: Cell::new(0),
        }
    }

    pub fn alloc<T>(&self, val: T) -> &mut T {
        self.record(std::mem::size_of::<T>());
        self.bump.alloc(val)
    }

    pub fn alloc_slice_copy<T: Copy>(&self, slice: &[T]) -> &mut [T] {
        self.record(std::mem::size_of_val(slice));
        self.bump.alloc_slice_copy(slice)
    }

    /// Allocate `len` copies of `val`.
    pub fn alloc_slice_fill<T: Copy>(&self, len: usize, val: T) -> &mut [T] {
        self.record(len.saturating_mul(std::mem::size_of::<T>()));
        self.bump.alloc_slice_fill_copy(len, val)
    }

    pub fn alloc_str(&self, s: &str) -> &str {
        self.record(s.len());
        self.bump.alloc_str(s)
    }

    /// Bytes handed out since the last reset.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.get()
    }

    /// Bytes reserved from the system, including unused capacity.
    pub fn capacity(&self) -> usize {
        self.bump.allocated_bytes()
    }

    pub(crate) fn reset(&mut self) {
        self.bump.reset();
        self.bytes_allocated.set(0);
    }

    fn record(&self, bytes: usize) {
        self.bytes_allocated.set(self.bytes_allocated.get() + bytes);
    }
}

impl fmt::Debug for WorkerArena {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WorkerArena")
            .field("bytes_allocated", &self.bytes_allocated())
            .field("capacity", &self.capacity())
            .finish()
    }
}
