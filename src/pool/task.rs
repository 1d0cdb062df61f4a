use super::arena::WorkerArena;
use crate::error::TaskError;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A type-erased task as stored in the pool's queue. It receives the index of
/// the worker running it (`None` when run by the submitter) and that runner's
/// scratch arena.
pub(crate) type Job = Box<dyn FnOnce(Option<usize>, &WorkerArena) + Send>;

enum TaskState<R> {
    Pending,
    Done(Result<R, TaskError>),
    Taken,
}

struct TaskSlot<R> {
    state: Mutex<TaskState<R>>,
    ready: Condvar,
    cancelled: AtomicBool,
}

impl<R> TaskSlot<R> {
    fn complete(&self, result: Result<R, TaskError>) {
        let mut state = self.state.lock();
        *state = TaskState::Done(result);
        self.ready.notify_all();
    }
}

/// What a running task can see of its execution.
pub struct TaskContext<'a> {
    worker_id: Option<usize>,
    cancelled: &'a AtomicBool,
    arena: &'a WorkerArena,
}

impl<'a> TaskContext<'a> {
    /// Index of the pool worker running the task, `None` if the submitting
    /// thread runs it.
    pub fn worker_id(&self) -> Option<usize> {
        self.worker_id
    }

    /// Whether [`TaskHandle::cancel`] was called. Long tasks should poll this.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Scratch memory of the running thread, reset once the task returns.
    pub fn arena(&self) -> &'a WorkerArena {
        self.arena
    }
}

/// The result side of a submitted task.
pub struct TaskHandle<R> {
    slot: Arc<TaskSlot<R>>,
}

impl<R> TaskHandle<R> {
    /// Block until the task finished and return its value.
    pub fn join(self) -> Result<R, TaskError> {
        let mut state = self.slot.state.lock();
        loop {
            match mem::replace(&mut *state, TaskState::Taken) {
                TaskState::Done(result) => return result,
                TaskState::Pending => {
                    *state = TaskState::Pending;
                    self.slot.ready.wait(&mut state);
                }
                // `join` consumes the handle, so nobody took the result before
                TaskState::Taken => return Err(TaskError::Discarded),
            }
        }
    }

    /// Take the result if the task already finished, otherwise hand the
    /// handle back.
    pub fn try_join(self) -> Result<Result<R, TaskError>, Self> {
        {
            let mut state = self.slot.state.lock();
            if let TaskState::Done(_) = *state {
                if let TaskState::Done(result) = mem::replace(&mut *state, TaskState::Taken) {
                    return Ok(result);
                }
            }
        }
        Err(self)
    }

    pub fn is_finished(&self) -> bool {
        matches!(*self.slot.state.lock(), TaskState::Done(_))
    }

    /// Ask the task to stop. A task that has not started is skipped; a
    /// running task sees [`TaskContext::is_cancelled`].
    pub fn cancel(&self) {
        self.slot.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.cancelled.load(Ordering::Acquire)
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TaskHandle {{ finished: {:?}, cancelled: {:?} }}",
            self.is_finished(),
            self.is_cancelled()
        )
    }
}

/// Completes the task slot exactly once. Dropped without running, it reports
/// the task as discarded.
struct Completer<R> {
    slot: Option<Arc<TaskSlot<R>>>,
}

impl<R> Completer<R> {
    fn run<F>(mut self, worker_id: Option<usize>, arena: &WorkerArena, task: F)
    where
        F: FnOnce(&TaskContext<'_>) -> R,
    {
        let slot = match self.slot.take() {
            Some(slot) => slot,
            None => return,
        };
        if slot.cancelled.load(Ordering::Acquire) {
            slot.complete(Err(TaskError::Cancelled));
            return;
        }

        let context = TaskContext {
            worker_id,
            cancelled: &slot.cancelled,
            arena,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| task(&context))).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            warn!(worker = ?worker_id, %message, "task panicked");
            TaskError::Panicked(message)
        });
        slot.complete(result);
    }
}

impl<R> Drop for Completer<R> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.complete(Err(TaskError::Discarded));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Wrap `task` into a queueable job and the handle observing it.
pub(crate) fn package<F, R>(task: F) -> (Job, TaskHandle<R>)
where
    F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
    R: Send + 'static,
{
    let slot = Arc::new(TaskSlot {
        state: Mutex::new(TaskState::Pending),
        ready: Condvar::new(),
        cancelled: AtomicBool::new(false),
    });
    let completer = Completer {
        slot: Some(slot.clone()),
    };
    let job: Job = Box::new(move |worker_id, arena: &WorkerArena| completer.run(worker_id, arena, task));
    (job, TaskHandle { slot })
}
