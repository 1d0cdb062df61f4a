use crate::backoff::Backoff;
use crate::error::{HazardError, HazardResult};
use crate::memory::{HazardPtrDomain, HazardPtrGuard};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// A lock-free Michael-Scott queue.
///
/// This queue is an implementation of that described in [Simple, Fast, and Practical
/// Non-blocking and Blocking Concurrent Queue Algorithms](https://dl.acm.org/citation.cfm?id=248106).
/// It is implemented as a linked-list of nodes headed by a dummy node. Dequeued nodes are
/// retired to a [`HazardPtrDomain`] instead of being freed, so a racing reader never touches
/// freed memory.
pub struct ConcurrentQueue<T: Send> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    domain: Arc<HazardPtrDomain>,
}

unsafe impl<T: Send> Send for ConcurrentQueue<T> {}
unsafe impl<T: Send> Sync for ConcurrentQueue<T> {}

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    // Initialised for every node behind the dummy; moved out by the dequeuer
    // that makes the node the new dummy.
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Node<T> {
    fn new_as_pointer(value: T) -> *mut Self {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::default(),
            value: UnsafeCell::new(MaybeUninit::new(value)),
        }))
    }

    fn new_dummy_pointer() -> *mut Self {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::default(),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }))
    }
}

impl<T: Send> ConcurrentQueue<T> {
    /// Create a new queue with its own hazard pointer domain.
    /// # Examples
    /// ```
    /// use hazcurrent::structures::ConcurrentQueue;
    /// let queue: ConcurrentQueue<String> = ConcurrentQueue::new();
    /// ```
    pub fn new() -> Self {
        ConcurrentQueue::with_domain(Arc::new(HazardPtrDomain::new()))
    }

    /// Create a new queue whose nodes are reclaimed through `domain`.
    pub fn with_domain(domain: Arc<HazardPtrDomain>) -> Self {
        let dummy = Node::new_dummy_pointer();
        ConcurrentQueue {
            head: AtomicPtr::new(dummy),
            tail: AtomicPtr::new(dummy),
            domain,
        }
    }

    pub fn domain(&self) -> &Arc<HazardPtrDomain> {
        &self.domain
    }

    /// Add a new element to the back of the queue.
    ///
    /// Waits for a hazard slot if the domain is exhausted.
    /// # Examples
    /// ```
    /// use hazcurrent::structures::ConcurrentQueue;
    /// let queue: ConcurrentQueue<String> = ConcurrentQueue::new();
    /// queue.push("hello".to_owned());
    /// ```
    pub fn push(&self, value: T) {
        let node = Node::new_as_pointer(value);
        let mut guard = self.wait_for_guard();
        self.link(node, &mut guard);
    }

    /// Add a new element, handing it back if no hazard slot is free.
    pub fn try_push(&self, value: T) -> Result<(), (T, HazardError)> {
        let mut guard = match self.domain.guard() {
            Ok(guard) => guard,
            Err(err) => return Err((value, err)),
        };
        self.link(Node::new_as_pointer(value), &mut guard);
        Ok(())
    }

    fn link(&self, node: *mut Node<T>, guard: &mut HazardPtrGuard<'_>) {
        let mut backoff = Backoff::new();
        loop {
            let tail = guard.protect(&self.tail);
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };

            // Is the tail actually the end of the queue?
            if !next.is_null() {
                // If it isn't, help move the tail forward and retry
                let _ = self.tail.compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }

            let linked = unsafe {
                (*tail)
                    .next
                    .compare_exchange(ptr::null_mut(), node, Ordering::Release, Ordering::Relaxed)
            };
            if linked.is_ok() {
                // Swinging the tail may fail; whoever observes the lag fixes it
                let _ = self.tail.compare_exchange(tail, node, Ordering::Release, Ordering::Relaxed);
                return;
            }
            backoff.snooze();
        }
    }

    /// Take an element from the front of the queue, or return None if the queue is empty.
    ///
    /// Waits for hazard slots if the domain is exhausted.
    /// # Examples
    /// ```
    /// use hazcurrent::structures::ConcurrentQueue;
    /// let queue: ConcurrentQueue<String> = ConcurrentQueue::new();
    /// queue.push("hello".to_owned());
    /// assert_eq!(queue.pop(), Some("hello".to_owned()));
    /// assert_eq!(queue.pop(), None);
    /// ```
    pub fn pop(&self) -> Option<T> {
        let mut backoff = Backoff::new();
        loop {
            match self.try_pop() {
                Ok(value) => return value,
                Err(_) => backoff.snooze(),
            }
        }
    }

    /// Like [`pop`](ConcurrentQueue::pop), but fails with
    /// [`CapacityExceeded`](crate::error::HazardError::CapacityExceeded) instead of
    /// waiting when the domain has no free slots.
    pub fn try_pop(&self) -> HazardResult<Option<T>> {
        let mut head_guard = self.domain.guard()?;
        let mut next_guard = self.domain.guard()?;
        Ok(self.unlink(&mut head_guard, &mut next_guard))
    }

    fn unlink(&self, head_guard: &mut HazardPtrGuard<'_>, next_guard: &mut HazardPtrGuard<'_>) -> Option<T> {
        let mut backoff = Backoff::new();
        loop {
            let head = head_guard.protect(&self.head);
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            if next.is_null() {
                return None;
            }

            next_guard.protect_raw(next);
            // Only nodes that were head get retired, so `next` is live while `head` is
            if !ptr::eq(head, self.head.load(Ordering::SeqCst)) {
                continue;
            }

            let tail = self.tail.load(Ordering::Acquire);
            if ptr::eq(head, tail) {
                let _ = self.tail.compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // `next` is the new dummy; we own its value
                let value = unsafe { ptr::read((*next).value.get()).assume_init() };
                head_guard.reset();
                next_guard.reset();
                unsafe { self.domain.retire_box(head) };
                return Some(value);
            }
            backoff.snooze();
        }
    }

    /// Whether the queue held no elements at the moment it was observed.
    pub fn is_empty(&self) -> bool {
        let mut guard = self.wait_for_guard();
        let head = guard.protect(&self.head);
        unsafe { (*head).next.load(Ordering::Acquire).is_null() }
    }

    fn wait_for_guard(&self) -> HazardPtrGuard<'_> {
        let mut backoff = Backoff::new();
        loop {
            match self.domain.guard() {
                Ok(guard) => return guard,
                Err(_) => backoff.snooze(),
            }
        }
    }
}

impl<T: Send> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        ConcurrentQueue::new()
    }
}

impl<T: Send> Drop for ConcurrentQueue<T> {
    fn drop(&mut self) {
        let dummy = *self.head.get_mut();
        unsafe {
            let mut current = (*dummy).next.load(Ordering::Relaxed);
            drop(Box::from_raw(dummy));
            while !current.is_null() {
                let mut node = Box::from_raw(current);
                current = node.next.load(Ordering::Relaxed);
                ptr::drop_in_place(node.value.get_mut().as_mut_ptr());
            }
        }
    }
}

impl<T: Send> fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ConcurrentQueue {{ head: {:?}, tail: {:?}, domain: {:?} }}",
            self.head.load(Ordering::Relaxed),
            self.tail.load(Ordering::Relaxed),
            self.domain
        )
    }
}
