use super::domain::{HazardPtrDomain, SLOTS_PER_THREAD};
use std::cell::RefCell;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

static NEXT_THREAD_TOKEN: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_TOKEN: usize = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
    static SLOT_CACHE: RefCell<SlotCache> = RefCell::new(SlotCache::default());
}

/// A process-unique, non-zero identity for the calling thread.
pub(crate) fn current_thread_token() -> usize {
    THREAD_TOKEN.with(|token| *token)
}

/// Slots a thread released but keeps leased, per domain it touched.
///
/// Dropped when the thread exits, handing every cached slot back to the free
/// pool of its domain. Domains that are already gone are skipped.
#[derive(Default)]
struct SlotCache {
    entries: Vec<CachedSlots>,
}

struct CachedSlots {
    table: Weak<[HazardSlot]>,
    indices: Vec<usize>,
}

impl CachedSlots {
    fn belongs_to(&self, table: &Arc<[HazardSlot]>) -> bool {
        // The weak reference keeps the allocation, so the address is not reused
        ptr::eq(Weak::as_ptr(&self.table) as *const HazardSlot, Arc::as_ptr(table) as *const HazardSlot)
    }
}

impl SlotCache {
    fn take(&mut self, table: &Arc<[HazardSlot]>) -> Option<usize> {
        self.entries
            .iter_mut()
            .find(|entry| entry.belongs_to(table))
            .and_then(|entry| entry.indices.pop())
    }

    fn put(&mut self, table: &Arc<[HazardSlot]>, index: usize) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.belongs_to(table)) {
            if entry.indices.len() >= SLOTS_PER_THREAD {
                return false;
            }
            entry.indices.push(index);
            return true;
        }
        self.entries.retain(|entry| entry.table.strong_count() > 0);
        self.entries.push(CachedSlots {
            table: Arc::downgrade(table),
            indices: vec![index],
        });
        true
    }
}

impl Drop for SlotCache {
    fn drop(&mut self) {
        for entry in self.entries.drain(..) {
            if let Some(table) = entry.table.upgrade() {
                for index in entry.indices {
                    table[index].release();
                }
            }
        }
    }
}

/// Pop a slot of `table` cached by the calling thread.
pub(crate) fn take_cached(table: &Arc<[HazardSlot]>) -> Option<usize> {
    SLOT_CACHE
        .try_with(|cache| cache.borrow_mut().take(table))
        .ok()
        .flatten()
}

/// Keep a released slot leased for the calling thread. Returns false when the
/// cache is full or already torn down; the caller then frees the slot.
pub(crate) fn cache_released(table: &Arc<[HazardSlot]>, index: usize) -> bool {
    SLOT_CACHE
        .try_with(|cache| cache.borrow_mut().put(table, index))
        .unwrap_or(false)
}

/// One entry of the domain's slot table.
///
/// `protected` is null while idle. `owner` is 0 while the slot sits in the free
/// pool, otherwise the token of the leasing thread.
pub(crate) struct HazardSlot {
    protected: AtomicPtr<()>,
    active: AtomicBool,
    owner: AtomicUsize,
}

impl HazardSlot {
    pub(crate) fn new() -> Self {
        HazardSlot {
            protected: AtomicPtr::default(),
            active: AtomicBool::new(false),
            owner: AtomicUsize::new(0),
        }
    }

    pub(crate) fn try_claim(&self, owner: usize) -> bool {
        if self.active.load(Ordering::Relaxed) {
            return false;
        }
        match self.active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => {
                self.adopt(owner);
                true
            }
            Err(_) => false,
        }
    }

    /// Hand an already leased slot to `owner`.
    pub(crate) fn adopt(&self, owner: usize) {
        self.owner.store(owner, Ordering::Relaxed);
        self.protected.store(ptr::null_mut(), Ordering::Release);
    }

    pub(crate) fn publish(&self, record: *mut ()) {
        // SeqCst pairs with the fence in `scan`
        self.protected.store(record, Ordering::SeqCst);
    }

    pub(crate) fn clear(&self) {
        self.protected.store(ptr::null_mut(), Ordering::Release);
    }

    pub(crate) fn release(&self) {
        self.clear();
        self.owner.store(0, Ordering::Relaxed);
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn protected(&self) -> *mut () {
        self.protected.load(Ordering::Acquire)
    }

    /// The published address of a leased slot, if any.
    pub(crate) fn hazard(&self) -> Option<*mut ()> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        let record = self.protected();
        if record.is_null() {
            None
        } else {
            Some(record)
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn owner(&self) -> usize {
        self.owner.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for HazardSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "HazardSlot {{ protected: {:?}, active: {:?}, owner: {:?} }}",
            self.protected(),
            self.is_active(),
            self.owner()
        )
    }
}

/// An exclusive lease on one slot of a [`HazardPtrDomain`].
///
/// Dropping the handle releases the lease. Releasing twice is a no-op, so a
/// handle can be released early through [`HazardPtrDomain::release_slot`].
pub struct SlotHandle<'d> {
    domain: &'d HazardPtrDomain,
    index: Option<usize>,
}

impl<'d> SlotHandle<'d> {
    pub(crate) fn new(domain: &'d HazardPtrDomain, index: usize) -> Self {
        SlotHandle {
            domain,
            index: Some(index),
        }
    }

    /// Index of the leased slot, or `None` once released.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn domain(&self) -> &'d HazardPtrDomain {
        self.domain
    }

    pub fn is_released(&self) -> bool {
        self.index.is_none()
    }

    pub(crate) fn publish(&self, record: *mut ()) {
        debug_assert!(self.index.is_some(), "publish through a released slot handle");
        if let Some(index) = self.index {
            self.domain.slot(index).publish(record);
        }
    }

    pub(crate) fn clear(&self) {
        debug_assert!(self.index.is_some(), "clear through a released slot handle");
        if let Some(index) = self.index {
            self.domain.slot(index).clear();
        }
    }

    pub(crate) fn protected(&self) -> *mut () {
        match self.index {
            Some(index) => self.domain.slot(index).protected(),
            None => ptr::null_mut(),
        }
    }

    pub(crate) fn release(&mut self) {
        if let Some(index) = self.index.take() {
            self.domain.release_index(index);
        }
    }
}

impl<'d> Drop for SlotHandle<'d> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<'d> fmt::Debug for SlotHandle<'d> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SlotHandle({:?})", self.index)
    }
}
