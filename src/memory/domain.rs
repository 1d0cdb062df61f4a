use super::guard::HazardPtrGuard;
use super::retire::{self, Retire};
use super::slot::{self, HazardSlot, SlotHandle};
use crate::backoff::Backoff;
use crate::error::{HazardError, HazardResult};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{self, Ordering};
use thread_local::ThreadLocal;
use tracing::{debug, trace, warn};

/// Default size of the slot table.
pub const MAX_HP_SLOTS: usize = 1024;
/// Released slots a thread keeps leased for its next guard.
pub const SLOTS_PER_THREAD: usize = 2;
/// Smallest usable slot table: a queue pop protects two nodes at once.
pub const MIN_HP_SLOTS: usize = 2;
/// Default number of retired records that triggers a scan.
pub const RETIRED_SCAN_THRESHOLD: usize = 32;

/// Tunables for a [`HazardPtrDomain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainConfig {
    /// Capacity of the slot table, bounding concurrently live guards.
    pub max_slots: usize,
    /// Retire list length at which `retire` runs a scan.
    pub scan_threshold: usize,
}

impl DomainConfig {
    pub fn with_max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    pub fn with_scan_threshold(mut self, scan_threshold: usize) -> Self {
        self.scan_threshold = scan_threshold;
        self
    }

    pub fn validate(&self) -> HazardResult<()> {
        if self.max_slots < MIN_HP_SLOTS {
            return Err(HazardError::InvalidConfig("max_slots must be at least 2"));
        }
        if self.scan_threshold == 0 {
            return Err(HazardError::InvalidConfig("scan_threshold must be at least 1"));
        }
        Ok(())
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        DomainConfig {
            max_slots: MAX_HP_SLOTS,
            scan_threshold: RETIRED_SCAN_THRESHOLD,
        }
    }
}

/// Per-thread state: the retire list and when to scan it next.
struct ThreadRecord {
    retired: RefCell<Vec<Retire>>,
    next_scan: Cell<usize>,
}

impl ThreadRecord {
    fn new(scan_threshold: usize) -> Self {
        ThreadRecord {
            retired: RefCell::new(Vec::new()),
            next_scan: Cell::new(scan_threshold),
        }
    }
}

/// Hazard pointer based memory reclamation.
///
/// A domain owns a fixed table of hazard slots and one retire list per
/// participating thread. Readers lease a slot through a [`HazardPtrGuard`]
/// and publish the address they are about to dereference. Writers that
/// unlink a record hand it to [`retire`](HazardPtrDomain::retire); the record
/// is reclaimed by a later [`scan`](HazardPtrDomain::scan) of the retiring
/// thread once no slot publishes its address.
///
/// Domains are ordinary values. Structures usually share one through an
/// `Arc`, and independent domains never interact.
///
/// # Examples
/// ```
/// use hazcurrent::memory::HazardPtrDomain;
/// use std::sync::atomic::{AtomicPtr, Ordering};
///
/// let domain = HazardPtrDomain::new();
/// let shared = AtomicPtr::new(Box::into_raw(Box::new(7u32)));
///
/// let mut guard = domain.guard().unwrap();
/// let ptr = guard.protect(&shared);
/// assert_eq!(unsafe { *ptr }, 7);
///
/// let old = shared.swap(Box::into_raw(Box::new(8u32)), Ordering::AcqRel);
/// unsafe { domain.retire_box(old) };
/// // Still published by `guard`.
/// assert_eq!(domain.scan(), 0);
/// drop(guard);
/// assert_eq!(domain.scan(), 1);
/// # unsafe { drop(Box::from_raw(shared.load(Ordering::Relaxed))) };
/// ```
pub struct HazardPtrDomain {
    slots: Arc<[HazardSlot]>,
    threads: ThreadLocal<ThreadRecord>,
    scan_threshold: usize,
}

impl HazardPtrDomain {
    pub fn new() -> Self {
        HazardPtrDomain::build(DomainConfig::default())
    }

    pub fn with_config(config: DomainConfig) -> HazardResult<Self> {
        config.validate()?;
        Ok(HazardPtrDomain::build(config))
    }

    fn build(config: DomainConfig) -> Self {
        HazardPtrDomain {
            slots: (0..config.max_slots).map(|_| HazardSlot::new()).collect(),
            threads: ThreadLocal::new(),
            scan_threshold: config.scan_threshold,
        }
    }

    /// Lease a slot for the calling thread.
    ///
    /// Reuses a slot cached by this thread when possible, otherwise claims a
    /// free slot from the table.
    pub fn acquire_slot(&self) -> HazardResult<SlotHandle<'_>> {
        let owner = slot::current_thread_token();
        if let Some(index) = slot::take_cached(&self.slots) {
            self.slots[index].adopt(owner);
            return Ok(SlotHandle::new(self, index));
        }

        for (index, slot) in self.slots.iter().enumerate() {
            if slot.try_claim(owner) {
                trace!(index, owner, "claimed hazard slot");
                return Ok(SlotHandle::new(self, index));
            }
        }

        warn!(capacity = self.slots.len(), "hazard slot table exhausted");
        Err(HazardError::CapacityExceeded {
            capacity: self.slots.len(),
        })
    }

    /// Return a leased slot. Releasing an already released handle does nothing.
    pub fn release_slot(&self, handle: &mut SlotHandle<'_>) {
        debug_assert!(std::ptr::eq(handle.domain(), self));
        handle.release();
    }

    /// Lease a slot wrapped in a guard.
    pub fn guard(&self) -> HazardResult<HazardPtrGuard<'_>> {
        HazardPtrGuard::new(self)
    }

    pub(crate) fn slot(&self, index: usize) -> &HazardSlot {
        &self.slots[index]
    }

    pub(crate) fn release_index(&self, index: usize) {
        let slot = &self.slots[index];
        slot.clear();
        if !slot::cache_released(&self.slots, index) {
            slot.release();
        }
    }

    /// Hand `ptr` to the calling thread's retire list; `reclaim` runs once no
    /// hazard slot publishes `ptr`.
    ///
    /// # Safety
    /// `ptr` must already be unlinked so that no new reader can reach it, it
    /// must not be retired twice, and `reclaim(ptr)` must be sound to call
    /// from whichever thread scans or drops the domain.
    pub unsafe fn retire(&self, ptr: *mut (), reclaim: unsafe fn(*mut ())) {
        let record = self.record();
        let pending = {
            let mut retired = record.retired.borrow_mut();
            retired.push(Retire::new(ptr, reclaim));
            retired.len()
        };

        if pending >= record.next_scan.get() {
            self.scan();
        }
    }

    /// [`retire`](HazardPtrDomain::retire) for a pointer from `Box::into_raw`.
    ///
    /// # Safety
    /// Same contract as `retire`; `ptr` must come from `Box::<T>::into_raw`.
    pub unsafe fn retire_box<T>(&self, ptr: *mut T) {
        self.retire(ptr as *mut (), retire::reclaim_box::<T>);
    }

    /// Reclaim every record on the calling thread's retire list whose address
    /// is not published by any slot. Returns the number reclaimed.
    pub fn scan(&self) -> usize {
        let record = self.record();
        let retired = mem::take(&mut *record.retired.borrow_mut());
        if retired.is_empty() {
            return 0;
        }

        // Orders our unlinking before the slot reads, pairs with `publish`
        atomic::fence(Ordering::SeqCst);
        let hazards: HashSet<*mut ()> = self.slots.iter().filter_map(HazardSlot::hazard).collect();

        let total = retired.len();
        let mut kept = Vec::with_capacity(hazards.len().min(total));
        for record in retired {
            if hazards.contains(&record.address()) {
                kept.push(record);
            } else {
                unsafe { record.reclaim() };
            }
        }
        let reclaimed = total - kept.len();

        // Reclaim actions may have retired more records in the meantime
        let mut retired = record.retired.borrow_mut();
        kept.append(&mut retired);
        *retired = kept;
        record.next_scan.set(retired.len() + self.scan_threshold);

        debug!(reclaimed, remaining = retired.len(), "hazard pointer scan");
        reclaimed
    }

    /// Scan until the calling thread's retire list is empty.
    ///
    /// Blocks for as long as another thread keeps one of the retired
    /// addresses protected.
    pub fn flush(&self) {
        let mut backoff = Backoff::new();
        loop {
            self.scan();
            if self.retired_count() == 0 {
                return;
            }
            backoff.snooze();
        }
    }

    /// Records waiting on the calling thread's retire list.
    pub fn retired_count(&self) -> usize {
        self.record().retired.borrow().len()
    }

    /// Whether any slot currently publishes `ptr`.
    pub fn is_protected<T>(&self, ptr: *const T) -> bool {
        let ptr = ptr as *mut ();
        self.slots.iter().any(|slot| slot.hazard() == Some(ptr))
    }

    /// Size of the slot table.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently leased, including slots cached by their thread.
    pub fn leased_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_active()).count()
    }

    pub fn scan_threshold(&self) -> usize {
        self.scan_threshold
    }

    fn record(&self) -> &ThreadRecord {
        let threshold = self.scan_threshold;
        self.threads.get_or(|| ThreadRecord::new(threshold))
    }
}

impl Default for HazardPtrDomain {
    fn default() -> Self {
        HazardPtrDomain::new()
    }
}

impl Drop for HazardPtrDomain {
    fn drop(&mut self) {
        // No guard can outlive the domain, so nothing is protected any more
        let mut reclaimed = 0;
        for record in self.threads.iter_mut() {
            for retired in record.retired.get_mut().drain(..) {
                unsafe { retired.reclaim() };
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            debug!(reclaimed, "reclaimed retired records on domain teardown");
        }
    }
}

impl fmt::Debug for HazardPtrDomain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HazardPtrDomain")
            .field("capacity", &self.capacity())
            .field("leased_slots", &self.leased_slots())
            .field("scan_threshold", &self.scan_threshold)
            .finish()
    }
}
