use std::fmt;

/// A record unlinked from a shared structure, waiting until no hazard slot
/// publishes its address.
pub struct Retire {
    ptr: *mut (),
    reclaim: unsafe fn(*mut ()),
}

// The record is only touched by the retiring thread's list and by domain teardown.
unsafe impl Send for Retire {}

impl Retire {
    pub(crate) fn new(ptr: *mut (), reclaim: unsafe fn(*mut ())) -> Self {
        Retire { ptr, reclaim }
    }

    pub fn address(&self) -> *mut () {
        self.ptr
    }

    /// Run the reclaim action. Consumes the record so it cannot run twice.
    ///
    /// # Safety
    /// No thread may still hold a reference to the record's address.
    pub(crate) unsafe fn reclaim(self) {
        (self.reclaim)(self.ptr)
    }
}

impl fmt::Debug for Retire {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Retire({:?})", self.ptr)
    }
}

/// Reclaim action for records allocated with `Box::<T>::new`.
pub(crate) unsafe fn reclaim_box<T>(ptr: *mut ()) {
    drop(Box::from_raw(ptr as *mut T));
}
