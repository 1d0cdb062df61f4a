use super::domain::HazardPtrDomain;
use super::slot::SlotHandle;
use crate::error::{HazardError, HazardResult};
use std::fmt;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A scoped lease on one hazard slot.
///
/// While a guard publishes an address, no scan of its domain reclaims a
/// record retired at that address. Dropping the guard clears the slot and
/// returns the lease on every exit path, unwinding included.
///
/// # Examples
/// ```
/// use hazcurrent::memory::{HazardPtrDomain, HazardPtrGuard};
/// use std::sync::atomic::AtomicPtr;
///
/// let domain = HazardPtrDomain::new();
/// let shared = AtomicPtr::new(Box::into_raw(Box::new(String::from("hazard"))));
/// {
///     let mut guard = HazardPtrGuard::new(&domain).unwrap();
///     let value = unsafe { &*guard.protect(&shared) };
///     assert_eq!(value, "hazard");
/// }
/// # unsafe { drop(Box::from_raw(shared.into_inner())) };
/// ```
pub struct HazardPtrGuard<'d> {
    slot: SlotHandle<'d>,
}

impl<'d> HazardPtrGuard<'d> {
    pub fn new(domain: &'d HazardPtrDomain) -> HazardResult<Self> {
        Ok(HazardPtrGuard {
            slot: domain.acquire_slot()?,
        })
    }

    /// Protect the current value of `src` and return it.
    ///
    /// Publishes the loaded pointer, then re-reads `src` to make sure it was
    /// not replaced (and possibly retired) before the publication became
    /// visible. Retries until the two reads agree.
    pub fn protect<T>(&mut self, src: &AtomicPtr<T>) -> *mut T {
        let mut ptr = src.load(Ordering::Relaxed);
        loop {
            match self.publish_and_validate(ptr, src) {
                Ok(protected) => return protected,
                Err(current) => ptr = current,
            }
        }
    }

    /// Single attempt at protecting `ptr` as the value of `src`.
    ///
    /// Fails with [`HazardError::StaleRead`] when `src` no longer holds
    /// `ptr`; the slot is cleared and the caller should reload and retry.
    pub fn try_protect<T>(&mut self, ptr: *mut T, src: &AtomicPtr<T>) -> HazardResult<()> {
        match self.publish_and_validate(ptr, src) {
            Ok(_) => Ok(()),
            Err(_) => {
                self.slot.clear();
                Err(HazardError::StaleRead)
            }
        }
    }

    /// Publish `ptr` without validation.
    ///
    /// The caller must validate that `ptr` is still reachable after this
    /// returns, before dereferencing it.
    pub fn protect_raw<T>(&mut self, ptr: *mut T) {
        self.slot.publish(ptr as *mut ());
    }

    /// Clear the published address, keeping the slot leased.
    pub fn reset(&mut self) {
        self.slot.clear();
    }

    /// The address currently published, or null.
    pub fn protected(&self) -> *mut () {
        self.slot.protected()
    }

    pub fn slot_index(&self) -> Option<usize> {
        self.slot.index()
    }

    fn publish_and_validate<T>(&mut self, ptr: *mut T, src: &AtomicPtr<T>) -> Result<*mut T, *mut T> {
        self.slot.publish(ptr as *mut ());
        let current = src.load(Ordering::SeqCst);
        if current == ptr {
            Ok(ptr)
        } else {
            Err(current)
        }
    }
}

impl<'d> Drop for HazardPtrGuard<'d> {
    fn drop(&mut self) {
        self.slot.clear();
        self.slot.release();
    }
}

impl<'d> fmt::Debug for HazardPtrGuard<'d> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HazardPtrGuard {{ slot: {:?}, protected: {:?} }}", self.slot, self.protected())
    }
}

#[cfg(test)]
mod tests {
    use super::HazardPtrGuard;
    use crate::error::HazardError;
    use crate::memory::{DomainConfig, HazardPtrDomain};
    use std::sync::atomic::{AtomicPtr, Ordering};

    fn published(domain: &HazardPtrDomain, index: usize) -> *mut () {
        domain.slot(index).protected()
    }

    #[test]
    fn test_protect_publishes() {
        let domain = HazardPtrDomain::new();
        let mut value = 5u64;
        let shared = AtomicPtr::new(&mut value as *mut u64);

        let mut guard = HazardPtrGuard::new(&domain).unwrap();
        let ptr = guard.protect(&shared);
        assert_eq!(unsafe { *ptr }, 5);
        assert_eq!(guard.protected(), ptr as *mut ());
        assert!(domain.is_protected(ptr));

        guard.reset();
        assert!(guard.protected().is_null());
        assert!(guard.slot_index().is_some());
    }

    #[test]
    fn test_try_protect_stale() {
        let domain = HazardPtrDomain::new();
        let (mut a, mut b) = (1u8, 2u8);
        let shared = AtomicPtr::new(&mut a as *mut u8);
        let stale = shared.load(Ordering::Relaxed);
        shared.store(&mut b, Ordering::Relaxed);

        let mut guard = domain.guard().unwrap();
        assert_eq!(guard.try_protect(stale, &shared), Err(HazardError::StaleRead));
        assert!(guard.protected().is_null());

        let fresh = shared.load(Ordering::Relaxed);
        assert_eq!(guard.try_protect(fresh, &shared), Ok(()));
        assert_eq!(guard.protected(), fresh as *mut ());
    }

    #[test]
    fn test_drop_clears_slot() {
        let domain = HazardPtrDomain::new();
        let mut value = 1u32;
        let shared = AtomicPtr::new(&mut value as *mut u32);
        let index = {
            let mut guard = domain.guard().unwrap();
            guard.protect(&shared);
            guard.slot_index().unwrap()
        };
        assert!(published(&domain, index).is_null());
        assert!(!domain.is_protected(&value as *const u32));
    }

    fn protect_then_fail(domain: &HazardPtrDomain, shared: &AtomicPtr<u32>) -> Result<(), HazardError> {
        let mut guard = domain.guard()?;
        guard.protect(shared);
        Err(HazardError::StaleRead)
    }

    #[test]
    fn test_early_return_clears_slot() {
        let domain = HazardPtrDomain::new();
        let mut value = 3u32;
        let shared = AtomicPtr::new(&mut value as *mut u32);
        assert!(protect_then_fail(&domain, &shared).is_err());
        assert!(!domain.is_protected(&value as *const u32));
        assert!((0..domain.capacity()).all(|index| published(&domain, index).is_null()));
    }

    #[test]
    fn test_unwind_clears_slot() {
        let domain = HazardPtrDomain::new();
        let mut value = 9u32;
        let shared = AtomicPtr::new(&mut value as *mut u32);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut guard = domain.guard().unwrap();
            guard.protect(&shared);
            panic!("task failed while protected");
        }));
        assert!(result.is_err());
        assert!(!domain.is_protected(&value as *const u32));
    }

    #[test]
    fn test_guard_exhaustion() {
        let config = DomainConfig::default().with_max_slots(2);
        let domain = HazardPtrDomain::with_config(config).unwrap();
        let first = domain.guard().unwrap();
        let second = domain.guard().unwrap();
        assert!(matches!(
            HazardPtrGuard::new(&domain),
            Err(HazardError::CapacityExceeded { capacity: 2 })
        ));
        drop((first, second));
        assert!(HazardPtrGuard::new(&domain).is_ok());
    }
}
