//! A module for lock-free memory management.
//!
//! The types in this module allow lock-free structures to unlink records while
//! other threads may still be reading them. A reader publishes the address it
//! is about to dereference through a [`HazardPtrGuard`]; a writer hands
//! unlinked records to [`HazardPtrDomain::retire`], and the record is only
//! reclaimed once no guard publishes it. Because an address is never reused
//! while a reader protects it, this also prevents the
//! [ABA problem](https://en.wikipedia.org/wiki/ABA_problem).

pub use self::domain::{
    DomainConfig, HazardPtrDomain, MAX_HP_SLOTS, MIN_HP_SLOTS, RETIRED_SCAN_THRESHOLD, SLOTS_PER_THREAD,
};
pub use self::guard::HazardPtrGuard;
pub use self::retire::Retire;
pub use self::slot::SlotHandle;

mod domain;
mod guard;
mod retire;
mod slot;
