use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cmp;
use std::hint;
use std::thread;
use std::time::Duration;

const MAX_BACKOFF: u32 = 2048;
const SPIN_LIMIT: u32 = 64;
const YIELD_LIMIT: u32 = 512;

/// Randomised exponential backoff for CAS retry loops and idle workers.
///
/// Each call to [`snooze`](Backoff::snooze) waits for a random amount below the
/// current bound and doubles the bound, capped at `MAX_BACKOFF`. Small bounds
/// spin, medium bounds yield the thread and large bounds sleep briefly.
#[derive(Debug)]
pub struct Backoff {
    limit: u32,
    rng: SmallRng,
}

impl Backoff {
    pub fn new() -> Self {
        Backoff {
            limit: 1,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn snooze(&mut self) {
        let wait = self.rng.gen_range(0..=self.limit);
        if self.limit <= SPIN_LIMIT {
            for _ in 0..wait {
                hint::spin_loop();
            }
        } else if self.limit <= YIELD_LIMIT {
            thread::yield_now();
        } else {
            thread::sleep(Duration::from_nanos(u64::from(wait) * 10));
        }
        self.limit = cmp::min(self.limit * 2, MAX_BACKOFF);
    }

    /// True once the backoff has stopped spinning; idle loops park from here.
    pub fn is_completed(&self) -> bool {
        self.limit >= MAX_BACKOFF
    }

    pub fn reset(&mut self) {
        self.limit = 1;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new()
    }
}
