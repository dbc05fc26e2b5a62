use std::time::Duration;

/// The wait before the first retry. Every following wait doubles.
pub const DEFAULT_INITIAL_WAIT: Duration = Duration::from_secs(2);

/// Exponential backoff schedule used while waiting for a `mongod` to become reachable.
///
/// The schedule yields exactly `retries` waits, starting at the initial wait and doubling after
/// each one. A command executed with `retries = 2` is therefore attempted at most three times,
/// waiting 2s and then 4s in between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    next_wait: Duration,
    remaining: u32,
}

impl Backoff {
    pub fn new(initial_wait: Duration, retries: u32) -> Self {
        Self {
            next_wait: initial_wait,
            remaining: retries,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        self.remaining -= 1;
        let wait = self.next_wait;
        self.next_wait = self.next_wait.saturating_mul(2);

        Some(wait)
    }
}

/// Blocks the current thread between retry attempts.
pub trait Sleep {
    fn sleep(&self, duration: Duration);
}

/// Sleeps using [`std::thread::sleep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
