// Counting signals between interrupt and task context

use core::sync::atomic::{AtomicUsize, Ordering};

/// A non-blocking counting semaphore.
///
/// Interrupt context posts, task context takes. Nothing here waits: a task
/// that wants to sleep until a post arrives does so through its own
/// scheduler, using [`CountingSignal::pending`] to decide.
#[derive(Debug, Default)]
pub struct CountingSignal {
    count: AtomicUsize,
}

impl CountingSignal {
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Add one token.
    pub fn post(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Add `n` tokens.
    pub fn post_n(&self, n: usize) {
        if n > 0 {
            self.count.fetch_add(n, Ordering::AcqRel);
        }
    }

    /// Take one token if any is available.
    pub fn try_wait(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .is_ok()
    }

    pub fn pending(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Overwrite the count. Used at Start to seed transmit capacity.
    pub fn set(&self, n: usize) {
        self.count.store(n, Ordering::Release);
    }

    pub fn reset(&self) {
        self.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_and_take() {
        let sig = CountingSignal::new();
        assert!(!sig.try_wait());
        sig.post();
        sig.post_n(2);
        assert_eq!(sig.pending(), 3);
        assert!(sig.try_wait());
        assert!(sig.try_wait());
        assert!(sig.try_wait());
        assert!(!sig.try_wait());
        assert_eq!(sig.pending(), 0);
    }

    #[test]
    fn test_set_and_reset() {
        let sig = CountingSignal::new();
        sig.set(4);
        assert_eq!(sig.pending(), 4);
        sig.reset();
        assert!(!sig.try_wait());
    }
}
