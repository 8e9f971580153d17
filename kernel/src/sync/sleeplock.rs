//! Sleep-lock (spec §4.3): mutual exclusion that yields the running task
//! instead of spinning on CPU while the holder is busy. Safe to hold across
//! I/O that itself blocks on a [`Condition`].

use core::sync::atomic::{AtomicI64, Ordering};

use super::Condition;
use crate::arch;
use crate::sched;

const FREE: i64 = -1;

/// `(cond, owner_tid)` pair; `owner == FREE` means unheld.
pub struct SleepLock {
    cond: Condition,
    owner: AtomicI64,
}

/// Held while `owner == running task`; `release` panics (structural
/// violation, spec §7) if called by anyone else.
pub struct SleepLockGuard<'a> {
    lock: &'a SleepLock,
}

impl SleepLock {
    pub const fn new() -> Self {
        Self {
            cond: Condition::new(),
            owner: AtomicI64::new(FREE),
        }
    }

    /// Acquire the lock, blocking (via the wait condition, not CPU spin)
    /// while another task holds it.
    pub fn acquire(&self) -> SleepLockGuard<'_> {
        let me = sched::current_task_id() as i64;
        loop {
            let flags = arch::disable_interrupts();
            let acquired = self
                .owner
                .compare_exchange(FREE, me, Ordering::Acquire, Ordering::Relaxed)
                .is_ok();
            arch::restore_interrupts(flags);

            if acquired {
                return SleepLockGuard { lock: self };
            }
            self.cond.wait();
        }
    }

    fn release(&self) {
        let me = sched::current_task_id() as i64;
        let prev = self.owner.swap(FREE, Ordering::Release);
        assert_eq!(prev, me, "sleeplock released by non-owner: structural violation");
        self.cond.broadcast();
    }

    /// Whether the lock is currently held by anyone (diagnostics/tests).
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Acquire) != FREE
    }
}

impl Default for SleepLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SleepLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    #[test]
    fn acquire_release_round_trip() {
        let lock = SleepLock::new();
        assert!(!lock.is_locked());
        {
            let _g = lock.acquire();
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn second_acquirer_blocks_until_release() {
        let lock = Arc::new(SleepLock::new());
        let g = lock.acquire();

        let lock2 = lock.clone();
        let handle = std::thread::spawn(move || {
            sched::set_current_task_id(99);
            let _g = lock2.acquire();
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(lock.is_locked());

        drop(g);
        handle.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "non-owner")]
    fn release_by_non_owner_panics() {
        let lock = SleepLock::new();
        let g = lock.acquire();
        sched::set_current_task_id(sched::current_task_id() + 1);
        drop(g);
    }
}
