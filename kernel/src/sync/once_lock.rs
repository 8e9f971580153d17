//! Safe global singleton initialization.
//!
//! Ports the teacher's `sync::once_lock::GlobalState<T>` (`spin::Mutex`
//! around an `Option<T>`) used throughout this kernel for the free page
//! list, the PLIC, the mounted filesystem, and the process table — the
//! "one owning context passed by reference" that spec §9's design notes
//! call for, minus the raw-pointer `OnceLock<T>` variant the teacher also
//! provides (not needed here: every singleton in this kernel is mutated
//! after init, so `GlobalState` is the only shape this port needs).

use spin::{Mutex, MutexGuard};

/// Global state that starts uninitialized and is set exactly once.
pub struct GlobalState<T> {
    inner: Mutex<Option<T>>,
}

impl<T> GlobalState<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Initialize the global state. Fails if already initialized.
    pub fn init(&self, value: T) -> Result<(), T> {
        let mut lock = self.inner.lock();
        if lock.is_some() {
            Err(value)
        } else {
            *lock = Some(value);
            Ok(())
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }

    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> Option<R> {
        let lock = self.inner.lock();
        lock.as_ref().map(f)
    }

    pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> Option<R> {
        let mut lock = self.inner.lock();
        lock.as_mut().map(f)
    }

    /// Lock and return the guard directly, for call sites that need to hold
    /// the lock across several operations (e.g. the filesystem's
    /// read/write, which must serialize on the FS lock per spec §4.6).
    pub fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.inner.lock()
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_once_then_rejects() {
        let g: GlobalState<u32> = GlobalState::new();
        assert!(!g.is_initialized());
        assert!(g.init(7).is_ok());
        assert!(g.is_initialized());
        assert_eq!(g.init(8), Err(8));
        assert_eq!(g.with(|v| *v), Some(7));
    }

    #[test]
    fn with_mut_updates_in_place() {
        let g: GlobalState<u32> = GlobalState::new();
        g.init(1).unwrap();
        g.with_mut(|v| *v += 41);
        assert_eq!(g.with(|v| *v), Some(42));
    }
}
