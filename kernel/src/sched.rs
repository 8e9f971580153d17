//! Minimal task/run-queue stand-in.
//!
//! The real thread scheduler and timer are external collaborators (spec
//! §1); this module is the small surface the core actually suspends on:
//! "what task is running" and "block until interrupts say otherwise". It
//! is deliberately thin — just enough to make [`crate::sync::condition`],
//! the sleep-lock, and `fork`/`wait` exercise real control flow — grounded
//! on the teacher's `sched::{Task, Priority}` naming without reimplementing
//! its full run-queue/priority machinery, which is out of this core's scope.

use core::sync::atomic::{AtomicU64, Ordering};

/// Opaque task identity. `0` is the boot/idle task.
pub type TaskId = u64;

static CURRENT_TASK: AtomicU64 = AtomicU64::new(0);
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Initialize the scheduler stand-in. Called once at boot.
pub fn init() {
    CURRENT_TASK.store(0, Ordering::Release);
}

/// The identity of the task currently executing on this hart.
pub fn current_task_id() -> TaskId {
    CURRENT_TASK.load(Ordering::Acquire)
}

/// Allocate a fresh task id (used by `process::fork`/`process::procmgr_init`
/// to mint an identity for a newly created thread of execution).
pub fn alloc_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Install `tid` as the task running on this hart. A real context switch
/// would call this as part of restoring the new task's register file; here
/// it exists so single-hart cooperative tests can simulate a switch.
pub fn set_current_task_id(tid: TaskId) {
    CURRENT_TASK.store(tid, Ordering::Release);
}

/// Yield the hart until an interrupt (or, on the host test backend, the OS
/// scheduler) gives another task a chance to run. Used by
/// [`crate::sync::condition::Condition::wait`] and the sleep-lock's acquire
/// spin. On bare metal this executes `wfi`; external interrupt delivery
/// (the PLIC ISR path) is what actually wakes the hart.
#[inline]
pub fn wait_for_wakeup_signal() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    // SAFETY: `wfi` merely halts the hart until the next interrupt; it has
    // no preconditions beyond being valid S-mode code, which we are.
    unsafe {
        core::arch::asm!("wfi");
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        core::hint::spin_loop();
        #[cfg(not(target_os = "none"))]
        std::thread::yield_now();
    }
}

/// Enter the scheduler's main loop. Never returns on real hardware; the
/// stand-in here just parks the boot hart.
pub fn run() -> ! {
    loop {
        wait_for_wakeup_signal();
    }
}
