//! Bare-metal riscv64 Sv39 backend. Grounded on the teacher's
//! `arch/riscv64/mod.rs` (`init`/`halt`/`enable_interrupts`/
//! `disable_interrupts`) and `arch/riscv/sbi.rs`, reworked so
//! `disable_interrupts`/`restore_interrupts` are a flags pair rather than
//! an RAII guard — [`crate::sync::condition::Condition::wait`] and the
//! sleep-lock need to re-enable interrupts from a different point in the
//! control flow than where they were disabled.

use core::arch::asm;

const SSTATUS_SIE: usize = 1 << 1;

pub fn init() {
    enable_interrupts();
}

pub fn halt() -> ! {
    loop {
        // SAFETY: `wfi` halts the hart until the next interrupt; valid at
        // any point in S-mode.
        unsafe { asm!("wfi") };
    }
}

pub fn enable_interrupts() {
    // SAFETY: `csrsi sstatus, 2` only sets SIE; no other preconditions.
    unsafe { asm!("csrsi sstatus, 0b10") };
}

/// Disable interrupts, returning the prior `sstatus` SIE bit so the caller
/// can restore it later via [`restore_interrupts`].
#[must_use]
pub fn disable_interrupts() -> usize {
    let mut sstatus: usize;
    // SAFETY: reads and clears only the SIE bit of sstatus.
    unsafe {
        asm!("csrr {0}, sstatus", out(reg) sstatus);
        asm!("csrci sstatus, 0b10");
    }
    sstatus & SSTATUS_SIE
}

/// Restore the SIE bit captured by a prior [`disable_interrupts`] call.
pub fn restore_interrupts(flags: usize) {
    if flags & SSTATUS_SIE != 0 {
        // SAFETY: sets only the SIE bit.
        unsafe { asm!("csrsi sstatus, 0b10") };
    }
}

/// Read the `satp` CSR (current address-space tag, spec §4.2's `mtag`).
pub fn read_satp() -> usize {
    let satp: usize;
    // SAFETY: reading satp has no side effects.
    unsafe { asm!("csrr {0}, satp", out(reg) satp) };
    satp
}

/// Install `mtag` into `satp` and flush the TLB. Used by `mm` when
/// switching address spaces and by process exec/fork.
///
/// # Safety
/// `mtag` must encode a well-formed Sv39 root page table that stays valid
/// for as long as it remains installed; callers must not dereference
/// pointers through it if the previous mapping made them accessible only
/// via a mapping this call removes.
pub unsafe fn write_satp(mtag: usize) {
    // SAFETY: forwarded from the caller's obligation above.
    unsafe {
        asm!("csrw satp, {0}", in(reg) mtag);
        asm!("sfence.vma zero, zero");
    }
}
