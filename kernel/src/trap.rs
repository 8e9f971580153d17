//! Trap dispatch (spec §4.8): decode `scause`, route to the syscall table,
//! the page-fault handler, or the PLIC's external-interrupt path, and fail
//! loudly on anything else.
//!
//! Grounded on `original_source/excp.c`'s `umode_excp_handler` (the
//! `ECALL_FROM_UMODE` / `STORE_PAGE_FAULT` / default-panic three-way split)
//! and the teacher's `arch::riscv::context::RiscVContext` register-file
//! shape. Like [`crate::sched`] and `process::exec`/`fork`, the low-level
//! trap-vector assembly that lands a real CPU trap here (`stvec`, register
//! save/restore, `sret`) is external bootstrap plumbing this teaching kernel
//! doesn't build — `main.rs` already documents `kernel_main` as "entered
//! from `arch::riscv64::entry` once the boot hart has set up a stack" for
//! the same reason. What lives here is the part the spec actually
//! describes: `scause`/`stval` decode against an already-populated trap
//! frame, fully exercisable on the host test backend.

use crate::drivers::{plic, virtio};
use crate::mm;
use crate::process;
use crate::syscall;

/// RISC-V integer register indices within [`TrapFrame::x`] (ABI names per
/// the calling convention; `x0` is hardwired zero and never written back).
mod reg {
    pub const RA: usize = 1;
    pub const SP: usize = 2;
    pub const A0: usize = 10;
}

/// A saved RISC-V integer register file plus the two supervisor CSRs the
/// trap entry must preserve across dispatch (spec glossary: "Trap frame").
/// `#[repr(C)]` so a real trap-entry assembly stub could address fields by
/// fixed byte offset (`x[n]` at `8*n`, `sepc` at `8*32`, `sstatus` at
/// `8*33`) — grounded on the teacher's `RiscVContext`, shrunk to the
/// registers this kernel's syscall ABI and exception handling actually
/// touch (no FPU state: spec's ELF loader and syscalls are all integer).
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapFrame {
    x: [u64; 32],
    pub sepc: u64,
    pub sstatus: u64,
}

impl TrapFrame {
    pub const fn new() -> Self {
        Self {
            x: [0; 32],
            sepc: 0,
            sstatus: 0,
        }
    }

    /// Read register `xN`. `x0` always reads as 0.
    pub fn reg(&self, n: usize) -> u64 {
        self.x[n]
    }

    /// Write register `xN`; writes to `x0` are silently dropped, matching
    /// the hardware register's hardwired-zero behavior.
    pub fn set_reg(&mut self, n: usize, value: u64) {
        if n != 0 {
            self.x[n] = value;
        }
    }

    pub fn ra(&self) -> u64 {
        self.x[reg::RA]
    }

    pub fn sp(&self) -> u64 {
        self.x[reg::SP]
    }

    pub fn set_sp(&mut self, value: u64) {
        self.x[reg::SP] = value;
    }

    /// Syscall argument `n` (0..=2), per the spec §4.8 ABI: "arguments in
    /// `a0`-`a2`".
    pub fn arg(&self, n: usize) -> u64 {
        self.x[reg::A0 + n]
    }

    /// The syscall number, read from `a7` (spec §4.8 ABI: "number in `a7`").
    pub fn syscall_number(&self) -> u64 {
        self.x[reg::A0 + 7]
    }

    /// Write the syscall return value into `a0` (spec §4.8 ABI: "return in
    /// `a0`"). Negative [`crate::error::IoError::code`] values round-trip
    /// through the same two's-complement bit pattern the hardware ABI uses.
    pub fn set_return(&mut self, value: isize) {
        self.x[reg::A0] = value as i64 as u64;
    }

    /// Advance past the `ecall` instruction (spec §4.8: "`sepc += 4` before
    /// dispatch", since `ecall` does not itself advance the pc and retrying
    /// it on return would re-trap forever).
    pub fn advance_pc(&mut self) {
        self.sepc = self.sepc.wrapping_add(4);
    }
}

impl Default for TrapFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// `scause` exception codes this kernel distinguishes (spec §4.8; names
/// follow `original_source/excp.c`'s `RISCV_SCAUSE_*` constants).
pub mod exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u64 = 0;
    pub const ILLEGAL_INSTRUCTION: u64 = 2;
    pub const BREAKPOINT: u64 = 3;
    pub const LOAD_PAGE_FAULT: u64 = 13;
    pub const STORE_PAGE_FAULT: u64 = 15;
    pub const ECALL_FROM_U: u64 = 8;
}

/// `scause` interrupt codes (top bit set).
const SCAUSE_INTERRUPT_BIT: u64 = 1 << 63;
const INTERRUPT_SUPERVISOR_EXTERNAL: u64 = 9;

/// Human-readable name for an exception code, for the panic path (spec
/// §4.8 "other"; grounded on `excp.c`'s `excp_names[]` lookup table — unlike
/// the source, an unknown code here gets a generic label instead of
/// indexing out of bounds).
fn exception_name(code: u64) -> &'static str {
    match code {
        exception::INSTRUCTION_ADDRESS_MISALIGNED => "instruction address misaligned",
        1 => "instruction access fault",
        exception::ILLEGAL_INSTRUCTION => "illegal instruction",
        exception::BREAKPOINT => "breakpoint",
        4 => "load address misaligned",
        5 => "load access fault",
        6 => "store/AMO address misaligned",
        7 => "store/AMO access fault",
        exception::ECALL_FROM_U => "ecall from U-mode",
        9 => "ecall from S-mode",
        12 => "instruction page fault",
        exception::LOAD_PAGE_FAULT => "load page fault",
        exception::STORE_PAGE_FAULT => "store/AMO page fault",
        _ => "unknown exception",
    }
}

/// What the trap entry should do once dispatch returns (spec §4.8's three
/// outcomes: resume the trapping instruction's successor, tear the process
/// down, or jump into a freshly `exec`'d image). Named `EnterUser` to match
/// the outcome [`crate::process::exec`] documents itself as deferring to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Resume `pid` at `tf.sepc` (already advanced for syscalls).
    Resume,
    /// `pid` has exited; nothing of it remains to resume.
    Exit,
    /// Jump to a newly loaded image instead of returning to the trapping
    /// instruction (spec §4.9 `exec`: never returns to the caller's old
    /// image on success).
    EnterUser { entry: u64, stack: u64 },
}

/// Top-level trap dispatch: split `scause` into the interrupt and exception
/// paths (spec §4.8).
pub fn dispatch(scause: u64, stval: u64, tf: &mut TrapFrame, pid: u64) -> Outcome {
    if scause & SCAUSE_INTERRUPT_BIT != 0 {
        dispatch_interrupt(scause & !SCAUSE_INTERRUPT_BIT);
        Outcome::Resume
    } else {
        dispatch_exception(scause, stval, tf, pid)
    }
}

/// External-interrupt path: claim the pending source from the PLIC, route
/// it to the owning driver's ISR, and signal completion (spec §4.4/§4.5).
/// A `claim()` of 0 means nothing was pending (spurious wakeup); nothing to
/// route.
fn dispatch_interrupt(code: u64) {
    if code != INTERRUPT_SUPERVISOR_EXTERNAL {
        return;
    }
    let irq = plic::claim();
    if irq != 0 {
        virtio::blk::isr(irq);
        plic::close(irq);
    }
}

/// Exception path (spec §4.8): `ecall` from U-mode dispatches to the
/// syscall table, a store page fault demand-pages the faulting address, and
/// everything else is fatal.
fn dispatch_exception(code: u64, stval: u64, tf: &mut TrapFrame, pid: u64) -> Outcome {
    match code {
        exception::ECALL_FROM_U => {
            tf.advance_pc();
            syscall::dispatch(tf, pid)
        }
        exception::STORE_PAGE_FAULT => {
            let mtag = process::mtag_of(pid).expect("trap for a process not in the table");
            mm::handle_page_fault(mtag, stval as usize);
            Outcome::Resume
        }
        other => {
            crate::println!(
                "[TRAP] {} at sepc={:#x} stval={:#x}",
                exception_name(other),
                tf.sepc,
                stval
            );
            panic!("unhandled exception {other} ({})", exception_name(other));
        }
    }
}
