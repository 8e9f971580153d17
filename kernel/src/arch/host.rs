//! Host stand-in for [`super::riscv64`] so `cargo test` can exercise
//! `sync`/`process` control flow on a normal target triple, mirroring the
//! teacher's `lib.rs` host/bare-metal split.

pub fn init() {}

pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

pub fn enable_interrupts() {}

#[must_use]
pub fn disable_interrupts() -> usize {
    0
}

pub fn restore_interrupts(_flags: usize) {}

pub fn read_satp() -> usize {
    0
}

/// # Safety
/// No-op on the host backend; always safe to call.
pub unsafe fn write_satp(_mtag: usize) {}
