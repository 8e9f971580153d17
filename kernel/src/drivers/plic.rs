//! Platform-Level Interrupt Controller driver (spec §4.4): per-source
//! priority, per-context enable/threshold, and claim/complete, all reached
//! through register-offset arithmetic over a single MMIO window.
//!
//! Grounded on the teacher's `irq::IrqController` trait shape (`enable`/
//! `disable`/`set_priority`/`is_pending` returning [`KernelResult`]), but
//! the register layout itself is RISC-V PLIC-specific (spec §4.4), not the
//! teacher's APIC/GIC abstraction. Like [`crate::mm::frame_allocator`], the
//! register window is accessed purely through raw volatile pointer
//! arithmetic so the same code path runs in tests against a leaked host
//! buffer standing in for the MMIO region — no `cfg`-gated register access
//! split is needed here.

use core::ptr;

use crate::sync::GlobalState;

/// Number of interrupt sources this kernel's PLIC instance exposes (spec
/// leaves the exact count to the platform; QEMU's `virt` machine wires up
/// far fewer than the PLIC's architectural maximum of 1023, and this
/// teaching kernel only ever needs the virtio-blk line).
pub const PLIC_SRCCNT: u32 = 32;

/// The `(hart, privilege-mode)` context this kernel runs interrupts in
/// (spec glossary: "PLIC context"). QEMU's `virt` machine wires hart 0's
/// S-mode context to context index 1 (context 0 is hart 0 M-mode).
pub const SUPERVISOR_CONTEXT: u32 = 1;

/// QEMU `virt` machine's PLIC MMIO base.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub const PLIC_IOBASE: usize = 0x0c00_0000;

mod offsets {
    pub const PRIORITY: usize = 0x0000;
    pub const PENDING: usize = 0x1000;
    pub const ENABLE: usize = 0x2000;
    pub const ENABLE_CTX_STRIDE: usize = 0x80;
    pub const THRESHOLD: usize = 0x20_0000;
    pub const CLAIM: usize = 0x20_0004;
    pub const CTX_STRIDE: usize = 0x1000;
}

/// Priority register offset for source `srcno` (spec §4.4: "Priority:
/// `4 * srcno`").
fn priority_offset(srcno: u32) -> usize {
    offsets::PRIORITY + 4 * srcno as usize
}

/// `(byte offset, bit index)` of the pending bit for `srcno` (spec §4.4).
fn pending_bit(srcno: u32) -> (usize, u32) {
    (offsets::PENDING + 4 * (srcno / 32) as usize, srcno % 32)
}

/// `(byte offset, bit index)` of the enable bit for `(ctx, src)` (spec
/// §4.4: "Enable bit ... bit `src % 32` at offset `0x2000 + ctx*0x80 +
/// 4*(src/32)`").
fn enable_bit(ctx: u32, src: u32) -> (usize, u32) {
    (
        offsets::ENABLE + ctx as usize * offsets::ENABLE_CTX_STRIDE + 4 * (src / 32) as usize,
        src % 32,
    )
}

fn threshold_offset(ctx: u32) -> usize {
    offsets::THRESHOLD + ctx as usize * offsets::CTX_STRIDE
}

fn claim_offset(ctx: u32) -> usize {
    offsets::CLAIM + ctx as usize * offsets::CTX_STRIDE
}

/// A PLIC register window. Every accessor is raw volatile pointer
/// arithmetic over `iobase`; the struct carries no other state, matching
/// the spec's framing of the PLIC as "memory-mapped register math."
#[derive(Clone, Copy)]
struct Plic {
    iobase: usize,
}

impl Plic {
    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: `offset` is one of the layout constants above, all within
        // the PLIC's mapped MMIO window (or, on the host test backend, a
        // leaked buffer of matching size — see `tests::fake_plic`).
        unsafe { ptr::read_volatile((self.iobase + offset) as *const u32) }
    }

    fn write32(&self, offset: usize, value: u32) {
        // SAFETY: see read32.
        unsafe { ptr::write_volatile((self.iobase + offset) as *mut u32, value) }
    }

    fn set_priority(&self, srcno: u32, priority: u32) {
        self.write32(priority_offset(srcno), priority);
    }

    fn set_enabled(&self, ctx: u32, srcno: u32, enabled: bool) {
        let (offset, bit) = enable_bit(ctx, srcno);
        let mut word = self.read32(offset);
        if enabled {
            word |= 1 << bit;
        } else {
            word &= !(1 << bit);
        }
        self.write32(offset, word);
    }

    fn is_pending(&self, srcno: u32) -> bool {
        let (offset, bit) = pending_bit(srcno);
        self.read32(offset) & (1 << bit) != 0
    }

    fn set_threshold(&self, ctx: u32, threshold: u32) {
        self.write32(threshold_offset(ctx), threshold);
    }

    fn claim(&self, ctx: u32) -> u32 {
        self.read32(claim_offset(ctx))
    }

    fn complete(&self, ctx: u32, srcno: u32) {
        self.write32(claim_offset(ctx), srcno);
    }
}

static PLIC: GlobalState<Plic> = GlobalState::new();

fn plic() -> Plic {
    PLIC.with(|p| *p).expect("PLIC not initialized")
}

/// Bring up the PLIC (spec §4.4): priority 0 for every source, and every
/// source enabled for the supervisor context (individual drivers still gate
/// delivery with their own priority via [`enable_irq`]).
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn init() {
    init_at(PLIC_IOBASE);
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn init() {}

fn init_at(iobase: usize) {
    let plic = Plic { iobase };
    for src in 0..PLIC_SRCCNT {
        plic.set_priority(src, 0);
        plic.set_enabled(SUPERVISOR_CONTEXT, src, true);
    }
    plic.set_threshold(SUPERVISOR_CONTEXT, 0);
    let _ = PLIC.init(plic);
}

/// Raise `irq`'s priority so it can interrupt the supervisor context (spec
/// §4.4: `enable_irq(irq, prio)` sets the source priority).
pub fn enable_irq(irq: u32, priority: u32) {
    plic().set_priority(irq, priority);
}

/// Silence `irq` by dropping its priority to 0 (spec §4.4).
pub fn disable_irq(irq: u32) {
    plic().set_priority(irq, 0);
}

/// Whether `irq` is currently asserted and not yet claimed (diagnostics;
/// also used by tests to check `init`'s enable-bit fan-out).
pub fn is_pending(irq: u32) -> bool {
    plic().is_pending(irq)
}

/// Claim the next pending interrupt for the supervisor context, returning
/// its source number (0 if none pending) (spec §4.4).
pub fn claim() -> u32 {
    plic().claim(SUPERVISOR_CONTEXT)
}

/// Signal completion of `irq` back to the PLIC (spec §4.4: `close(irq)`
/// writes back the source number).
pub fn close(irq: u32) {
    plic().complete(SUPERVISOR_CONTEXT, irq);
}
