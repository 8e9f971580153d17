//! sv39-teach kernel library
//!
//! A small RISC-V (Sv39, supervisor mode) teaching kernel: paged virtual
//! memory, user-mode ELF64 process execution, a block-backed filesystem,
//! a virtio-mmio block driver, a PLIC driver, and the trap/syscall
//! dispatcher that wires them together.

#![no_std]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare-metal target: a bump-free linked-list heap, as the teacher uses.
#[cfg(all(feature = "alloc", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(feature = "alloc", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

// Host target (cargo test): delegate to the system allocator so `alloc`
// collections work without a bare-metal heap.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(all(feature = "alloc", not(target_os = "none")))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;
#[macro_use]
pub mod klog;

pub mod arch;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod io;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod trap;

pub use error::{KernelError, KernelResult};
