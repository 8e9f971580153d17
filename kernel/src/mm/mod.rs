//! Sv39 memory management: the physical page free list and the page-table
//! manager, plus the kernel/user memory layout constants they share.
//!
//! Grounded on the teacher's `mm` module layout (`frame_allocator`, `vas`),
//! reworked to the much smaller shape spec §4.1/4.2 actually call for: an
//! intrusive free-list allocator (no bitmap/buddy hybrid, no NUMA) and a
//! page-table manager operating directly on Sv39 PTEs rather than the
//! teacher's x86_64-flavoured `VirtualAddressSpace`.

pub mod frame_allocator;
pub mod page_table;

pub use frame_allocator::{alloc_page, free_page, free_frames, init_pool, total_frames, Frame};
pub use page_table::{
    alloc_and_map_page, alloc_and_map_range, handle_page_fault, kernel_mtag, set_page_flags,
    set_range_flags, space_clone, space_reclaim, translate, unmap_and_free_user, Mtag, PageFlags,
    SV39_MODE,
};

/// Frame / page size in bytes (spec §3 "physical page").
pub const PAGE_SIZE: usize = 4096;

/// Base physical address of RAM on the QEMU `virt` machine this kernel
/// targets (spec §6 memory layout: `[RAM_START, _kimg_end)` is the kernel
/// image).
pub const RAM_START: usize = 0x8000_0000;

/// Total RAM modeled for this teaching kernel (128 MiB), giving
/// `RAM_END = RAM_START + RAM_SIZE`.
pub const RAM_SIZE: usize = 128 * 1024 * 1024;
pub const RAM_END: usize = RAM_START + RAM_SIZE;

/// Start of the per-process user range. Matches the original kernel's
/// `USER_VMA_START`/`USER_START_VMA` (spec §9: follow the source when the
/// spec itself leaves a constant unspecified).
pub const USER_START_VMA: usize = 0xC000_0000;

/// End (exclusive) of the per-process user range — 256 MiB, matching the
/// original kernel's `USER_VMA_END`.
pub const USER_END_VMA: usize = 0xD000_0000;

/// One megapage (level-1 Sv39 leaf span).
pub const MEGA_SIZE: usize = 2 * 1024 * 1024;

/// One gigapage (level-2 Sv39 leaf span).
pub const GIGA_SIZE: usize = 1024 * 1024 * 1024;

/// Round `addr` down to the nearest page boundary.
pub const fn round_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

/// Round `size` up to the nearest multiple of `align`.
pub const fn round_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Number of pages needed to cover `size` bytes.
pub const fn page_count(size: usize) -> usize {
    round_up(size, PAGE_SIZE) / PAGE_SIZE
}

/// Bring up the physical page allocator and the kernel half of the
/// identity-mapped address space. Called once from `main::kernel_main`.
pub fn init() {
    frame_allocator::init();
    page_table::init_kernel_space();
}
