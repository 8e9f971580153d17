//! Sv39 page-table manager (spec §4.2): three-level page tables, mapping,
//! flag updates, user-range reclaim, demand paging, and address-space
//! cloning.
//!
//! Grounded on the teacher's `mm/page_table.rs` (`PageTable`/`PageTableEntry`
//! shape, `PAGE_TABLE_ENTRIES = 512`) reworked from its x86_64 4-level/PML4
//! flavour down to Sv39's 3-level `VPN2/VPN1/VPN0` walk, and on
//! `mm/vas.rs::clone_from` for the deep-copy-on-clone approach (allocate a
//! fresh frame per user page, copy 4 KiB, map with the source's flags).
//!
//! Unlike the teacher's `VirtualAddressSpace`, which reads the *active* CR3
//! implicitly, every operation here takes an explicit [`Mtag`] naming the
//! address space to mutate. This keeps the module host-testable (no CSR
//! access needed) and mirrors how `process` already has to carry the tag
//! around to install it via `arch::write_satp` at context-switch time.

use bitflags::bitflags;

use super::frame_allocator::{self, Frame};
use super::{page_count, round_down, round_up, MEGA_SIZE, PAGE_SIZE, RAM_END, RAM_START};
use crate::sync::GlobalState;

/// Sv39 `satp` mode field value (spec glossary: "mtag").
pub const SV39_MODE: u64 = 8;

bitflags! {
    /// Leaf PTE permission/ownership bits a caller requests (spec §3:
    /// "8 flag bits V, R, W, X, U, G, A, D"). `V`/`A`/`D` are added
    /// automatically by the mapping/flag-setting calls, matching spec
    /// §4.2's "installs a leaf PTE with `rwxug | A | D | V`".
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

const PPN_SHIFT: u32 = 10;
const PPN_BITS: u64 = 44;
const PPN_MASK: u64 = (1u64 << PPN_BITS) - 1;

/// A single Sv39 page-table entry.
#[repr(transparent)]
#[derive(Clone, Copy)]
struct Pte(u64);

impl Pte {
    const fn empty() -> Self {
        Self(0)
    }

    fn is_valid(self) -> bool {
        self.0 & PageFlags::V.bits() != 0
    }

    /// A valid PTE with any of R/W/X set is a leaf; otherwise it points at
    /// the next-level table (spec §3: "non-leaf PTEs carry only the
    /// next-level table's PPN plus V").
    fn is_leaf(self) -> bool {
        self.is_valid() && self.0 & (PageFlags::R | PageFlags::W | PageFlags::X).bits() != 0
    }

    fn ppn(self) -> u64 {
        (self.0 >> PPN_SHIFT) & PPN_MASK
    }

    fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & 0xFF)
    }

    fn set_leaf(&mut self, ppn: u64, flags: PageFlags) {
        let flags = flags | PageFlags::V | PageFlags::A | PageFlags::D;
        self.0 = ((ppn & PPN_MASK) << PPN_SHIFT) | flags.bits();
    }

    fn set_branch(&mut self, ppn: u64, global: bool) {
        let mut flags = PageFlags::V;
        if global {
            flags |= PageFlags::G;
        }
        self.0 = ((ppn & PPN_MASK) << PPN_SHIFT) | flags.bits();
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

/// One level of the Sv39 page-table hierarchy: 512 entries indexed by a
/// 9-bit VPN field (spec §9: "a fixed-size array of 512 PTEs").
#[repr(C, align(4096))]
struct PageTable {
    entries: [Pte; 512],
}

impl core::ops::Index<usize> for PageTable {
    type Output = Pte;
    fn index(&self, i: usize) -> &Pte {
        &self.entries[i]
    }
}

impl core::ops::IndexMut<usize> for PageTable {
    fn index_mut(&mut self, i: usize) -> &mut Pte {
        &mut self.entries[i]
    }
}

/// Extract the 9-bit VPN field for `level` (2 = VPN2, 1 = VPN1, 0 = VPN0).
fn vpn(vaddr: usize, level: u32) -> usize {
    (vaddr >> (12 + 9 * level)) & 0x1FF
}

/// Packed Sv39 `satp` value: `mode | asid | root_ppn` (spec glossary: mtag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mtag(u64);

impl Mtag {
    pub const fn from_parts(mode: u64, asid: u16, root_ppn: u64) -> Self {
        Self(((mode & 0xF) << 60) | (((asid as u64) & 0xFFFF) << 44) | (root_ppn & PPN_MASK))
    }

    pub const fn from_satp(satp: u64) -> Self {
        Self(satp)
    }

    pub const fn satp(self) -> u64 {
        self.0
    }

    pub const fn root_ppn(self) -> u64 {
        self.0 & PPN_MASK
    }

    pub const fn asid(self) -> u16 {
        ((self.0 >> 44) & 0xFFFF) as u16
    }

    fn root_ptr(self) -> *mut PageTable {
        ((self.root_ppn() << 12) as usize) as *mut PageTable
    }
}

/// The kernel's master address-space tag, installed by [`init_kernel_space`]
/// and restored by [`space_reclaim`] on process exit.
static KERNEL_MTAG: GlobalState<Mtag> = GlobalState::new();

/// The kernel master tag. Every process's clone shares this half of its
/// page table (spec §3: "virtual addresses below the user range are
/// identity-mapped ... and also the only range that differs per process").
pub fn kernel_mtag() -> Mtag {
    // On the host test backend `init_kernel_space` is never called (there is
    // no real RAM/kernel-image layout to map); fall back to a placeholder
    // tag so process-level tests that call `space_reclaim` don't need a
    // real Sv39 environment.
    KERNEL_MTAG
        .with(|t| *t)
        .unwrap_or(Mtag::from_parts(SV39_MODE, 0, 0))
}

/// Allocate one frame, zero it, and return its physical base address.
fn alloc_zeroed_frame() -> usize {
    let frame = frame_allocator::alloc_page();
    let addr = frame.addr();
    // The frame is now owned by the page-table tree (a branch node or a
    // leaf's backing page), not by this `Frame` handle; `unmap_and_free_user`
    // and `space_clone`'s error paths are responsible for returning it.
    core::mem::forget(frame);
    // SAFETY: `addr` was just removed from the free list, so it is not
    // reachable from any page table yet; writing zero is in-bounds.
    unsafe { core::ptr::write_bytes(addr as *mut u8, 0, PAGE_SIZE) };
    addr
}

/// Walk from `root` to the level-0 PTE for `vaddr`, allocating any missing
/// intermediate tables (spec §4.2: "missing intermediate tables are
/// allocated ... and installed as non-leaf PTEs with V set").
///
/// # Safety
/// `root` must point to a valid, currently-installed Sv39 root page table.
unsafe fn walk_create(root: *mut PageTable, vaddr: usize, global: bool) -> *mut Pte {
    let mut table = root;
    for level in [2u32, 1u32] {
        let idx = vpn(vaddr, level);
        // SAFETY: `table` is valid per the caller's contract (root) or was
        // just derived from a freshly-allocated, zeroed frame (below).
        let pte = unsafe { &mut (*table)[idx] };
        if !pte.is_valid() {
            let addr = alloc_zeroed_frame();
            pte.set_branch((addr >> 12) as u64, global);
        }
        table = ((pte.ppn() << 12) as usize) as *mut PageTable;
    }
    let idx0 = vpn(vaddr, 0);
    // SAFETY: `table` now points at the level-0 table reached above.
    unsafe { &mut (*table)[idx0] as *mut Pte }
}

/// Walk from `root` to the level-0 PTE for `vaddr` without creating missing
/// tables. Returns `None` as soon as an intermediate PTE is invalid (spec
/// §4.2: "if any intermediate is invalid, the call is a no-op for that
/// page").
///
/// # Safety
/// `root` must point to a valid, currently-installed Sv39 root page table.
unsafe fn walk_lookup(root: *mut PageTable, vaddr: usize) -> Option<*mut Pte> {
    let mut table = root;
    for level in [2u32, 1u32] {
        let idx = vpn(vaddr, level);
        // SAFETY: see walk_create.
        let pte = unsafe { &(*table)[idx] };
        if !pte.is_valid() {
            return None;
        }
        table = ((pte.ppn() << 12) as usize) as *mut PageTable;
    }
    let idx0 = vpn(vaddr, 0);
    // SAFETY: table is the level-0 table reached above.
    Some(unsafe { &mut (*table)[idx0] as *mut Pte })
}

/// Identity-map one page: the leaf's PPN equals `addr`'s own page number,
/// rather than a freshly allocated frame. Used only to build the kernel's
/// half of the address space (MMIO window, kernel image, free-page pool),
/// all of which this kernel accesses through a 1:1 virtual/physical window.
fn identity_map_page(root: *mut PageTable, addr: usize, flags: PageFlags) {
    // SAFETY: `root` is the kernel root table, valid for the duration of
    // kernel-space bring-up.
    let pte = unsafe { walk_create(root, addr, flags.contains(PageFlags::G)) };
    let ppn = (addr >> 12) as u64;
    // SAFETY: `pte` was just returned by `walk_create` on the same root.
    unsafe { (*pte).set_leaf(ppn, flags) };
}

fn identity_map_range(root: *mut PageTable, start: usize, end: usize, flags: PageFlags) {
    let start = round_down(start, PAGE_SIZE);
    let end = round_up(end, PAGE_SIZE);
    let mut addr = start;
    while addr < end {
        identity_map_page(root, addr, flags);
        addr += PAGE_SIZE;
    }
}

/// Bring up the kernel half of the address space (spec §6 memory layout):
/// identity-mapped MMIO below `RAM_START`, the kernel image with per-section
/// RX/R/RW, and the remaining RAM backing the free-page pool. All kernel
/// mappings carry the `G` (global) bit so they survive a `satp` switch.
///
/// A no-op on the host test backend, matching `frame_allocator::init`: there
/// is no real RAM/kernel-image layout to identity-map there, and tests build
/// their own address spaces directly against [`alloc_and_map_page`] et al.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn init_kernel_space() {
    let root_addr = alloc_zeroed_frame();
    let root = root_addr as *mut PageTable;

    identity_map_range(root, 0, RAM_START, PageFlags::R | PageFlags::W | PageFlags::G);

    extern "C" {
        static _text_start: u8;
        static _text_end: u8;
        static _rodata_start: u8;
        static _rodata_end: u8;
        static _data_start: u8;
        static _kimg_end: u8;
    }
    // SAFETY: these are linker-provided section boundary symbols; only
    // their addresses are read.
    let (text_start, text_end, rodata_start, rodata_end, data_start, kimg_end) = unsafe {
        (
            core::ptr::addr_of!(_text_start) as usize,
            core::ptr::addr_of!(_text_end) as usize,
            core::ptr::addr_of!(_rodata_start) as usize,
            core::ptr::addr_of!(_rodata_end) as usize,
            core::ptr::addr_of!(_data_start) as usize,
            core::ptr::addr_of!(_kimg_end) as usize,
        )
    };

    identity_map_range(root, text_start, text_end, PageFlags::R | PageFlags::X | PageFlags::G);
    identity_map_range(root, rodata_start, rodata_end, PageFlags::R | PageFlags::G);
    identity_map_range(root, data_start, kimg_end, PageFlags::R | PageFlags::W | PageFlags::G);

    identity_map_range(
        root,
        RAM_START + MEGA_SIZE,
        RAM_END,
        PageFlags::R | PageFlags::W | PageFlags::G,
    );

    let mtag = Mtag::from_parts(SV39_MODE, 0, (root_addr >> 12) as u64);
    let _ = KERNEL_MTAG.init(mtag);
    // SAFETY: `mtag`'s root table covers the kernel's own code/data/MMIO/RAM
    // window, so control flow remains valid immediately after the switch.
    unsafe { crate::arch::write_satp(mtag.satp() as usize) };
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn init_kernel_space() {}

/// Flush the TLB for `mtag`'s address space. Bare metal issues a global
/// `sfence.vma`; the host backend has no TLB to flush.
fn flush_tlb(mtag: Mtag) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        // SAFETY: `sfence.vma zero, zero` flushes the whole TLB; always
        // legal in S-mode. Re-installing `mtag` first ensures we flush the
        // space we just mutated even if it is not currently active.
        unsafe {
            crate::arch::write_satp(mtag.satp() as usize);
        }
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = mtag;
    }
}

/// Allocate one frame and map it at `vma` in `mtag`'s address space (spec
/// §4.2). Overwrites any existing leaf at that VPN0 without freeing the
/// previous frame — documented as the caller's obligation not to remap live
/// pages.
pub fn alloc_and_map_page(mtag: Mtag, vma: usize, flags: PageFlags) -> usize {
    let addr = alloc_zeroed_frame();
    let ppn = (addr >> 12) as u64;
    // SAFETY: mtag.root_ptr() is a valid, currently-installed root table for
    // the caller's address space.
    let pte = unsafe { walk_create(mtag.root_ptr(), vma, flags.contains(PageFlags::G)) };
    // SAFETY: pte was just returned by walk_create on the same root.
    unsafe { (*pte).set_leaf(ppn, flags) };
    flush_tlb(mtag);
    vma
}

/// Map a run of pages covering `[vma, vma + size)`, ceiling `size` to a page
/// count (spec §4.2). Returns the end of the mapped range.
pub fn alloc_and_map_range(mtag: Mtag, vma: usize, size: usize, flags: PageFlags) -> usize {
    let start = round_down(vma, PAGE_SIZE);
    let pages = page_count((vma - start) + size);
    let mut addr = start;
    for _ in 0..pages {
        alloc_and_map_page(mtag, addr, flags);
        addr += PAGE_SIZE;
    }
    addr
}

/// Change the leaf flags at `vma`, leaving its PPN untouched. A no-op if any
/// intermediate table on the walk is invalid (spec §4.2).
pub fn set_page_flags(mtag: Mtag, vma: usize, flags: PageFlags) {
    // SAFETY: mtag.root_ptr() is valid for the caller's address space.
    if let Some(pte) = unsafe { walk_lookup(mtag.root_ptr(), vma) } {
        // SAFETY: pte was returned by walk_lookup on the same root.
        let ppn = unsafe { (*pte).ppn() };
        unsafe { (*pte).set_leaf(ppn, flags) };
        flush_tlb(mtag);
    }
}

/// Apply [`set_page_flags`] to every page in `[vma, vma + size)`.
pub fn set_range_flags(mtag: Mtag, vma: usize, size: usize, flags: PageFlags) {
    let start = round_down(vma, PAGE_SIZE);
    let pages = page_count((vma - start) + size);
    let mut addr = start;
    for _ in 0..pages {
        set_page_flags(mtag, addr, flags);
        addr += PAGE_SIZE;
    }
}

/// Walk the user VMA range page by page; for every valid leaf, clear it and
/// return its frame to the pool (spec §4.2, §9: fixed from the source's
/// `break`-instead-of-`continue` bug — an unmapped page is skipped, not a
/// stop condition).
pub fn unmap_and_free_user(mtag: Mtag) {
    let root = mtag.root_ptr();
    let mut vma = super::USER_START_VMA;
    while vma < super::USER_END_VMA {
        // SAFETY: root is valid for the caller's address space.
        if let Some(pte) = unsafe { walk_lookup(root, vma) } {
            // SAFETY: pte was returned by walk_lookup on the same root.
            if unsafe { (*pte).is_valid() } {
                let ppn = unsafe { (*pte).ppn() };
                unsafe { (*pte).clear() };
                frame_allocator::free_page(Frame::from_addr((ppn << 12) as usize));
            }
        }
        vma += PAGE_SIZE;
    }
    flush_tlb(mtag);
}

/// Resolve `vaddr` to its backing physical address in `mtag`'s address
/// space, or `None` if it is not currently mapped. Used by the ELF loader
/// to get a raw pointer into a page it just mapped without assuming that
/// address space is the one currently installed in `satp`.
pub fn translate(mtag: Mtag, vaddr: usize) -> Option<usize> {
    // SAFETY: mtag.root_ptr() is a valid root table for the caller's space.
    let pte = unsafe { walk_lookup(mtag.root_ptr(), vaddr) }?;
    // SAFETY: pte was returned by walk_lookup on the same root.
    if unsafe { (*pte).is_valid() } {
        let ppn = unsafe { (*pte).ppn() };
        Some((ppn << 12) as usize | (vaddr & (PAGE_SIZE - 1)))
    } else {
        None
    }
}

/// Demand-page handler for a store fault (spec §4.2). Fatal if `vaddr` falls
/// outside the user range; otherwise maps one `R|W|U` page at the faulting
/// page's base.
pub fn handle_page_fault(mtag: Mtag, vaddr: usize) {
    assert!(
        (super::USER_START_VMA..super::USER_END_VMA).contains(&vaddr),
        "page fault outside user range: {vaddr:#x}"
    );
    alloc_and_map_page(
        mtag,
        round_down(vaddr, PAGE_SIZE),
        PageFlags::R | PageFlags::W | PageFlags::U,
    );
}

/// Switch the active address space back to the kernel master tag (spec
/// §4.2). Does not free any frames; the caller is expected to have already
/// run [`unmap_and_free_user`].
pub fn space_reclaim() {
    let kmtag = kernel_mtag();
    // SAFETY: the kernel master tag's root table covers the kernel's own
    // code/data, so control flow stays valid through the switch.
    unsafe { crate::arch::write_satp(kmtag.satp() as usize) };
}

/// Clone `parent`'s address space under a fresh root table tagged with
/// `asid` (spec §4.2, scenario 7): shallow-copies the kernel half, deep-
/// copies every valid user page into a fresh frame with the source's flags.
pub fn space_clone(parent: Mtag, asid: u16) -> Mtag {
    let child_root_addr = alloc_zeroed_frame();
    let child_root = child_root_addr as *mut PageTable;
    let parent_root = parent.root_ptr();

    let kernel_vpn2 = vpn(super::USER_START_VMA, 2);
    for i in 0..kernel_vpn2 {
        // SAFETY: both roots are valid 512-entry tables; indices are < 512.
        unsafe {
            (*child_root)[i] = (*parent_root)[i];
        }
    }

    let mut vma = super::USER_START_VMA;
    while vma < super::USER_END_VMA {
        // SAFETY: parent_root is valid for the parent's address space.
        let parent_pte = unsafe { walk_lookup(parent_root, vma) };
        if let Some(parent_pte) = parent_pte {
            // SAFETY: parent_pte was returned by walk_lookup above.
            let (is_valid, flags, src_ppn) = unsafe {
                (
                    (*parent_pte).is_valid(),
                    (*parent_pte).flags(),
                    (*parent_pte).ppn(),
                )
            };
            if is_valid {
                let src_addr = (src_ppn << 12) as usize;
                let dst_addr = alloc_zeroed_frame();
                // SAFETY: src_addr is a live mapped frame (4 KiB); dst_addr
                // was just freshly allocated and zeroed, hence disjoint and
                // writable for 4 KiB.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        src_addr as *const u8,
                        dst_addr as *mut u8,
                        PAGE_SIZE,
                    );
                }
                // SAFETY: child_root is a valid root table for the new space.
                let child_pte = unsafe { walk_create(child_root, vma, false) };
                let dst_ppn = (dst_addr >> 12) as u64;
                // SAFETY: child_pte was just returned by walk_create.
                unsafe { (*child_pte).set_leaf(dst_ppn, flags) };
                debug_assert_ne!(
                    dst_ppn, src_ppn,
                    "space_clone must not alias the parent's frame"
                );
            }
        }
        vma += PAGE_SIZE;
    }

    Mtag::from_parts(SV39_MODE, asid, (child_root_addr >> 12) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::{round_up, USER_END_VMA, USER_START_VMA};

    fn seed_pool(frames: usize) {
        let pool = std::vec![0u8; frames * PAGE_SIZE + PAGE_SIZE].leak();
        let base = round_up(pool.as_ptr() as usize, PAGE_SIZE);
        frame_allocator::init_pool(base, frames);
    }

    fn fresh_space() -> Mtag {
        let root_addr = alloc_zeroed_frame();
        Mtag::from_parts(SV39_MODE, 0, (root_addr >> 12) as u64)
    }

    #[test]
    fn map_then_access_round_trips() {
        seed_pool(16);
        let space = fresh_space();
        let vma = USER_START_VMA + 3 * PAGE_SIZE;
        alloc_and_map_page(space, vma, PageFlags::R | PageFlags::W | PageFlags::U);

        // SAFETY: the page was just mapped to a real frame; the kernel's
        // identity window makes its own PPN directly usable as a pointer on
        // this host test build (no real MMU is involved).
        let pte = unsafe { walk_lookup(space.root_ptr(), vma) }.unwrap();
        let frame_ptr = unsafe { ((*pte).ppn() << 12) as *mut u8 };
        unsafe {
            frame_ptr.write(0xAB);
            assert_eq!(frame_ptr.read(), 0xAB);
        }
    }

    #[test]
    fn set_page_flags_is_noop_when_unmapped() {
        seed_pool(4);
        let space = fresh_space();
        // No panic, no mapping created.
        set_page_flags(space, USER_START_VMA, PageFlags::R);
        let pte = unsafe { walk_lookup(space.root_ptr(), USER_START_VMA) };
        assert!(pte.is_none());
    }

    #[test]
    fn set_page_flags_preserves_ppn() {
        seed_pool(8);
        let space = fresh_space();
        let vma = USER_START_VMA;
        alloc_and_map_page(space, vma, PageFlags::R | PageFlags::W | PageFlags::U);
        let before = unsafe { (*walk_lookup(space.root_ptr(), vma).unwrap()).ppn() };

        set_page_flags(space, vma, PageFlags::R | PageFlags::U);

        let pte = unsafe { &*walk_lookup(space.root_ptr(), vma).unwrap() };
        assert_eq!(pte.ppn(), before);
        assert!(pte.flags().contains(PageFlags::R));
        assert!(!pte.flags().contains(PageFlags::W));
    }

    #[test]
    fn unmap_and_free_user_skips_holes_and_frees_the_rest() {
        seed_pool(16);
        let space = fresh_space();
        let a = USER_START_VMA;
        let b = USER_START_VMA + 5 * PAGE_SIZE;
        alloc_and_map_page(space, a, PageFlags::R | PageFlags::U);
        alloc_and_map_page(space, b, PageFlags::R | PageFlags::U);

        let before_free = frame_allocator::free_frames();
        unmap_and_free_user(space);
        let after_free = frame_allocator::free_frames();

        assert_eq!(after_free, before_free + 2);
        assert!(unsafe { walk_lookup(space.root_ptr(), a) }.is_none());
        assert!(unsafe { walk_lookup(space.root_ptr(), b) }.is_none());
    }

    #[test]
    fn handle_page_fault_maps_rwu_page() {
        seed_pool(8);
        let space = fresh_space();
        let vma = USER_START_VMA + 0xF000;
        handle_page_fault(space, vma + 0x123);

        let pte = unsafe { &*walk_lookup(space.root_ptr(), round_down(vma, PAGE_SIZE)).unwrap() };
        assert!(pte.flags().contains(PageFlags::R | PageFlags::W | PageFlags::U));
    }

    #[test]
    #[should_panic(expected = "outside user range")]
    fn handle_page_fault_outside_user_range_panics() {
        seed_pool(4);
        let space = fresh_space();
        handle_page_fault(space, USER_END_VMA + PAGE_SIZE);
    }

    #[test]
    fn space_clone_deep_copies_user_pages() {
        seed_pool(32);
        let parent = fresh_space();
        let vma = USER_START_VMA + 4 * PAGE_SIZE;
        alloc_and_map_page(parent, vma, PageFlags::R | PageFlags::W | PageFlags::U);
        let parent_ptr = unsafe { (*walk_lookup(parent.root_ptr(), vma).unwrap()).ppn() << 12 } as *mut u8;
        unsafe { parent_ptr.write(0xAB) };

        let child = space_clone(parent, 7);
        assert_eq!(child.asid(), 7);

        let child_pte = unsafe { &*walk_lookup(child.root_ptr(), vma).unwrap() };
        let child_ptr = (child_pte.ppn() << 12) as *mut u8;
        assert_ne!(child_ptr, parent_ptr, "clone must use a distinct frame");
        assert_eq!(unsafe { child_ptr.read() }, 0xAB);

        unsafe { child_ptr.write(0xCD) };
        assert_eq!(unsafe { parent_ptr.read() }, 0xAB, "parent frame must be unaffected");
    }

    #[test]
    fn alloc_and_map_range_covers_unaligned_size() {
        seed_pool(8);
        let space = fresh_space();
        let vma = USER_START_VMA + 10;
        let end = alloc_and_map_range(space, vma, PAGE_SIZE + 1, PageFlags::R | PageFlags::U);
        assert_eq!(end, round_down(vma, PAGE_SIZE) + 2 * PAGE_SIZE);
        assert!(unsafe { walk_lookup(space.root_ptr(), round_down(vma, PAGE_SIZE)) }.is_some());
        assert!(unsafe { walk_lookup(space.root_ptr(), round_down(vma, PAGE_SIZE) + PAGE_SIZE) }.is_some());
    }
}
