//! ELF64 program loader (spec §4.7): validates the header, maps and loads
//! every `PT_LOAD` segment into a user address space, and returns the entry
//! point.
//!
//! Grounded on the teacher's `elf/types.rs` for the header/program-header
//! field layout (`Elf64Header`, `Elf64ProgramHeader`, `ProgramType`), but
//! parsed field-by-field from a byte buffer rather than cast from a raw
//! pointer (spec §9: "Parsers must read field-by-field ... when the target
//! language does not guarantee layout compatibility" — Rust's `repr(C)`
//! does guarantee it for a local struct, but the loader reads through an
//! arbitrary [`IoInterface`], not a slice it already owns, so there is
//! nothing to cast).

use crate::error::IoError;
use crate::io::{read_exact, seek, IoInterface};
use crate::mm::{self, Mtag, PageFlags, USER_END_VMA, USER_START_VMA};

const MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const CLASS_64: u8 = 2;
const DATA_LSB: u8 = 1;
const VERSION_CURRENT: u8 = 1;
const TYPE_EXEC: u16 = 2;

const PT_LOAD: u32 = 1;
const PF_X: u32 = 1 << 0;
const PF_W: u32 = 1 << 1;
const PF_R: u32 = 1 << 2;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

struct Elf64Header {
    e_type: u16,
    e_entry: u64,
    e_phoff: u64,
    e_phentsize: u16,
    e_phnum: u16,
}

impl Elf64Header {
    /// Validate and parse the 64-byte ELF header (spec §3: "accepted iff
    /// magic, class=64-bit, data=LE, version=1, type=executable").
    fn parse(buf: &[u8; EHDR_SIZE]) -> Result<Self, IoError> {
        if buf[0..4] != MAGIC {
            return Err(IoError::BadFormat);
        }
        if buf[4] != CLASS_64 {
            return Err(IoError::BadFormat);
        }
        if buf[5] != DATA_LSB {
            return Err(IoError::BadFormat);
        }
        if buf[6] != VERSION_CURRENT {
            return Err(IoError::BadFormat);
        }
        let e_type = u16::from_le_bytes([buf[16], buf[17]]);
        if e_type != TYPE_EXEC {
            return Err(IoError::BadFormat);
        }
        let e_entry = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        let e_phoff = u64::from_le_bytes(buf[32..40].try_into().unwrap());
        let e_phentsize = u16::from_le_bytes([buf[54], buf[55]]);
        let e_phnum = u16::from_le_bytes([buf[56], buf[57]]);
        Ok(Self {
            e_type,
            e_entry,
            e_phoff,
            e_phentsize,
            e_phnum,
        })
    }
}

struct Elf64ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
}

impl Elf64ProgramHeader {
    fn parse(buf: &[u8; PHDR_SIZE]) -> Self {
        Self {
            p_type: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            p_flags: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            p_offset: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            p_vaddr: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            p_filesz: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            p_memsz: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
        }
    }
}

/// Copy `len` bytes read from `io`'s current position into `mtag`'s address
/// space starting at `vaddr`, one physical page at a time (the pages backing
/// a range need not be physically contiguous).
fn load_bytes(io: &dyn IoInterface, mtag: Mtag, vaddr: u64, len: u64) -> Result<(), IoError> {
    let mut va = vaddr as usize;
    let mut remaining = len as usize;
    while remaining > 0 {
        let page_base = mm::round_down(va, mm::PAGE_SIZE);
        let page_off = va - page_base;
        let chunk = core::cmp::min(remaining, mm::PAGE_SIZE - page_off);
        let phys = mm::translate(mtag, va).expect("PT_LOAD segment page not mapped");
        // SAFETY: `phys` was just resolved from a leaf PTE this loader
        // mapped via `alloc_and_map_range`; `chunk` stays within that page.
        let dest = unsafe { core::slice::from_raw_parts_mut(phys as *mut u8, chunk) };
        read_exact(io, dest)?;
        va += chunk;
        remaining -= chunk;
    }
    Ok(())
}

/// Zero-fill `[vaddr + filesz, vaddr + memsz)`, one physical page at a time.
fn zero_fill(mtag: Mtag, vaddr: u64, filesz: u64, memsz: u64) {
    let mut va = (vaddr + filesz) as usize;
    let mut remaining = (memsz - filesz) as usize;
    while remaining > 0 {
        let page_base = mm::round_down(va, mm::PAGE_SIZE);
        let page_off = va - page_base;
        let chunk = core::cmp::min(remaining, mm::PAGE_SIZE - page_off);
        let phys = mm::translate(mtag, va).expect("PT_LOAD segment page not mapped");
        // SAFETY: see load_bytes.
        let dest = unsafe { core::slice::from_raw_parts_mut(phys as *mut u8, chunk) };
        dest.fill(0);
        va += chunk;
        remaining -= chunk;
    }
}

/// Load the ELF64 executable behind `io` into `mtag`'s user range. Returns
/// the entry point on success.
///
/// For each `PT_LOAD` segment: rejects segments that fall outside
/// `[USER_START_VMA, USER_END_VMA)`, maps `filesz` bytes `U|W|R` so the load
/// itself can write, copies `filesz` bytes from the file, zero-fills the
/// `[filesz, memsz)` tail, then reapplies the final flags derived from
/// `p_flags` with `U` always set (spec §4.7).
pub fn elf_load(io: &dyn IoInterface, mtag: Mtag) -> Result<u64, IoError> {
    seek(io, 0);
    let mut ehdr_buf = [0u8; EHDR_SIZE];
    read_exact(io, &mut ehdr_buf)?;
    let header = Elf64Header::parse(&ehdr_buf)?;

    for i in 0..header.e_phnum {
        let off = header.e_phoff + u64::from(i) * u64::from(header.e_phentsize);
        seek(io, off);
        let mut phdr_buf = [0u8; PHDR_SIZE];
        read_exact(io, &mut phdr_buf)?;
        let ph = Elf64ProgramHeader::parse(&phdr_buf);

        if ph.p_type != PT_LOAD {
            continue;
        }

        let vaddr_end = ph.p_vaddr.checked_add(ph.p_memsz).ok_or(IoError::BadFormat)?;
        if ph.p_vaddr < USER_START_VMA as u64 || vaddr_end > USER_END_VMA as u64 {
            return Err(IoError::BadFormat);
        }

        mm::alloc_and_map_range(
            mtag,
            ph.p_vaddr as usize,
            ph.p_filesz as usize,
            PageFlags::U | PageFlags::W | PageFlags::R,
        );

        seek(io, ph.p_offset);
        load_bytes(io, mtag, ph.p_vaddr, ph.p_filesz)?;
        zero_fill(mtag, ph.p_vaddr, ph.p_filesz, ph.p_memsz);

        let mut flags = PageFlags::U;
        if ph.p_flags & PF_X != 0 {
            flags |= PageFlags::X;
        }
        if ph.p_flags & PF_W != 0 {
            flags |= PageFlags::W;
        }
        if ph.p_flags & PF_R != 0 {
            flags |= PageFlags::R;
        }
        mm::set_range_flags(mtag, ph.p_vaddr as usize, ph.p_memsz as usize, flags);
    }

    Ok(header.e_entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::frame_allocator;
    use spin::Mutex;
    use std::vec::Vec;

    struct RamIo {
        data: Mutex<(Vec<u8>, usize)>,
    }

    impl RamIo {
        fn new(data: Vec<u8>) -> Self {
            Self {
                data: Mutex::new((data, 0)),
            }
        }
    }

    impl IoInterface for RamIo {
        fn read(&self, buf: &mut [u8]) -> isize {
            let mut guard = self.data.lock();
            let (data, pos) = &mut *guard;
            let avail = data.len().saturating_sub(*pos);
            let n = core::cmp::min(avail, buf.len());
            buf[..n].copy_from_slice(&data[*pos..*pos + n]);
            *pos += n;
            n as isize
        }

        fn write(&self, _buf: &[u8]) -> isize {
            IoError::NotSupported.code()
        }

        fn ctl(&self, cmd: i32, arg: i64) -> isize {
            use crate::io::IoCtl;
            let mut guard = self.data.lock();
            match IoCtl::try_from(cmd) {
                Ok(IoCtl::SetPos) => {
                    guard.1 = arg as usize;
                    0
                }
                Ok(IoCtl::GetPos) => guard.1 as isize,
                Ok(IoCtl::GetLen) => guard.0.len() as isize,
                _ => IoError::NotSupported.code(),
            }
        }
    }

    fn seed_pool(frames: usize) {
        let pool = std::vec![0u8; frames * mm::PAGE_SIZE + mm::PAGE_SIZE].leak();
        let base = mm::round_up(pool.as_ptr() as usize, mm::PAGE_SIZE);
        frame_allocator::init_pool(base, frames);
    }

    fn fresh_space() -> Mtag {
        let frame = frame_allocator::alloc_page();
        let addr = frame.addr();
        core::mem::forget(frame);
        // SAFETY: addr was just removed from the free list.
        unsafe { core::ptr::write_bytes(addr as *mut u8, 0, mm::PAGE_SIZE) };
        Mtag::from_parts(mm::SV39_MODE, 0, (addr >> 12) as u64)
    }

    fn build_ehdr(phnum: u16, phoff: u64, entry: u64, data_byte: u8) -> Vec<u8> {
        let mut h = std::vec![0u8; EHDR_SIZE];
        h[0..4].copy_from_slice(&MAGIC);
        h[4] = CLASS_64;
        h[5] = data_byte;
        h[6] = VERSION_CURRENT;
        h[16..18].copy_from_slice(&TYPE_EXEC.to_le_bytes());
        h[24..32].copy_from_slice(&entry.to_le_bytes());
        h[32..40].copy_from_slice(&phoff.to_le_bytes());
        h[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        h[56..58].copy_from_slice(&phnum.to_le_bytes());
        h
    }

    fn build_phdr(p_type: u32, p_flags: u32, p_offset: u64, p_vaddr: u64, p_filesz: u64, p_memsz: u64) -> Vec<u8> {
        let mut p = std::vec![0u8; PHDR_SIZE];
        p[0..4].copy_from_slice(&p_type.to_le_bytes());
        p[4..8].copy_from_slice(&p_flags.to_le_bytes());
        p[8..16].copy_from_slice(&p_offset.to_le_bytes());
        p[16..24].copy_from_slice(&p_vaddr.to_le_bytes());
        p[32..40].copy_from_slice(&p_filesz.to_le_bytes());
        p[40..48].copy_from_slice(&p_memsz.to_le_bytes());
        p
    }

    #[test]
    fn rejects_wrong_data_encoding() {
        seed_pool(4);
        let space = fresh_space();
        let image = build_ehdr(0, EHDR_SIZE as u64, 0, 0);
        let io = RamIo::new(image);
        assert_eq!(elf_load(&io, space), Err(IoError::BadFormat));
    }

    #[test]
    fn accepts_and_loads_one_pt_load_segment() {
        seed_pool(8);
        let space = fresh_space();

        let vaddr = USER_START_VMA as u64 + 0x1000;
        let filesz = 0x100u64;
        let memsz = 0x200u64;
        let entry = vaddr;

        let mut image = build_ehdr(1, EHDR_SIZE as u64, entry, DATA_LSB);
        image.extend(build_phdr(PT_LOAD, PF_R | PF_X, EHDR_SIZE as u64 + PHDR_SIZE as u64, vaddr, filesz, memsz));
        let seg_off = image.len();
        let payload: Vec<u8> = (0..filesz as usize).map(|i| (i % 251) as u8).collect();
        image.extend_from_slice(&payload);
        assert_eq!(seg_off as u64, EHDR_SIZE as u64 + PHDR_SIZE as u64);

        let io = RamIo::new(image);
        let got_entry = elf_load(&io, space).unwrap();
        assert_eq!(got_entry, entry);

        let phys = mm::translate(space, vaddr as usize).unwrap();
        let loaded = unsafe { core::slice::from_raw_parts(phys as *const u8, filesz as usize) };
        assert_eq!(loaded, &payload[..]);

        let tail_phys = mm::translate(space, (vaddr + filesz) as usize).unwrap();
        let tail = unsafe { core::slice::from_raw_parts(tail_phys as *const u8, (memsz - filesz) as usize) };
        assert!(tail.iter().all(|&b| b == 0));
    }

    #[test]
    fn rejects_segment_outside_user_range() {
        seed_pool(4);
        let space = fresh_space();
        let vaddr = USER_START_VMA as u64 - 0x1000;

        let mut image = build_ehdr(1, EHDR_SIZE as u64, vaddr, DATA_LSB);
        image.extend(build_phdr(PT_LOAD, PF_R, EHDR_SIZE as u64 + PHDR_SIZE as u64, vaddr, 0, 0x10));

        let io = RamIo::new(image);
        assert_eq!(elf_load(&io, space), Err(IoError::BadFormat));
    }
}
