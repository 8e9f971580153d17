//! The abstract I/O interface consumed by file descriptors (spec §6): a
//! small `read`/`write`/`ctl` surface implemented by both open filesystem
//! files (`fs::blockfs`) and block devices (`drivers::virtio::blk`), plus
//! the device registry that hands them out by name.
//!
//! Grounded on the teacher's `drivers::storage`/`fs::blockdev` split
//! (`BlockDevice` trait with a uniform op surface implemented by several
//! concrete backends) and `irq::IrqController` (a small trait of register
//! operations each returning a `KernelResult`). Refcounting (spec §3:
//! "`refcnt` for shared ownership") is not reimplemented by hand — an
//! `IoHandle` is an `Arc<dyn IoInterface>`, so cloning it for `fork` and
//! dropping it on `close` is exactly Rust's own `Arc` refcount; a type
//! implementing `IoInterface` does its "when refcount reaches zero"
//! cleanup in its own `Drop`.

use alloc::sync::Arc;

use crate::error::IoError;

/// Per-process file-descriptor table bound (spec §3: "at most
/// `PROCESS_IOMAX` I/O-interface references").
pub const PROCESS_IOMAX: usize = 16;

/// Stable wire values for the ioctl numbers spec §6 lists (`GETLEN=1,
/// GETPOS=2, SETPOS=3, GETBLKSZ=4`). The exact numbers are an external-header
/// implementation choice (SPEC_FULL.md §6 FULL note); these are internally
/// consistent across this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum IoCtl {
    GetLen = 1,
    GetPos = 2,
    SetPos = 3,
    GetBlkSz = 4,
}

impl TryFrom<i32> for IoCtl {
    type Error = IoError;

    fn try_from(value: i32) -> Result<Self, IoError> {
        match value {
            1 => Ok(IoCtl::GetLen),
            2 => Ok(IoCtl::GetPos),
            3 => Ok(IoCtl::SetPos),
            4 => Ok(IoCtl::GetBlkSz),
            _ => Err(IoError::InvalidArgument),
        }
    }
}

/// Uniform I/O surface for anything a file descriptor can hold: an open
/// filesystem file or a block device (spec §6 I/O-interface contract).
///
/// Every method takes `&self`: implementers guard their own mutable state
/// (position, in-flight request) behind the lock spec §4.6/§4.5 already
/// require them to take, rather than requiring `&mut self` through the
/// shared `Arc`.
pub trait IoInterface: Send + Sync {
    /// Read up to `buf.len()` bytes. Returns the byte count, or a negative
    /// [`IoError`] code (spec §7).
    fn read(&self, buf: &mut [u8]) -> isize;

    /// Write up to `buf.len()` bytes. Returns the byte count, or a negative
    /// [`IoError`] code.
    fn write(&self, buf: &[u8]) -> isize;

    /// Device/file control (`GETLEN`/`GETPOS`/`SETPOS`/`GETBLKSZ`). Returns
    /// a non-negative status/value, or a negative [`IoError`] code.
    fn ctl(&self, cmd: i32, arg: i64) -> isize;
}

/// A shared handle to an open I/O interface. Cloning bumps the `Arc`
/// strong count (spec's `refcnt`); dropping the last clone runs the
/// concrete type's `Drop`, which performs the spec's "when refcount
/// reaches zero" teardown (free the FS slot, reset the virtq, ...).
pub type IoHandle = Arc<dyn IoInterface>;

/// Seek helper used by the ELF loader and `blockfs::mount` (spec §3: "ELF
/// image view ... accessed through a seek/read I/O interface"; §4.6:
/// "Seeks `dev` to 0"). `SETPOS` has no reject condition for these two
/// callers, so failures are treated as structural (`debug_assert`) rather
/// than propagated.
pub fn seek(io: &dyn IoInterface, pos: u64) {
    let rc = io.ctl(IoCtl::SetPos as i32, pos as i64);
    debug_assert!(rc >= 0, "seek to {pos} failed: {rc}");
}

/// Read exactly `buf.len()` bytes, or fail with [`IoError::IoError`] on any
/// short read (spec §4.7: "an I/O error during any read surfaces as
/// io-error").
pub fn read_exact(io: &dyn IoInterface, buf: &mut [u8]) -> Result<(), IoError> {
    let n = io.read(buf);
    if n < 0 {
        return Err(code_to_error(n));
    }
    if n as usize != buf.len() {
        return Err(IoError::IoError);
    }
    Ok(())
}

fn code_to_error(code: isize) -> IoError {
    match code {
        -1 => IoError::InvalidArgument,
        -2 => IoError::NoEntry,
        -3 => IoError::NoDevice,
        -4 => IoError::Busy,
        -6 => IoError::BadFormat,
        -7 => IoError::NotSupported,
        -8 => IoError::TooManyFiles,
        _ => IoError::IoError,
    }
}
