//! Architecture support.
//!
//! This core targets Sv39 riscv64 exclusively (spec §1: "x86_64/aarch64
//! support is out of scope"), so unlike the teacher's `arch` dispatcher
//! (which re-exports one of `x86_64`/`aarch64`/`riscv64` by `target_arch`)
//! this module has a single bare-metal backend plus a host stand-in so
//! `cargo test` works without a RISC-V target, matching the teacher's
//! `lib.rs` host-testable pattern.

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod riscv64;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use riscv64::*;

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
mod host;
#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub use host::*;
