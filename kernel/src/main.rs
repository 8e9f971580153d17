//! sv39-teach kernel entry point (bare-metal, riscv64gc-unknown-none-elf).

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use sv39_teach_kernel::{arch, drivers, fs, kerror, kinfo, mm, println, process, sched};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("[KERNEL PANIC] {}", info);
    arch::halt();
}

/// Entered from `arch::riscv64::entry` once the boot hart has set up a
/// stack and cleared `.bss`. Runs entirely in S-mode.
#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
    kinfo!("boot", "sv39-teach kernel starting");

    arch::init();
    mm::init();
    drivers::plic::init();
    sched::init();

    if let Err(e) = drivers::virtio::blk::attach(drivers::virtio::mmio::DEFAULT_BASES[0]) {
        kerror!("vioblk", "attach failed: {:?}", e);
    }

    if let Err(e) = fs::blockfs::mount_named("blk", 0) {
        kerror!("fs", "mount failed: {:?}", e);
    }

    process::procmgr_init();

    kinfo!("boot", "sv39-teach kernel initialized");
    sched::run();
}
