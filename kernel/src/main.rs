//! TrioOS kernel entry point.
//!
//! The boot loader (external to this crate) drops us into protected mode
//! with the GDT and TSS installed, a flat segment model and the
//! file-system image loaded as one contiguous region. It then calls
//! [`kernel_entry`] with that region's bounds.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
use core::panic::PanicInfo;

#[cfg(target_os = "none")]
use trio_kernel::{arch, println, sched};

/// Boot hand-off. `fs_base`/`fs_len` describe the in-memory file-system
/// image placed by the loader.
#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn kernel_entry(fs_base: *const u8, fs_len: usize) -> ! {
    // SAFETY: The loader guarantees the image region is valid, lives below
    // the kernel page and is never written after hand-off. We hold the only
    // reference for the lifetime of the kernel.
    let image = unsafe { core::slice::from_raw_parts(fs_base, fs_len) };

    if let Err(err) = trio_kernel::init(image) {
        println!("<!> boot failed: {}", err);
        arch::halt_loop();
    }

    println!("TrioOS v{}", env!("CARGO_PKG_VERSION"));

    // Make terminal 0 active and execute its base shell. Never returns.
    sched::start()
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("[KERNEL PANIC] {}", info);
    log::error!("panic: {}", info);
    arch::halt_loop();
}

/// Hosted builds only exercise the library's unit tests; the binary is a
/// stub so `cargo build` succeeds on a development machine.
#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("trio-kernel only runs on bare metal; use `cargo test` here");
}

#[cfg(not(target_os = "none"))]
use std::eprintln;
