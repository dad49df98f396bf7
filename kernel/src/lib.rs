//! TrioOS Kernel Library
//!
//! Core of a single-processor x86 (32-bit protected mode) teaching kernel:
//! three text-mode terminals, up to six user processes under round-robin
//! scheduling, a file-descriptor based system call surface, software
//! signals, a virtualized RTC and a read-only in-memory file system.
//!
//! The crate is `no_std` on bare metal. On a hosted target it links `std`
//! so the logic modules (file system, process table, signals, scheduler
//! policy, line discipline) run under the standard `#[test]` harness;
//! everything that touches privileged instructions lives in [`arch`] and
//! is compiled only for `target_arch = "x86"`.

#![no_std]

// Host target: link std so unit tests can run under the normal harness.
#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod print;

pub mod arch;
pub mod drivers;
pub mod error;
pub mod exceptions;
pub mod fs;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod serial;
pub mod signal;
pub mod sync;
pub mod syscall;
pub mod terminal;

pub use error::{KernelError, SyscallResult};

/// Bring the core subsystems up, in dependency order. Called once from the
/// boot path with the location of the file-system image handed over by the
/// loader.
///
/// After this returns the IDT is live, the PIC is programmed with the
/// timer, keyboard and RTC lines unmasked, paging is enabled and the
/// file-system image is mounted. The caller is expected to enter
/// [`sched::start`], which never returns.
pub fn init(fs_image: &'static [u8]) -> Result<(), KernelError> {
    logger::init();
    log::info!("trio-kernel v{}", env!("CARGO_PKG_VERSION"));

    arch::init();
    mm::paging::init();
    fs::init(fs_image)?;
    terminal::init();
    drivers::pit::init();

    log::info!("core subsystems up, {} byte fs image", fs_image.len());
    Ok(())
}
