//! IA-32 architecture support: interrupt plumbing, port I/O helpers and
//! the paging control registers.

pub mod context;
pub mod entry;
pub mod idt;
pub mod pic;
pub mod pit;
pub mod rtc;

use core::arch::asm;

/// One-time hardware bring-up: IDT loaded, PIC remapped with the timer,
/// keyboard and RTC lines unmasked. Interrupts stay disabled; they are
/// first enabled by the eflags image of the initial `iret` to user space.
pub fn init() {
    disable_interrupts();

    idt::init();
    pic::init();

    pic::enable(pit::PIT_IRQ);
    pic::enable(0x01); // keyboard
    pic::enable(rtc::RTC_IRQ);
}

/// Disable maskable interrupts.
pub fn disable_interrupts() {
    // SAFETY: cli has no memory effects; masking interrupts is always
    // sound, at worst it delays a tick.
    unsafe { x86::irq::disable() };
}

/// Enable maskable interrupts.
pub fn enable_interrupts() {
    // SAFETY: The IDT and PIC are installed by arch::init before any path
    // that can reach this.
    unsafe { x86::irq::enable() };
}

/// Whether IF is currently set.
pub fn interrupts_enabled() -> bool {
    let eflags: u32;
    // SAFETY: pushfd/pop only moves the flags register through the stack.
    unsafe {
        asm!("pushfd", "pop {}", out(reg) eflags, options(preserves_flags));
    }
    eflags & 0x200 != 0
}

/// Run `f` with interrupts disabled, restoring the previous state after.
pub fn without_interrupts<F: FnOnce() -> R, R>(f: F) -> R {
    let was_enabled = interrupts_enabled();
    disable_interrupts();
    let ret = f();
    if was_enabled {
        enable_interrupts();
    }
    ret
}

/// One iteration of an interrupts-on spin wait: open the interrupt window
/// so the timer and devices can make progress, then hint the pipeline.
pub fn relax() {
    enable_interrupts();
    core::hint::spin_loop();
}

/// Park the CPU forever.
pub fn halt_loop() -> ! {
    loop {
        disable_interrupts();
        // SAFETY: hlt with interrupts masked parks the CPU permanently,
        // which is the intent.
        unsafe { x86::halt() };
    }
}

/// Load CR3 and switch on 4 MiB page support plus paged protected mode.
/// `pd_base` is the physical (= identity virtual) address of the page
/// directory.
pub fn load_page_directory(pd_base: u32) {
    // SAFETY: Called once from paging::init with a correctly constructed
    // directory. Sets CR4.PSE before CR0.PG so the 4 MiB kernel PDE is
    // honored from the first translated fetch.
    unsafe {
        asm!(
            "mov cr3, {pd}",
            "mov {tmp}, cr4",
            "or {tmp}, 0x10",
            "mov cr4, {tmp}",
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000001",
            "mov cr0, {tmp}",
            pd = in(reg) pd_base,
            tmp = out(reg) _,
            options(nostack),
        );
    }
}

/// Flush the entire TLB with a CR3 reload. Correctness over performance.
pub fn flush_tlb() {
    // SAFETY: Rewriting CR3 with its current value only drops cached
    // translations.
    unsafe {
        asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack),
        );
    }
}
