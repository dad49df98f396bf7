//! Scheduler timer.
//!
//! The 8254 programming lives in `arch`; the tick itself is dispatched
//! straight from the trap layer into [`crate::sched::tick`], after the
//! EOI so a context switch cannot leave the line blocked.

/// Program the hardware timer for the scheduling tick.
pub fn init() {
    #[cfg(target_arch = "x86")]
    crate::arch::x86::pit::init();
}
