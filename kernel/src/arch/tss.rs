//! Task State Segment boundary.
//!
//! The boot glue builds the GDT and points its TSS descriptor at
//! [`TSS`]; the kernel only ever rewrites `esp0` so the CPU picks the
//! right kernel stack on a ring 3 → ring 0 transition.

use core::cell::UnsafeCell;

use crate::arch::KERNEL_DS;

/// Hardware TSS layout (IA-32). Only `ss0`/`esp0` are live; the rest is
/// fixed at its reset value.
#[repr(C, packed)]
pub struct TaskStateSegment {
    pub link: u32,
    pub esp0: u32,
    pub ss0: u32,
    reserved: [u32; 23],
}

/// Wrapper making the pinned hardware structure shareable. All writes go
/// through [`set_esp0`] with interrupts disabled.
pub struct TssCell(UnsafeCell<TaskStateSegment>);

// SAFETY: Single processor; mutation happens only via set_esp0 in
// interrupt-disabled sections, and the CPU reads the structure only during
// a privilege transition, which cannot overlap those sections.
unsafe impl Sync for TssCell {}

pub static TSS: TssCell = TssCell(UnsafeCell::new(TaskStateSegment {
    link: 0,
    esp0: 0,
    ss0: KERNEL_DS as u32,
    reserved: [0; 23],
}));

/// Point the CPU's ring-0 stack at `esp0` for the next user→kernel
/// transition.
pub fn set_esp0(esp0: u32) {
    crate::arch::without_interrupts(|| {
        // SAFETY: Exclusive access per the TssCell invariant above.
        unsafe { (*TSS.0.get()).esp0 = esp0 };
    });
}

/// Current ring-0 stack top recorded in the TSS.
pub fn esp0() -> u32 {
    crate::arch::without_interrupts(|| {
        // SAFETY: See set_esp0; reads are likewise serialized.
        unsafe { (*TSS.0.get()).esp0 }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esp0_round_trip() {
        set_esp0(0x7FDFFC);
        assert_eq!(esp0(), 0x7FDFFC);
        set_esp0(0);
    }
}
