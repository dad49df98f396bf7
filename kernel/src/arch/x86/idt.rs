//! Interrupt Descriptor Table.
//!
//! Vectors 0..19 are trap gates at DPL 0, the three device lines are
//! interrupt gates at DPL 0, and vector 0x80 is the single DPL 3 gate
//! through which user space enters the kernel.

use spin::Mutex;

use super::entry;
use crate::arch::KERNEL_CS;

/// Software-interrupt vector for system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;
/// Base vector the PIC master is remapped to.
pub const IRQ_BASE: u8 = 0x20;

const IDT_ENTRIES: usize = 256;

/// One 8-byte gate descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct GateDescriptor {
    offset_low: u16,
    selector: u16,
    zero: u8,
    attributes: u8,
    offset_high: u16,
}

impl GateDescriptor {
    const fn missing() -> Self {
        GateDescriptor {
            offset_low: 0,
            selector: 0,
            zero: 0,
            attributes: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, attributes: u8) -> Self {
        GateDescriptor {
            offset_low: handler as u16,
            selector: KERNEL_CS,
            zero: 0,
            attributes,
            offset_high: (handler >> 16) as u16,
        }
    }
}

/// Gate attribute bytes: present | DPL | gate type.
const TRAP_GATE_DPL0: u8 = 0x8F;
const INT_GATE_DPL0: u8 = 0x8E;
const INT_GATE_DPL3: u8 = 0xEE;

#[repr(C, align(8))]
struct Idt([GateDescriptor; IDT_ENTRIES]);

static IDT: Mutex<Idt> = Mutex::new(Idt([GateDescriptor::missing(); IDT_ENTRIES]));

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

/// Populate and load the table.
pub fn init() {
    let mut idt = IDT.lock();

    for (vector, &thunk) in entry::EXCEPTION_THUNKS.iter().enumerate() {
        idt.0[vector] = GateDescriptor::new(thunk as u32, TRAP_GATE_DPL0);
    }

    idt.0[IRQ_BASE as usize] = GateDescriptor::new(entry::irq0_timer as u32, INT_GATE_DPL0);
    idt.0[IRQ_BASE as usize + 1] = GateDescriptor::new(entry::irq1_keyboard as u32, INT_GATE_DPL0);
    idt.0[IRQ_BASE as usize + 8] = GateDescriptor::new(entry::irq8_rtc as u32, INT_GATE_DPL0);

    idt.0[SYSCALL_VECTOR as usize] =
        GateDescriptor::new(entry::syscall_gate as u32, INT_GATE_DPL3);

    let pointer = IdtPointer {
        limit: (IDT_ENTRIES * core::mem::size_of::<GateDescriptor>() - 1) as u16,
        base: idt.0.as_ptr() as u32,
    };

    // SAFETY: The descriptor table lives in a static and every installed
    // gate points at a thunk from entry.rs with the matching frame
    // discipline. lidt only latches the pointer.
    unsafe {
        core::arch::asm!(
            "lidt [{}]",
            in(reg) &pointer,
            options(readonly, nostack, preserves_flags),
        );
    }
}
