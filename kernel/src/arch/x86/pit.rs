//! Programmable interval timer (8254), channel 0.
//!
//! The scheduler's heartbeat. Divisor 0x6000 gives roughly 48 ticks per
//! second, enough granularity for round-robin over three terminals
//! without drowning the machine in interrupts.

use x86::io::outb;

pub const PIT_IRQ: u8 = 0;

const CHANNEL0: u16 = 0x40;
const COMMAND: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, square-wave mode, binary counting.
const MODE3_SQUARE_WAVE: u8 = 0x36;

const DIVISOR: u16 = 0x6000;

/// Program channel 0 for the scheduling tick.
pub fn init() {
    // SAFETY: Mode/command then the 16-bit divisor, low byte first, per
    // the 8254 datasheet. The PIT has no other driver in this kernel.
    unsafe {
        outb(COMMAND, MODE3_SQUARE_WAVE);
        outb(CHANNEL0, (DIVISOR & 0xFF) as u8);
        outb(CHANNEL0, (DIVISOR >> 8) as u8);
    }
}
