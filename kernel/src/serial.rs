//! COM1 serial output, used as the logging sink.
//!
//! A minimal 16550 driver: the boot console proper is out of scope, the
//! kernel only ever transmits. On non-x86 (hosted test) builds the writer
//! is a no-op.

use core::fmt;

use spin::Mutex;

/// COM1 base port.
#[cfg(target_arch = "x86")]
const COM1: u16 = 0x3F8;

pub struct SerialPort {
    initialized: bool,
}

static SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort { initialized: false });

impl SerialPort {
    #[cfg(target_arch = "x86")]
    fn init(&mut self) {
        // SAFETY: Standard 16550 bring-up on the COM1 register block:
        // disable interrupts, set DLAB to program a 38400 baud divisor,
        // 8n1, FIFO enabled and cleared. These ports have no other owner.
        unsafe {
            x86::io::outb(COM1 + 1, 0x00);
            x86::io::outb(COM1 + 3, 0x80);
            x86::io::outb(COM1, 0x03);
            x86::io::outb(COM1 + 1, 0x00);
            x86::io::outb(COM1 + 3, 0x03);
            x86::io::outb(COM1 + 2, 0xC7);
        }
        self.initialized = true;
    }

    #[cfg(target_arch = "x86")]
    fn write_byte(&mut self, byte: u8) {
        if !self.initialized {
            self.init();
        }
        // SAFETY: Polling the line-status register (bit 5 = transmit
        // holding register empty) then writing the data register is the
        // defined 16550 transmit protocol.
        unsafe {
            while x86::io::inb(COM1 + 5) & 0x20 == 0 {
                core::hint::spin_loop();
            }
            x86::io::outb(COM1, byte);
        }
    }

    #[cfg(not(target_arch = "x86"))]
    fn write_byte(&mut self, _byte: u8) {
        self.initialized = true;
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    crate::arch::without_interrupts(|| {
        // With interrupts off the lock cannot be contended on a single CPU.
        let _ = write!(SERIAL1.lock(), "{}", args);
    });
}
