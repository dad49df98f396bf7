//! The three virtual terminals.
//!
//! Each terminal owns a 128-byte input line buffer filled by the keyboard
//! driver and drained by `read` on the STDIN descriptor, a saved cursor
//! for the periods it is descheduled, its scheduler context, and the
//! vidmap/initialized flags the context switch consults. Video page
//! ownership itself is arbitrated by the scheduler; a terminal only knows
//! which backing page is nominally its own.

pub mod console;
pub mod vga;

use spin::Mutex;

use crate::arch::{self, Context};
use crate::process::Pid;

pub const TERMINAL_COUNT: usize = 3;
pub const LINE_BUFFER_SIZE: usize = 128;

/// Completed-line hand-off buffer between the keyboard driver and
/// `terminal read`.
pub struct LineBuffer {
    buf: [u8; LINE_BUFFER_SIZE],
    len: usize,
    ready: bool,
}

impl LineBuffer {
    pub const fn new() -> LineBuffer {
        LineBuffer {
            buf: [0; LINE_BUFFER_SIZE],
            len: 0,
            ready: false,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.ready = false;
    }

    /// Keyboard-side: replace the contents and mark the line complete.
    pub fn store(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(LINE_BUFFER_SIZE);
        self.buf[..len].copy_from_slice(&bytes[..len]);
        self.len = len;
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Reader-side: copy out up to `out.len()` bytes and reset.
    pub fn take_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.len.min(out.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.clear();
        n
    }
}

pub struct Terminal {
    pub id: usize,
    /// Cursor while this terminal is descheduled.
    pub saved_x: usize,
    pub saved_y: usize,
    /// Becomes true when the scheduler first switches here and spawns the
    /// base shell.
    pub initialized: bool,
    /// The scheduled process on this terminal has an active vidmap page.
    pub vidmap: bool,
    /// Currently scheduled process for this terminal.
    pub pcb: Option<Pid>,
    /// Kernel context while descheduled.
    pub context: Context,
    /// TSS.esp0 snapshot while descheduled.
    pub tss_esp: u32,
    pub input: LineBuffer,
}

impl Terminal {
    pub const fn new(id: usize) -> Terminal {
        Terminal {
            id,
            saved_x: 0,
            saved_y: 0,
            initialized: false,
            vidmap: false,
            pcb: None,
            context: Context {
                eip: 0,
                esp: 0,
                ebp: 0,
                ebx: 0,
                esi: 0,
                edi: 0,
            },
            tss_esp: 0,
            input: LineBuffer::new(),
        }
    }
}

static TERMINALS: Mutex<[Terminal; TERMINAL_COUNT]> =
    Mutex::new([Terminal::new(0), Terminal::new(1), Terminal::new(2)]);

/// Run `f` over the terminal table with interrupts disabled.
pub fn with<R>(f: impl FnOnce(&mut [Terminal; TERMINAL_COUNT]) -> R) -> R {
    arch::without_interrupts(|| f(&mut TERMINALS.lock()))
}

/// Interrupt-context access: backs off instead of spinning if the table
/// is mid-mutation.
pub fn try_with<R>(f: impl FnOnce(&mut [Terminal; TERMINAL_COUNT]) -> R) -> Option<R> {
    arch::without_interrupts(|| TERMINALS.try_lock().map(|mut t| f(&mut t)))
}

/// Clear the framebuffer and put the cursor hardware in a known state.
pub fn init() {
    vga::enable_hw_cursor();
    console::with(|w| w.clear());
}

/// Read one completed input line for `tid` into `buf`. Clears any stale
/// line first, then waits (interrupts open) for the keyboard to deliver
/// the next one. Returns the number of bytes copied,
/// `min(buf.len(), line length)`.
pub fn read(tid: usize, buf: &mut [u8]) -> usize {
    with(|ts| ts[tid].input.clear());
    loop {
        let taken = with(|ts| {
            if ts[tid].input.is_ready() {
                Some(ts[tid].input.take_into(buf))
            } else {
                None
            }
        });
        if let Some(n) = taken {
            return n;
        }
        arch::relax();
    }
}

/// `terminal_write`: raw bytes to the scheduled terminal's video target.
pub fn write_bytes(bytes: &[u8]) -> usize {
    console::write_bytes(bytes)
}

/// Keyboard hand-off: a completed line (including its newline) for `tid`.
pub fn deliver_line(tid: usize, bytes: &[u8]) {
    with(|ts| ts[tid].input.store(bytes));
}

/// Echo one typed byte onto the foreground terminal. When the foreground
/// terminal is also the scheduled one its console writer is live and owns
/// the framebuffer; otherwise write through a transient writer using the
/// terminal's saved cursor.
pub fn echo_to_active(byte: u8, running_tid: Option<usize>, active_tid: usize) {
    if running_tid == Some(active_tid) {
        console::with(|w| w.write_byte(byte));
        return;
    }
    with(|ts| {
        let t = &mut ts[active_tid];
        let mut writer = console::Writer {
            screen: vga::framebuffer(),
            x: t.saved_x,
            y: t.saved_y,
            hw_cursor: true,
        };
        writer.write_byte(byte);
        t.saved_x = writer.x;
        t.saved_y = writer.y;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_hand_off() {
        let mut lb = LineBuffer::new();
        assert!(!lb.is_ready());

        lb.store(b"hello\n");
        assert!(lb.is_ready());

        let mut out = [0u8; 16];
        let n = lb.take_into(&mut out);
        assert_eq!(&out[..n], b"hello\n");
        assert!(!lb.is_ready());
    }

    #[test]
    fn take_clamps_to_reader_buffer() {
        let mut lb = LineBuffer::new();
        lb.store(b"0123456789\n");
        let mut out = [0u8; 4];
        assert_eq!(lb.take_into(&mut out), 4);
        assert_eq!(&out, b"0123");
    }

    #[test]
    fn store_clamps_to_line_capacity() {
        let mut lb = LineBuffer::new();
        let long = [b'x'; 200];
        lb.store(&long);
        let mut out = [0u8; 200];
        assert_eq!(lb.take_into(&mut out), LINE_BUFFER_SIZE);
    }

    #[test]
    fn read_discards_stale_line_then_waits_for_delivery() {
        // A line delivered before read starts is stale input and dropped.
        deliver_line(1, b"stale\n");
        let feeder = std::thread::spawn(|| {
            std::thread::sleep(std::time::Duration::from_millis(50));
            deliver_line(1, b"cat frame0.txt\n");
        });
        let mut out = [0u8; 64];
        let n = read(1, &mut out);
        assert_eq!(&out[..n], b"cat frame0.txt\n");
        feeder.join().unwrap();
    }
}
