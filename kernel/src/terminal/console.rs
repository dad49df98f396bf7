//! Console output with the kernel's line discipline.
//!
//! A [`Writer`] owns a screen plus a cursor and understands newline,
//! backspace, 4-column tabs, wrapping and scrolling. The global console
//! is the writer for whichever terminal is currently scheduled; the
//! scheduler retargets it on every switch, so `print!` always lands on
//! the right page without the call sites knowing about terminals.

use core::fmt;

use spin::Mutex;

use super::vga::{self, Cell, Screen, ATTRIB, BLANK, HEIGHT, WIDTH};
use crate::arch;

const TAB_STOP: usize = 4;

pub struct Writer {
    pub screen: Screen,
    pub x: usize,
    pub y: usize,
    /// Mirror the cursor to the CRT controller (only true while the
    /// writer targets the real framebuffer).
    pub hw_cursor: bool,
}

impl Writer {
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.newline(),
            0x08 => self.backspace(),
            b'\t' => self.tab(),
            byte => self.put_glyph(byte),
        }
        if self.hw_cursor {
            vga::set_hw_cursor(self.x, self.y);
        }
    }

    fn put_glyph(&mut self, byte: u8) {
        self.screen.put(self.x, self.y, Cell { glyph: byte, attr: ATTRIB });
        self.x += 1;
        if self.x == WIDTH {
            self.newline();
        }
    }

    fn newline(&mut self) {
        self.x = 0;
        self.y += 1;
        if self.y == HEIGHT {
            self.screen.scroll_up();
            self.y = HEIGHT - 1;
        }
    }

    fn backspace(&mut self) {
        if self.x > 0 {
            self.x -= 1;
            self.screen.put(self.x, self.y, BLANK);
        }
    }

    fn tab(&mut self) {
        loop {
            self.put_glyph(b' ');
            if self.x % TAB_STOP == 0 {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.screen.clear();
        self.x = 0;
        self.y = 0;
        if self.hw_cursor {
            vga::set_hw_cursor(0, 0);
        }
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

struct ConsoleCell(Mutex<Option<Writer>>);

static CONSOLE: ConsoleCell = ConsoleCell(Mutex::new(None));

/// Run `f` against the console writer with interrupts disabled. Lazily
/// targets the framebuffer on first use so early boot prints work.
pub fn with<R>(f: impl FnOnce(&mut Writer) -> R) -> R {
    arch::without_interrupts(|| {
        let mut slot = CONSOLE.0.lock();
        let writer = slot.get_or_insert_with(|| Writer {
            screen: vga::framebuffer(),
            x: 0,
            y: 0,
            hw_cursor: true,
        });
        f(writer)
    })
}

/// Swap the console onto another terminal's video target, restoring that
/// terminal's cursor.
pub fn retarget(screen: Screen, x: usize, y: usize, hw_cursor: bool) {
    with(|w| {
        w.screen = screen;
        w.x = x;
        w.y = y;
        w.hw_cursor = hw_cursor;
        if hw_cursor {
            vga::set_hw_cursor(x, y);
        }
    });
}

/// Cursor of the currently scheduled terminal.
pub fn cursor() -> (usize, usize) {
    with(|w| (w.x, w.y))
}

/// Raw byte write for `terminal_write`; returns the count written.
pub fn write_bytes(bytes: &[u8]) -> usize {
    with(|w| {
        for &b in bytes {
            w.write_byte(b);
        }
        bytes.len()
    })
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    with(|w| {
        let _ = w.write_fmt(args);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::string::String;
    use std::vec;

    fn writer() -> Writer {
        let page = Box::leak(vec![BLANK; vga::CELLS].into_boxed_slice());
        Writer {
            // SAFETY: Leaked box outlives the test.
            screen: unsafe { Screen::from_raw(page.as_mut_ptr()) },
            x: 0,
            y: 0,
            hw_cursor: false,
        }
    }

    fn row(w: &Writer, y: usize) -> String {
        (0..WIDTH).map(|x| w.screen.get(x, y).glyph as char).collect()
    }

    #[test]
    fn plain_text_and_newline() {
        let mut w = writer();
        for b in b"hi\nthere" {
            w.write_byte(*b);
        }
        assert!(row(&w, 0).starts_with("hi "));
        assert!(row(&w, 1).starts_with("there "));
        assert_eq!((w.x, w.y), (5, 1));
    }

    #[test]
    fn backspace_erases_within_line() {
        let mut w = writer();
        for b in b"ab" {
            w.write_byte(*b);
        }
        w.write_byte(0x08);
        assert_eq!(w.x, 1);
        assert_eq!(w.screen.get(1, 0), BLANK);
        // At column zero backspace is a no-op.
        w.write_byte(0x08);
        w.write_byte(0x08);
        assert_eq!(w.x, 0);
    }

    #[test]
    fn tab_advances_to_four_column_stop() {
        let mut w = writer();
        w.write_byte(b'a');
        w.write_byte(b'\t');
        assert_eq!(w.x, 4);
        w.write_byte(b'\t');
        assert_eq!(w.x, 8);
    }

    #[test]
    fn wrap_at_line_end() {
        let mut w = writer();
        for _ in 0..WIDTH + 3 {
            w.write_byte(b'z');
        }
        assert_eq!((w.x, w.y), (3, 1));
    }

    #[test]
    fn scroll_at_screen_bottom() {
        let mut w = writer();
        w.write_byte(b'A');
        for _ in 0..HEIGHT {
            w.write_byte(b'\n');
        }
        // 'A' scrolled off; cursor pinned to the last row.
        assert_eq!(w.y, HEIGHT - 1);
        assert_eq!(w.screen.get(0, 0), BLANK);
    }
}
