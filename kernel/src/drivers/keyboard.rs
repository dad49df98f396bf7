//! PS/2 keyboard driver.
//!
//! Scan-code set 1 decoding is delegated to `pc-keyboard`; this module
//! owns the per-terminal line editing (echo, backspace, enter), the
//! completed-line hand-off into the terminal input buffers, and the
//! control combinations: Alt+F1..F3 switch the foreground terminal,
//! Ctrl+C posts INTERRUPT to the foreground's process, Ctrl+L clears the
//! screen, Ctrl+S toggles the scheduler.
//!
//! All keystrokes are processed against the *foreground* terminal; a
//! background process never sees input until its terminal is brought
//! forward.

use lazy_static::lazy_static;
use pc_keyboard::{
    layouts::Us104Key, DecodedKey, HandleControl, KeyCode, KeyEvent, KeyState, Keyboard,
    ScancodeSet1,
};
use spin::Mutex;

use crate::arch;
use crate::signal::{self, Signal};
use crate::terminal::{self, LINE_BUFFER_SIZE, TERMINAL_COUNT};
use crate::{sched, sync};

/// Edit buffer holds one line in progress; the last byte is reserved for
/// the newline.
const EDIT_LIMIT: usize = LINE_BUFFER_SIZE - 1;

struct EditBuffer {
    buf: [u8; LINE_BUFFER_SIZE],
    len: usize,
}

impl EditBuffer {
    const fn new() -> EditBuffer {
        EditBuffer {
            buf: [0; LINE_BUFFER_SIZE],
            len: 0,
        }
    }
}

struct KeyboardState {
    decoder: Keyboard<Us104Key, ScancodeSet1>,
    alt: bool,
    ctrl: bool,
    edit: [EditBuffer; TERMINAL_COUNT],
}

lazy_static! {
    static ref STATE: Mutex<KeyboardState> = Mutex::new(KeyboardState {
        decoder: Keyboard::new(ScancodeSet1::new(), Us104Key, HandleControl::Ignore),
        alt: false,
        ctrl: false,
        edit: [EditBuffer::new(), EditBuffer::new(), EditBuffer::new()],
    });
}

/// What one keystroke asks the kernel to do, decided under the state
/// lock and performed after it is released (several of these reacquire
/// other tables or switch context).
enum Action {
    None,
    SwitchTerminal(usize),
    Interrupt,
    ClearActive,
    ToggleScheduler,
    Echo(u8),
    /// Echo the newline and hand the completed line to the terminal.
    Line { echo: u8, line: [u8; LINE_BUFFER_SIZE], len: usize },
}

/// IRQ1 entry: fetch the scan code, acknowledge, process.
pub fn handle_irq() {
    #[cfg(target_arch = "x86")]
    {
        // SAFETY: Reading port 0x60 fetches the pending scan code; the
        // controller expects exactly one read per byte interrupt.
        let code = unsafe { x86::io::inb(0x60) };
        // EOI before any action: Alt+Fn may context-switch away and the
        // line must not stay blocked meanwhile.
        crate::arch::x86::pic::ack(1);
        handle_scancode(code);
    }
}

/// Decode one scan byte and carry out whatever it means.
pub fn handle_scancode(code: u8) {
    let active = sched::active_tid();

    let action = arch::without_interrupts(|| {
        let mut state = STATE.lock();
        let event = match state.decoder.add_byte(code) {
            Ok(Some(event)) => event,
            Ok(None) => return Action::None,
            Err(_) => {
                log::debug!("undecodable scan byte {:#x}", code);
                return Action::None;
            }
        };
        state.note_modifiers(&event);
        let Some(decoded) = state.decoder.process_keyevent(event) else {
            return Action::None;
        };
        state.classify(decoded, active)
    });

    perform(action, active);
}

impl KeyboardState {
    fn note_modifiers(&mut self, event: &KeyEvent) {
        let down = event.state == KeyState::Down;
        match event.code {
            KeyCode::LAlt | KeyCode::RAltGr => self.alt = down,
            KeyCode::LControl | KeyCode::RControl => self.ctrl = down,
            _ => {}
        }
    }

    fn classify(&mut self, decoded: DecodedKey, active: usize) -> Action {
        if self.alt {
            if let DecodedKey::RawKey(code) = decoded {
                match code {
                    KeyCode::F1 => return Action::SwitchTerminal(0),
                    KeyCode::F2 => return Action::SwitchTerminal(1),
                    KeyCode::F3 => return Action::SwitchTerminal(2),
                    _ => {}
                }
            }
            return Action::None;
        }

        let DecodedKey::Unicode(ch) = decoded else {
            return Action::None;
        };

        if self.ctrl {
            return match ch.to_ascii_lowercase() {
                'c' => Action::Interrupt,
                'l' => Action::ClearActive,
                's' => Action::ToggleScheduler,
                _ => Action::None,
            };
        }

        self.edit_input(ch, active)
    }

    /// Line editing for a plain keystroke on the foreground terminal.
    fn edit_input(&mut self, ch: char, active: usize) -> Action {
        let edit = &mut self.edit[active];
        match ch {
            '\n' | '\r' => {
                if edit.len < LINE_BUFFER_SIZE {
                    edit.buf[edit.len] = b'\n';
                    edit.len += 1;
                }
                let action = Action::Line {
                    echo: b'\n',
                    line: edit.buf,
                    len: edit.len,
                };
                edit.len = 0;
                action
            }
            '\u{8}' => {
                if edit.len > 0 {
                    edit.len -= 1;
                    Action::Echo(0x08)
                } else {
                    Action::None
                }
            }
            '\t' => {
                if edit.len < EDIT_LIMIT {
                    edit.buf[edit.len] = b'\t';
                    edit.len += 1;
                    Action::Echo(b'\t')
                } else {
                    Action::None
                }
            }
            ch if (' '..='~').contains(&ch) => {
                if edit.len < EDIT_LIMIT {
                    edit.buf[edit.len] = ch as u8;
                    edit.len += 1;
                    Action::Echo(ch as u8)
                } else {
                    Action::None
                }
            }
            _ => Action::None,
        }
    }
}

fn perform(action: Action, active: usize) {
    match action {
        Action::None => {}
        Action::SwitchTerminal(target) => sched::switch_foreground(target),
        Action::Interrupt => {
            if sync::in_critical() {
                return;
            }
            signal::send_to_terminal(active, Signal::Interrupt);
        }
        Action::ClearActive => {
            arch::without_interrupts(|| STATE.lock().edit[active].len = 0);
            sched::clear_active();
        }
        Action::ToggleScheduler => sched::toggle(),
        Action::Echo(byte) => terminal::echo_to_active(byte, sched::running_tid(), active),
        Action::Line { echo, line, len } => {
            terminal::echo_to_active(echo, sched::running_tid(), active);
            terminal::deliver_line(active, &line[..len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scan-code set 1 make codes.
    const SC_A: u8 = 0x1E;
    const SC_B: u8 = 0x30;
    const SC_ENTER: u8 = 0x1C;
    const SC_BACKSPACE: u8 = 0x0E;
    const SC_CTRL_DOWN: u8 = 0x1D;
    const SC_CTRL_UP: u8 = 0x9D;
    const SC_S: u8 = 0x1F;

    fn release(make: u8) -> u8 {
        make | 0x80
    }

    // One sequential test: the decoder, edit buffers, scheduler flag and
    // terminal input buffers are all globals.
    #[test]
    fn typing_editing_and_control_combos() {
        let _serial = crate::sync::testing::lock();
        let active = sched::active_tid();

        // "ab" with one backspace then enter delivers "a\n".
        for code in [SC_A, release(SC_A), SC_B, release(SC_B), SC_BACKSPACE, release(SC_BACKSPACE)]
        {
            handle_scancode(code);
        }
        handle_scancode(SC_ENTER);
        handle_scancode(release(SC_ENTER));

        let line = terminal::with(|ts| {
            assert!(ts[active].input.is_ready());
            let mut out = [0u8; 8];
            let n = ts[active].input.take_into(&mut out);
            (out, n)
        });
        assert_eq!(&line.0[..line.1], b"a\n");

        // Ctrl+S toggles the scheduler flag and types nothing.
        let before = sched::enabled();
        for code in [SC_CTRL_DOWN, SC_S, release(SC_S), SC_CTRL_UP] {
            handle_scancode(code);
        }
        assert_eq!(sched::enabled(), !before);
        sched::toggle(); // restore

        let empty = terminal::with(|ts| ts[active].input.is_ready());
        assert!(!empty);
    }

    #[test]
    fn line_overflow_is_clamped() {
        let mut state = KeyboardState {
            decoder: Keyboard::new(ScancodeSet1::new(), Us104Key, HandleControl::Ignore),
            alt: false,
            ctrl: false,
            edit: [EditBuffer::new(), EditBuffer::new(), EditBuffer::new()],
        };
        for _ in 0..200 {
            let _ = state.edit_input('x', 1);
        }
        assert_eq!(state.edit[1].len, EDIT_LIMIT);
        match state.edit_input('\n', 1) {
            Action::Line { len, .. } => assert_eq!(len, LINE_BUFFER_SIZE),
            _ => panic!("expected a completed line"),
        }
        assert_eq!(state.edit[1].len, 0);
    }
}
