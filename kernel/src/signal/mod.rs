//! Software signals.
//!
//! Five user-visible numbers ordered by priority (0 highest) plus the
//! kernel-internal SYSKILL. Delivery happens on the way back to ring 3:
//! the trap dispatcher calls [`on_return_to_user`] just before the frame
//! is popped, so a pending signal either rewrites the frame to enter the
//! user's handler or runs the default handler, which terminates the
//! process.
//!
//! Entering a handler saves the interrupted trap frame in the PCB (the
//! kernel-stack snapshot, bounded at [`SNAPSHOT_WORDS`] words) and masks
//! further delivery; `sigreturn` restores the frame verbatim, so the
//! interrupted system call's return value reaches the user untouched.

use crate::arch::TrapFrame;
use crate::error::KernelError;
use crate::mm::{self, uaccess};
use crate::process::{self, exec};

/// Signal numbers, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Signal {
    DivZero = 0,
    Segfault = 1,
    Interrupt = 2,
    Alarm = 3,
    User1 = 4,
    /// Kernel-internal kill; no user handler can be installed for it.
    SysKill = 5,
}

impl Signal {
    pub fn number(self) -> u8 {
        self as u8
    }

    fn from_number(n: u8) -> Option<Signal> {
        match n {
            0 => Some(Signal::DivZero),
            1 => Some(Signal::Segfault),
            2 => Some(Signal::Interrupt),
            3 => Some(Signal::Alarm),
            4 => Some(Signal::User1),
            5 => Some(Signal::SysKill),
            _ => None,
        }
    }
}

/// Count of signals a user handler may be installed for (0..=4).
pub const HANDLED_SIGNALS: usize = 5;

/// Explicit "no signal pending" sentinel. Any real number compares lower,
/// so the priority rule accepts the first signal by construction rather
/// than by accident.
pub const NO_SIGNAL: u8 = 255;

/// Size of the kernel-stack snapshot taken around a user handler, in
/// 32-bit words. A full trap frame is 17 words; the bound leaves margin
/// and is asserted fail-closed at capture time.
pub const SNAPSHOT_WORDS: usize = 27;

/// Saved kernel-stack snapshot: the interrupted trap frame by words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedFrame {
    words: [u32; SNAPSHOT_WORDS],
    len: usize,
}

impl SavedFrame {
    /// Capture `frame`. Fails (and the caller falls back to the default
    /// handler) if the frame would overflow the snapshot buffer.
    pub fn capture(frame: &TrapFrame) -> Option<SavedFrame> {
        if TrapFrame::WORDS > SNAPSHOT_WORDS {
            return None;
        }
        let mut words = [0u32; SNAPSHOT_WORDS];
        // SAFETY: TrapFrame is repr(C) and composed entirely of u32
        // fields, so viewing it as words is well defined.
        let src = unsafe {
            core::slice::from_raw_parts(frame as *const TrapFrame as *const u32, TrapFrame::WORDS)
        };
        words[..TrapFrame::WORDS].copy_from_slice(src);
        Some(SavedFrame {
            words,
            len: TrapFrame::WORDS,
        })
    }

    /// Write the snapshot back over the live frame.
    pub fn restore_into(&self, frame: &mut TrapFrame) {
        // SAFETY: Same layout argument as capture(); len never exceeds
        // TrapFrame::WORDS.
        let dst = unsafe {
            core::slice::from_raw_parts_mut(frame as *mut TrapFrame as *mut u32, TrapFrame::WORDS)
        };
        dst[..self.len].copy_from_slice(&self.words[..self.len]);
    }
}

/// Per-PCB signal state.
pub struct SigState {
    pending: u8,
    pub masked: bool,
    handlers: [Option<u32>; HANDLED_SIGNALS],
    saved: Option<SavedFrame>,
}

impl SigState {
    pub fn new() -> SigState {
        SigState {
            pending: NO_SIGNAL,
            masked: false,
            handlers: [None; HANDLED_SIGNALS],
            saved: None,
        }
    }

    /// Priority acceptance: a signal lands iff delivery is unmasked and
    /// its number is strictly higher priority (lower) than what is
    /// already pending. Returns whether it was accepted.
    pub fn accept(&mut self, sig: Signal) -> bool {
        if self.masked || sig.number() >= self.pending {
            return false;
        }
        self.pending = sig.number();
        true
    }

    pub fn pending(&self) -> Option<Signal> {
        Signal::from_number(self.pending)
    }

    pub fn clear_pending(&mut self) {
        self.pending = NO_SIGNAL;
    }

    /// Install (or with address 0, reset) a user handler.
    pub fn set_handler(&mut self, number: usize, address: u32) -> Result<(), KernelError> {
        if number >= HANDLED_SIGNALS {
            return Err(KernelError::InvalidArgument {
                name: "signal number",
                value: number,
            });
        }
        self.handlers[number] = if address == 0 { None } else { Some(address) };
        Ok(())
    }

    pub fn handler(&self, sig: Signal) -> Option<u32> {
        self.handlers.get(sig.number() as usize).copied().flatten()
    }
}

impl Default for SigState {
    fn default() -> Self {
        SigState::new()
    }
}

/// Post `sig` to the process currently scheduled on `tid`. Interrupt
/// context: backs off silently when either table is mid-mutation.
/// Returns whether the signal was accepted.
pub fn send_to_terminal(tid: usize, sig: Signal) -> bool {
    let Some(Some(pid)) = crate::terminal::try_with(|ts| ts[tid].pcb) else {
        return false;
    };
    process::try_with(|table| {
        table
            .get_mut(pid)
            .map(|pcb| pcb.signals.accept(sig))
            .unwrap_or(false)
    })
    .unwrap_or(false)
}

enum Decision {
    Nothing,
    Handler { sig: Signal, address: u32 },
    Default,
}

/// Called on every trap exit that returns to ring 3, with the live frame.
/// Either does nothing, redirects the frame into a user handler, or runs
/// the default handler (terminate).
pub fn on_return_to_user(frame: &mut TrapFrame) {
    let decision = process::with(|table| {
        let Some(pcb) = table.current() else {
            return Decision::Nothing;
        };
        pcb.user_esp = frame.user_esp;

        if pcb.signals.masked {
            return Decision::Nothing;
        }
        let Some(sig) = pcb.signals.pending() else {
            return Decision::Nothing;
        };

        let Some(address) = pcb.signals.handler(sig) else {
            return Decision::Default;
        };

        // Commit to the handler: snapshot the kernel stack state and mask
        // further delivery. A snapshot that does not fit fails closed into
        // the default handler.
        let Some(saved) = SavedFrame::capture(frame) else {
            log::warn!("signal {}: snapshot overflow, using default", sig.number());
            return Decision::Default;
        };
        let new_esp = frame.user_esp.wrapping_sub(8);
        if !uaccess::write_u32(new_esp, mm::TRAMPOLINE_VA)
            || !uaccess::write_u32(new_esp.wrapping_add(4), sig.number() as u32)
        {
            return Decision::Default;
        }
        pcb.signals.saved = Some(saved);
        pcb.signals.masked = true;
        pcb.signals.clear_pending();
        Decision::Handler { sig, address }
    });

    match decision {
        Decision::Nothing => {}
        Decision::Handler { sig, address } => {
            log::info!("entering user handler {:#x} for signal {}", address, sig.number());
            frame.user_esp = frame.user_esp.wrapping_sub(8);
            frame.eip = address;
        }
        Decision::Default => {
            // Every default handler terminates the offender. The pending
            // number stays set so halt can report a fatal-exception
            // status.
            exec::halt_current(0);
        }
    }
}

/// `sigreturn` system call: restore the snapshot over the live frame and
/// reopen delivery. The restored frame carries the interrupted call's
/// return value in its eax.
pub fn sigreturn(frame: &mut TrapFrame) -> Result<(), KernelError> {
    process::with(|table| {
        let pcb = table.current().ok_or(KernelError::NotInitialized {
            subsystem: "process table",
        })?;
        let saved = pcb.signals.saved.take().ok_or(KernelError::InvalidArgument {
            name: "sigreturn without a handler frame",
            value: 0,
        })?;
        saved.restore_into(frame);
        pcb.signals.masked = false;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::USER_CS;

    // -- Acceptance policy --------------------------------------------------

    #[test]
    fn first_signal_always_lands() {
        let mut s = SigState::new();
        assert!(s.accept(Signal::User1));
        assert_eq!(s.pending(), Some(Signal::User1));
    }

    #[test]
    fn higher_priority_preempts_pending() {
        let mut s = SigState::new();
        assert!(s.accept(Signal::Alarm));
        assert!(s.accept(Signal::Interrupt));
        assert_eq!(s.pending(), Some(Signal::Interrupt));
        // Lower priority cannot displace it.
        assert!(!s.accept(Signal::Alarm));
        assert!(!s.accept(Signal::Interrupt));
        // Equal priority is refused too.
        assert_eq!(s.pending(), Some(Signal::Interrupt));
    }

    #[test]
    fn mask_blocks_everything() {
        let mut s = SigState::new();
        s.masked = true;
        assert!(!s.accept(Signal::DivZero));
        assert_eq!(s.pending(), None);
    }

    #[test]
    fn pending_numbers_stay_in_domain() {
        let mut s = SigState::new();
        for sig in [Signal::User1, Signal::Alarm, Signal::Interrupt, Signal::Segfault] {
            s.accept(sig);
            let n = s.pending().unwrap().number();
            assert!(n <= 4);
        }
        s.clear_pending();
        assert_eq!(s.pending(), None);
    }

    // -- Handler table ------------------------------------------------------

    #[test]
    fn handler_install_and_reset() {
        let mut s = SigState::new();
        s.set_handler(2, 0x0804_9000).unwrap();
        assert_eq!(s.handler(Signal::Interrupt), Some(0x0804_9000));
        s.set_handler(2, 0).unwrap();
        assert_eq!(s.handler(Signal::Interrupt), None);
        assert!(s.set_handler(5, 0x1000).is_err());
        assert!(s.set_handler(200, 0x1000).is_err());
    }

    #[test]
    fn syskill_has_no_handler_slot() {
        let s = SigState::new();
        assert_eq!(s.handler(Signal::SysKill), None);
    }

    // -- Snapshot -----------------------------------------------------------

    fn sample_frame() -> TrapFrame {
        let mut frame = TrapFrame::default();
        frame.eax = 0x1234;
        frame.ebx = 7;
        frame.eip = 0x0804_8100;
        frame.cs = USER_CS as u32;
        frame.eflags = 0x202;
        frame.user_esp = 0x083F_F000;
        frame.user_ss = 0x2B;
        frame
    }

    #[test]
    fn snapshot_round_trip_is_exact() {
        let original = sample_frame();
        let saved = SavedFrame::capture(&original).unwrap();

        let mut live = original;
        // Simulate the handler detour clobbering the frame.
        live.eip = 0xdead;
        live.user_esp = 0xbeef;
        live.eax = 0;

        saved.restore_into(&mut live);
        assert_eq!(live, original);
    }

    #[test]
    fn snapshot_preserves_syscall_return_value() {
        let mut frame = sample_frame();
        frame.eax = 187; // a read() that returned 187 bytes
        let saved = SavedFrame::capture(&frame).unwrap();
        frame.eax = 0;
        saved.restore_into(&mut frame);
        assert_eq!(frame.eax, 187);
    }
}
