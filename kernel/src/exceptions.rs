//! CPU exception reporter.
//!
//! Faults taken in ring 3 are survivable: the reporter prints a
//! diagnostic on the console and posts DIV_ZERO (vector 0) or SEGFAULT
//! (anything else) to the offending process; the signal dispatch on the
//! way back to user space then runs the default handler, which
//! terminates it with status 256. A fault taken in the kernel, or while
//! a critical section was marked in progress, is unrecoverable and
//! halts the machine.

use crate::arch::{self, TrapFrame};
use crate::mm;
use crate::signal::Signal;
use crate::{process, sched, sync};

/// Canonical names for vectors 0..19.
const NAMES: [&str; 20] = [
    "Division by Zero",
    "RESERVED",
    "Non-maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "Bound Range Exceeded",
    "Invalid Opcode",
    "Coprocessor Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid Task State Segment",
    "Segment Not Present",
    "Stack Segment Fault",
    "General Protection Fault",
    "Page Fault",
    "RESERVED",
    "x87 Floating Point",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point",
];

/// Vectors for which the CPU pushes a genuine error code.
const HAS_ERROR_CODE: [bool; 20] = [
    false, false, false, false, false, false, false, false, true, false, true, true, true, true,
    true, false, false, true, false, false,
];

/// Name for a vector, shared with tests and logging.
pub fn name(vector: usize) -> &'static str {
    NAMES.get(vector).copied().unwrap_or("UNKNOWN")
}

/// Error code to report: the CPU's where one exists, -1 otherwise.
pub fn reported_error(vector: usize, error_code: u32) -> i32 {
    if HAS_ERROR_CODE.get(vector).copied().unwrap_or(false) {
        error_code as i32
    } else {
        -1
    }
}

/// Signal a fault maps to: divide error gets its own number, every other
/// survivable fault is a segfault.
pub fn signal_for(vector: usize) -> Signal {
    if vector == 0 {
        Signal::DivZero
    } else {
        Signal::Segfault
    }
}

/// Trap-layer entry for vectors 0..19.
pub fn handle(frame: &mut TrapFrame) {
    let vector = frame.vector as usize;

    if !frame.from_user() || sync::in_critical() {
        // No user context to blame, or the fault interrupted a critical
        // mutation: state is unrecoverable by design.
        panic!(
            "{} exception in kernel at {:#010x}, error {:#x}",
            name(vector),
            frame.eip,
            frame.error_code
        );
    }

    report(frame, vector);

    process::with(|t| {
        if let Some(pcb) = t.current() {
            pcb.signals.accept(signal_for(vector));
        }
    });
}

fn report(frame: &TrapFrame, vector: usize) {
    let error = reported_error(vector, frame.error_code);
    println!();
    if error >= 0 {
        println!("<!> {} Exception {:#x}", name(vector), error);
    } else {
        println!("<!> {} Exception", name(vector));
    }

    let (pid, tid, command, tss_esp) = process::with(|t| match t.current_ref() {
        Some(p) => (p.pid.index(), p.terminal, p.command, p.tss_esp),
        None => (usize::MAX, usize::MAX, [0u8; 32], 0),
    });
    let command = core::str::from_utf8(&command).unwrap_or("?");
    let command = command.trim_end_matches('\0');

    let expected = if pid < process::MAX_PROCESSES {
        mm::kernel_stack_top(pid)
    } else {
        0
    };
    let actual = arch::tss::esp0();
    println!(
        "Active TID {}, Running {}, PID {}, TID {}, KSP {:#010x} {}",
        sched::active_tid(),
        command,
        pid,
        tid,
        actual,
        if actual == tss_esp && actual == expected {
            "Verified"
        } else {
            "Unverified"
        }
    );

    log::error!(
        "{} exception: pid {} tid {} eip {:#010x}",
        name(vector),
        pid,
        tid,
        frame.eip
    );
}
