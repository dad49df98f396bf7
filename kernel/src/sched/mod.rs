//! Round-robin scheduler and multi-terminal video arbitration.
//!
//! Three terminal slots act as independent threads of control. The timer
//! tick rotates between them; a switch saves the outgoing terminal's
//! cursor, kernel context and TSS stack, reroutes console output and the
//! vidmap page to the incoming terminal's video target, retargets the
//! user 4 MiB page, and swaps stacks. The first switch into a terminal
//! finds it uninitialized and executes its base shell instead of
//! resuming anything.
//!
//! Interrupt-context entry points use try-locks throughout: if any table
//! is mid-mutation the switch is skipped, which is the old global
//! `progress` flag expressed as lock discipline.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::arch::{self, Context};
use crate::mm::{self, paging};
use crate::process::{self, exec};
use crate::sync::{self, CriticalGuard};
use crate::terminal::{self, console, vga, TERMINAL_COUNT};

/// Foreground terminal: the one whose contents occupy the framebuffer.
static ACTIVE: AtomicUsize = AtomicUsize::new(0);

/// Round-robin enable. When disabled the foreground terminal runs
/// uninterrupted; background terminals still get the CPU if the
/// foreground's process is descheduled.
static ENABLED: AtomicBool = AtomicBool::new(true);

pub fn active_tid() -> usize {
    ACTIVE.load(Ordering::Acquire)
}

pub fn enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Ctrl+S: flip round-robin scheduling.
pub fn toggle() {
    let was = ENABLED.fetch_xor(true, Ordering::AcqRel);
    log::info!("scheduler {}", if was { "disabled" } else { "enabled" });
}

/// Terminal of the running process, if the table is readable right now.
pub fn running_tid() -> Option<usize> {
    process::try_with(|t| t.current_ref().map(|p| p.terminal)).flatten()
}

/// Next terminal in rotation.
pub fn next_terminal(tid: usize) -> usize {
    (tid + 1) % TERMINAL_COUNT
}

/// Where a terminal's output goes when the scheduler switches to it:
/// true for the real framebuffer, false for its backing page. Normative
/// rule: the foreground terminal renders live; everything else renders to
/// backing, except that with the scheduler disabled an uninitialized
/// target is brought up on screen.
pub fn video_route(target: usize, active: usize, enabled: bool, initialized: bool) -> bool {
    target == active || (!enabled && !initialized)
}

/// Timer tick entry. Decides whether this tick preempts, and where to.
pub fn tick() {
    if sync::in_critical() {
        return;
    }
    let Some(running) = running_tid() else {
        return;
    };
    if !enabled() && running == active_tid() {
        return;
    }
    context_switch(next_terminal(running));
}

enum SwitchPlan {
    /// Resume a previously descheduled terminal.
    Resume { save: *mut Context, resume: Context },
    /// First visit: spawn the base shell.
    Bootstrap { save: *mut Context, tid: usize },
}

/// Switch the CPU to `target`'s thread of control. No-op if `target`
/// already runs, or if any table is contended.
pub fn context_switch(target: usize) {
    if target >= TERMINAL_COUNT || sync::in_critical() {
        return;
    }

    let plan = {
        let _crit = CriticalGuard::enter();
        prepare_switch(target)
    };

    // The stack jump happens with no guard held: a dormant context must
    // not keep the kernel marked critical.
    match plan {
        None => {}
        Some(SwitchPlan::Resume { save, resume }) => {
            // SAFETY: save points into the outgoing terminal's slot, which
            // stays valid while that terminal is descheduled; resume was
            // captured on the incoming terminal's intact kernel stack.
            unsafe {
                if arch::ctx_save(save) == arch::CTX_FIRST {
                    arch::ctx_resume(&resume, 1);
                }
            }
            // Resumed: some later switch came back to this terminal.
        }
        Some(SwitchPlan::Bootstrap { save, tid }) => {
            // SAFETY: See above for save.
            let first = unsafe { arch::ctx_save(save) == arch::CTX_FIRST };
            if first {
                exec::spawn_base_shell(tid);
            }
            // Resumed later via the saved context.
        }
    }
}

/// Phase A of a switch: everything that touches tables, under try-locks.
fn prepare_switch(target: usize) -> Option<SwitchPlan> {
    process::try_with(|pt| {
        terminal::try_with(|ts| {
            let current = pt.current_ref()?.terminal;
            if current == target {
                return None;
            }

            // Save the outgoing terminal's screen and kernel state.
            let (x, y) = console::cursor();
            ts[current].saved_x = x;
            ts[current].saved_y = y;
            ts[current].tss_esp = arch::tss::esp0();
            let save = &mut ts[current].context as *mut Context;

            // Vidmap page follows the incoming terminal's flag.
            if ts[target].vidmap {
                paging::enable_vidmap();
            } else {
                paging::disable_vidmap();
            }

            // Route the incoming terminal's output.
            let to_vram = video_route(target, active_tid(), enabled(), ts[target].initialized);
            let (screen, frame) = if to_vram {
                (vga::framebuffer(), mm::VIDEO_MEM)
            } else {
                (vga::backing(target), vga::backing_frame(target))
            };
            paging::set_video_target(frame);
            console::retarget(screen, ts[target].saved_x, ts[target].saved_y, to_vram);

            if !ts[target].initialized {
                ts[target].initialized = true;
                console::with(|w| w.clear());
                Some(SwitchPlan::Bootstrap { save, tid: target })
            } else {
                let pid = ts[target].pcb?;
                paging::remap_user_slot(pid.index());
                arch::tss::set_esp0(ts[target].tss_esp);
                pt.set_running(Some(pid));
                Some(SwitchPlan::Resume {
                    save,
                    resume: ts[target].context,
                })
            }
        })
    })
    .flatten()
    .flatten()
}

/// Alt+F1..F3: bring `target` to the foreground. Swaps the framebuffer
/// with the backing pages atomically under the critical guard, reroutes
/// whatever is currently rendering, then switches context into the new
/// foreground.
pub fn switch_foreground(target: usize) {
    if target >= TERMINAL_COUNT || target == active_tid() || sync::in_critical() {
        return;
    }

    {
        let _crit = CriticalGuard::enter();
        let old = active_tid();

        let mut framebuffer = vga::framebuffer();
        let mut old_backing = vga::backing(old);
        let new_backing = vga::backing(target);
        old_backing.copy_from(&framebuffer);
        framebuffer.copy_from(&new_backing);

        ACTIVE.store(target, Ordering::Release);

        // The running terminal's console may have just gained or lost
        // framebuffer ownership.
        match running_tid() {
            Some(running) if running == old => {
                console::with(|w| {
                    w.screen = vga::backing(old);
                    w.hw_cursor = false;
                });
                paging::set_video_target(vga::backing_frame(old));
            }
            Some(running) if running == target => {
                console::with(|w| {
                    w.screen = vga::framebuffer();
                    w.hw_cursor = true;
                    vga::set_hw_cursor(w.x, w.y);
                });
                paging::set_video_target(mm::VIDEO_MEM);
            }
            _ => {}
        }
    }

    context_switch(target);
}

/// Ctrl+L: wipe the foreground terminal's screen.
pub fn clear_active() {
    if sync::in_critical() {
        return;
    }
    let _crit = CriticalGuard::enter();
    let active = active_tid();
    if running_tid() == Some(active) {
        console::with(|w| w.clear());
    } else {
        vga::framebuffer().clear();
        let _ = terminal::try_with(|ts| {
            ts[active].saved_x = 0;
            ts[active].saved_y = 0;
        });
        vga::set_hw_cursor(0, 0);
    }
}

/// Boot hand-off: terminal 0 becomes foreground and runs its base shell.
/// Terminals 1 and 2 come up lazily as the rotation first reaches them.
pub fn start() -> ! {
    ACTIVE.store(0, Ordering::Release);
    terminal::with(|ts| ts[0].initialized = true);
    console::retarget(vga::framebuffer(), 0, 0, true);
    exec::spawn_base_shell(0)
}
