//! Virtualized real-time clock.
//!
//! One hardware periodic interrupt at 1024 Hz serves all three
//! terminals. Each terminal has a countdown the RTC read path waits on
//! and an alarm accumulator that fires roughly every ten seconds.
//! Counters advance by 1.75 hardware ticks per interrupt, kept exact in
//! integer quarter-ticks (7 quarters per interrupt) so no floating point
//! enters the kernel.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::arch;
use crate::error::KernelError;
use crate::signal::{self, Signal};
use crate::terminal::TERMINAL_COUNT;

/// Hardware periodic rate.
const BASE_HZ: u32 = 1024;

/// Frequency a freshly opened RTC descriptor waits at.
pub const DEFAULT_FREQ: u32 = 2;

/// Counter advance per hardware interrupt, in quarter-ticks (1.75 × 4).
pub const TICK_QUARTERS: u32 = 7;

/// Alarm threshold: 10240 counts ≈ 10 s at the base rate.
pub const ALARM_THRESHOLD_QUARTERS: u32 = 10240 * 4;

static COUNTDOWN: [AtomicU32; TERMINAL_COUNT] =
    [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)];
static ALARM: [AtomicU32; TERMINAL_COUNT] =
    [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)];
static ARMED: AtomicBool = AtomicBool::new(false);

/// IRQ8 entry: acknowledge the device and the PIC, then advance the
/// virtual counters.
pub fn handle_irq() {
    #[cfg(target_arch = "x86")]
    {
        crate::arch::x86::rtc::ack_tick();
        crate::arch::x86::pic::ack(crate::arch::x86::rtc::RTC_IRQ);
    }
    advance();
}

/// One virtual tick: countdowns drain toward zero, alarm accumulators
/// climb toward the threshold. Crossing the threshold resets the
/// accumulator and posts ALARM to whatever is scheduled on that terminal
/// (dropped silently if the tables are mid-mutation, like any
/// interrupt-context signal).
pub fn advance() {
    for tid in 0..TERMINAL_COUNT {
        let _ = COUNTDOWN[tid].fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            if v > 0 {
                Some(v.saturating_sub(TICK_QUARTERS))
            } else {
                None
            }
        });

        let accumulated = ALARM[tid].fetch_add(TICK_QUARTERS, Ordering::AcqRel) + TICK_QUARTERS;
        if accumulated >= ALARM_THRESHOLD_QUARTERS {
            ALARM[tid].store(0, Ordering::Release);
            signal::send_to_terminal(tid, Signal::Alarm);
        }
    }
}

/// Device-level open: arm the periodic interrupt once. A second open is
/// refused.
pub fn open() -> Result<(), KernelError> {
    if ARMED.swap(true, Ordering::AcqRel) {
        return Err(KernelError::AlreadyOpen { device: "rtc" });
    }
    reset_counters();
    #[cfg(target_arch = "x86")]
    crate::arch::x86::rtc::arm_periodic();
    Ok(())
}

/// Descriptor-level arming: first RTC open arms the device, later opens
/// share it.
pub fn ensure_armed() {
    let _ = open();
}

fn reset_counters() {
    for tid in 0..TERMINAL_COUNT {
        COUNTDOWN[tid].store(0, Ordering::Release);
    }
}

/// Restart a terminal's alarm window (a fresh program gets a full ten
/// seconds).
pub fn reset_alarm(tid: usize) {
    ALARM[tid].store(0, Ordering::Release);
}

/// Valid user-settable wait frequencies: powers of two in 2..=1024.
pub fn valid_freq(freq: u32) -> bool {
    (2..=BASE_HZ).contains(&freq) && freq.is_power_of_two()
}

/// Quarter-ticks a wait at `freq` Hz lasts.
pub fn countdown_quarters(freq: u32) -> u32 {
    (BASE_HZ / freq) * 4
}

/// Block the calling terminal until its countdown expires: `1024/freq`
/// virtual ticks. The wait spins with interrupts open so the device (and
/// the scheduler) keep running.
pub fn wait(tid: usize, freq: u32) -> Result<(), KernelError> {
    if !ARMED.load(Ordering::Acquire) {
        return Err(KernelError::NotOpen { device: "rtc" });
    }
    if freq == 0 || freq > BASE_HZ {
        return Err(KernelError::InvalidArgument {
            name: "rtc frequency",
            value: freq as usize,
        });
    }
    COUNTDOWN[tid].store(countdown_quarters(freq), Ordering::Release);
    while COUNTDOWN[tid].load(Ordering::Acquire) > 0 {
        arch::relax();
    }
    Ok(())
}
