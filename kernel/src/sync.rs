//! Kernel critical sections.
//!
//! One processor, no nesting interrupts: the only asynchronous writers are
//! the IRQ handlers. Code that mutates paging, video ownership or the
//! process table takes a [`CriticalGuard`]; the timer tick and the other
//! asynchronous paths consult [`in_critical`] and back off instead of
//! racing the mutation.

use core::sync::atomic::{AtomicUsize, Ordering};

static CRITICAL_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// RAII marker for a kernel critical section.
///
/// While at least one guard is alive the scheduler refuses to switch
/// contexts and a CPU fault is treated as unrecoverable.
pub struct CriticalGuard(());

impl CriticalGuard {
    pub fn enter() -> Self {
        CRITICAL_DEPTH.fetch_add(1, Ordering::Acquire);
        CriticalGuard(())
    }
}

impl Drop for CriticalGuard {
    fn drop(&mut self) {
        CRITICAL_DEPTH.fetch_sub(1, Ordering::Release);
    }
}

/// True while any critical section is in progress.
pub fn in_critical() -> bool {
    CRITICAL_DEPTH.load(Ordering::Acquire) > 0
}

/// Serialization for unit tests that exercise cross-module kernel globals
/// (process table, terminals, paging, the foreground cursor). The
/// standard harness runs tests in parallel; these must not interleave.
#[cfg(test)]
pub mod testing {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static GLOBAL: Mutex<()> = Mutex::new(());

    pub fn lock() -> MutexGuard<'static, ()> {
        GLOBAL.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_nests_and_releases() {
        assert!(!in_critical());
        {
            let _a = CriticalGuard::enter();
            assert!(in_critical());
            {
                let _b = CriticalGuard::enter();
                assert!(in_critical());
            }
            assert!(in_critical());
        }
        assert!(!in_critical());
    }
}
