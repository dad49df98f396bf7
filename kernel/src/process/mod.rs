//! Process pool and table.
//!
//! A fixed pool of six slots indexed by PID; slot allocation is a linear
//! scan for the lowest free index. The table also tracks which PID is
//! currently scheduled. There is exactly one PCB per live process and no
//! dynamic allocation anywhere.

pub mod exec;
pub mod pcb;

use spin::Mutex;

use crate::arch;
pub use pcb::{FdKind, FdTable, Pcb};

pub const MAX_PROCESSES: usize = 6;

/// Process identifier, an index into the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u8);

impl Pid {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed process pool plus the running-PID cursor.
pub struct ProcessTable {
    slots: [Option<Pcb>; MAX_PROCESSES],
    running: Option<Pid>,
}

impl ProcessTable {
    pub const fn new() -> ProcessTable {
        ProcessTable {
            slots: [None, None, None, None, None, None],
            running: None,
        }
    }

    /// Lowest free PID, if any. Does not reserve the slot; callers insert
    /// a PCB under the same lock.
    pub fn find_free(&self) -> Option<Pid> {
        self.slots
            .iter()
            .position(|s| s.is_none())
            .map(|i| Pid(i as u8))
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn insert(&mut self, pcb: Pcb) -> &mut Pcb {
        let index = pcb.pid.index();
        debug_assert!(self.slots[index].is_none());
        self.slots[index].insert(pcb)
    }

    pub fn free(&mut self, pid: Pid) -> Option<Pcb> {
        self.slots[pid.index()].take()
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.slots.get(pid.index()).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.slots.get_mut(pid.index()).and_then(|s| s.as_mut())
    }

    pub fn running(&self) -> Option<Pid> {
        self.running
    }

    pub fn set_running(&mut self, pid: Option<Pid>) {
        self.running = pid;
    }

    /// PCB of the running process.
    pub fn current(&mut self) -> Option<&mut Pcb> {
        let pid = self.running?;
        self.get_mut(pid)
    }

    pub fn current_ref(&self) -> Option<&Pcb> {
        let pid = self.running?;
        self.get(pid)
    }
}

static PROCESSES: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

/// Run `f` over the table with interrupts disabled.
pub fn with<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> R {
    arch::without_interrupts(|| f(&mut PROCESSES.lock()))
}

/// Interrupt-context access; `None` means the table was mid-mutation and
/// the caller should back off (the old `progress` discipline).
pub fn try_with<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> Option<R> {
    arch::without_interrupts(|| PROCESSES.try_lock().map(|mut t| f(&mut t)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(n: usize) -> ProcessTable {
        let mut table = ProcessTable::new();
        for _i in 0..n {
            let pid = table.find_free().unwrap();
            table.insert(Pcb::new(pid, 0, pid, b"shell", b""));
        }
        table
    }

    #[test]
    fn lowest_free_pid_scan() {
        let mut table = table_with(3);
        assert_eq!(table.find_free(), Some(Pid(3)));

        table.free(Pid(1));
        assert_eq!(table.find_free(), Some(Pid(1)));
        assert_eq!(table.live_count(), 2);
    }

    #[test]
    fn pool_exhaustion() {
        let table = table_with(MAX_PROCESSES);
        assert_eq!(table.find_free(), None);
        assert_eq!(table.live_count(), MAX_PROCESSES);
    }

    #[test]
    fn running_cursor_follows_switches() {
        let mut table = table_with(2);
        assert!(table.current().is_none());
        table.set_running(Some(Pid(1)));
        assert_eq!(table.current().unwrap().pid, Pid(1));
        table.set_running(Some(Pid(0)));
        assert_eq!(table.current_ref().unwrap().pid, Pid(0));
    }
}
