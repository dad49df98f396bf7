//! `execute` and `halt`: process birth and death.
//!
//! `execute` loads a program into the next free slot, hands the CPU to it
//! with an `iret`, and from the caller's point of view simply blocks
//! until the child halts: the child's PCB keeps the parent's saved kernel
//! context, and `halt` jumps straight back into it with the exit status.
//! A base shell has no parent to return to; halting one re-executes
//! "shell" on the same terminal so a terminal never goes empty.

use crate::arch;
use crate::error::KernelError;
use crate::fs::{self, FileType};
use crate::mm::{self, paging, uaccess};
use crate::sync::CriticalGuard;
use crate::{drivers, terminal, SyscallResult};

use super::pcb::{self, Pcb};
use super::Pid;

/// Status a parent observes when its child was killed by a fatal
/// exception signal.
pub const STATUS_KILLED_BY_EXCEPTION: u32 = 256;

/// User-space sigreturn trampoline: `mov eax, 10; int 0x80`. Copied into
/// every user slot at a fixed address; signal delivery pushes that
/// address, never a kernel one.
const TRAMPOLINE_CODE: [u8; 7] = [0xB8, 0x0A, 0x00, 0x00, 0x00, 0xCD, 0x80];

/// Everything needed to start a program, validated but not yet visible in
/// any table.
struct Prepared {
    pcb: Pcb,
    entry: u32,
}

/// Parse, look up, verify and load `cmd`. On success the child's slot is
/// mapped with the image in place; on failure every global is exactly as
/// before (the user mapping is restored to the running process).
fn prepare(cmd: &[u8], tid: usize, parent: Option<Pid>) -> Result<Prepared, KernelError> {
    let (name, args) = pcb::parse_command(cmd)?;
    let fs = fs::image()?;

    let dentry = fs.read_dentry_by_name(name)?;
    if dentry.file_type != FileType::Regular {
        return Err(KernelError::NotExecutable);
    }
    let entry = fs.executable_entry(dentry.inode)?;
    let size = fs.file_size(dentry.inode)?;

    let pid = super::with(|t| t.find_free()).ok_or(KernelError::Exhausted {
        resource: "process pool",
    })?;

    paging::remap_user_slot(pid.index());
    let loaded = load_image(fs, dentry.inode, size);
    if let Err(err) = loaded {
        if let Some(current) = super::with(|t| t.running()) {
            paging::remap_user_slot(current.index());
        }
        return Err(err);
    }

    let parent = parent.unwrap_or(pid);
    Ok(Prepared {
        pcb: Pcb::new(pid, tid, parent, name, args),
        entry,
    })
}

fn load_image(fs: &fs::FsImage, inode: usize, size: usize) -> Result<(), KernelError> {
    let dst = uaccess::user_slice_mut(mm::PROGRAM_LOAD_VA, size as u32).ok_or(
        KernelError::BadAddress {
            addr: mm::PROGRAM_LOAD_VA as usize,
        },
    )?;
    fs.read_data(inode, 0, dst)?;

    if !uaccess::copy_to_user(mm::TRAMPOLINE_VA, &TRAMPOLINE_CODE) {
        return Err(KernelError::BadAddress {
            addr: mm::TRAMPOLINE_VA as usize,
        });
    }
    Ok(())
}

/// Make the prepared process the scheduled one on its terminal. Returns a
/// pointer to the slot where the parent's context belongs; the slot is
/// stable until the PCB is freed.
fn commit(prepared_pcb: Pcb) -> *mut arch::Context {
    let pid = prepared_pcb.pid;
    let tid = prepared_pcb.terminal;

    arch::tss::set_esp0(prepared_pcb.tss_esp);
    drivers::vrtc::reset_alarm(tid);

    let ctx_ptr = super::with(|t| {
        let pcb = t.insert(prepared_pcb);
        let ptr = &mut pcb.parent_ctx as *mut arch::Context;
        t.set_running(Some(pid));
        ptr
    });
    terminal::with(|ts| ts[tid].pcb = Some(pid));

    log::info!("spawned pid {} on terminal {}", pid, tid);
    ctx_ptr
}

/// System-call `execute`: run `cmd` as a child of the current process and
/// return the status its halt eventually reports.
pub fn execute(cmd: &[u8]) -> SyscallResult {
    let crit = CriticalGuard::enter();

    let (parent_pid, tid) = super::with(|t| t.current_ref().map(|p| (p.pid, p.terminal)))
        .ok_or(KernelError::NotInitialized {
            subsystem: "process table",
        })?;

    let prepared = prepare(cmd, tid, Some(parent_pid))?;
    let entry = prepared.entry;
    let parent_ctx = commit(prepared.pcb);

    drop(crit);
    // SAFETY: parent_ctx points into the child's live PCB slot; this frame
    // stays intact while the child runs, and halt resumes it exactly once.
    let status = unsafe { arch::ctx_save(parent_ctx) };
    if status == arch::CTX_FIRST {
        // SAFETY: prepare() loaded a verified executable at the image base
        // of the slot now mapped at the user page.
        unsafe { arch::iret_to_user(entry, mm::USER_STACK_TOP) };
    }
    // Second return: the child halted and resumed us with its status.
    Ok(status as usize)
}

/// First process of a terminal. Never returns; the shell's halt path
/// restarts it rather than resuming anything.
pub fn spawn_base_shell(tid: usize) -> ! {
    let crit = CriticalGuard::enter();
    match prepare(b"shell", tid, None) {
        Ok(prepared) => {
            let entry = prepared.entry;
            let _ = commit(prepared.pcb);
            drop(crit);
            // SAFETY: Same contract as in execute().
            unsafe { arch::iret_to_user(entry, mm::USER_STACK_TOP) }
        }
        Err(err) => {
            drop(crit);
            println!("<!> cannot start shell on terminal {}: {}", tid, err);
            log::error!("terminal {} unusable, no shell: {}", tid, err);
            arch::halt_loop()
        }
    }
}

/// Terminate the running process. Reports `status` to the parent's
/// `execute`, or [`STATUS_KILLED_BY_EXCEPTION`] when a fatal exception
/// signal is pending. Base shells restart instead.
pub fn halt_current(status: u32) -> ! {
    let crit = CriticalGuard::enter();

    let Some((pid, tid, parent, pending, is_base)) = super::with(|t| {
        t.current_ref()
            .map(|p| (p.pid, p.terminal, p.parent, p.signals.pending(), p.is_base_shell()))
    }) else {
        panic!("halt with no running process");
    };

    let status = match pending {
        Some(crate::signal::Signal::DivZero) | Some(crate::signal::Signal::Segfault)
            if status == 0 =>
        {
            STATUS_KILLED_BY_EXCEPTION
        }
        _ => status,
    };

    log::info!("halting pid {} on terminal {} with status {}", pid, tid, status);

    if is_base {
        println!("<!> base shell of terminal {} is dead, restarting", tid);
        super::with(|t| {
            t.free(pid);
            t.set_running(None);
        });
        terminal::with(|ts| {
            ts[tid].pcb = None;
            ts[tid].vidmap = false;
        });
        paging::disable_vidmap();
        drop(crit);
        spawn_base_shell(tid)
    }

    paging::disable_vidmap();
    paging::remap_user_slot(parent.index());

    let parent_ctx = super::with(|t| {
        // Close FDs 2..7 before the slot goes away.
        if let Some(child) = t.get_mut(pid) {
            child.fds.close_all_user();
        }
        let child = t.free(pid).map(|c| c.parent_ctx);
        t.set_running(Some(parent));
        if let Some(parent_pcb) = t.get_mut(parent) {
            arch::tss::set_esp0(parent_pcb.tss_esp);
        }
        child
    });
    terminal::with(|ts| {
        ts[tid].pcb = Some(parent);
        ts[tid].vidmap = false;
    });

    let Some(parent_ctx) = parent_ctx else {
        panic!("halt: pid {} had no PCB", pid);
    };

    drop(crit);
    // SAFETY: The context was captured by the parent's execute() on the
    // parent's kernel stack, which is intact: the parent has been
    // suspended in execute() the whole time.
    unsafe { arch::ctx_resume(&parent_ctx, status) }
}
