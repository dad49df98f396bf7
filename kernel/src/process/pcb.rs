//! Process control block and the file-descriptor table.

use crate::arch::Context;
use crate::error::KernelError;
use crate::signal::SigState;

use super::Pid;

pub const MAX_COMMAND: usize = 32;
pub const MAX_ARGS: usize = 128;
pub const FD_COUNT: usize = 8;
/// First descriptor slot `open` may hand out; 0 and 1 are pinned.
pub const FIRST_USER_FD: usize = 2;

pub const FD_STDIN: usize = 0;
pub const FD_STDOUT: usize = 1;

/// What a file descriptor is bound to. Replaces the per-driver operation
/// vector of function pointers: dispatch is a `match` on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    Stdin,
    Stdout,
    /// Virtualized RTC; the stored frequency acts as the wait divisor.
    Rtc { freq: u32 },
    /// Directory stream; `index` is the next dentry to report.
    Directory { index: usize },
    /// Regular file with a byte position.
    File { inode: usize, position: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdTable {
    slots: [Option<FdKind>; FD_COUNT],
}

impl FdTable {
    pub fn new() -> FdTable {
        let mut slots = [None; FD_COUNT];
        slots[FD_STDIN] = Some(FdKind::Stdin);
        slots[FD_STDOUT] = Some(FdKind::Stdout);
        FdTable { slots }
    }

    /// Bind `kind` to the lowest free slot in 2..7.
    pub fn open(&mut self, kind: FdKind) -> Result<usize, KernelError> {
        for fd in FIRST_USER_FD..FD_COUNT {
            if self.slots[fd].is_none() {
                self.slots[fd] = Some(kind);
                return Ok(fd);
            }
        }
        Err(KernelError::Exhausted {
            resource: "file descriptors",
        })
    }

    /// Close a user slot. 0 and 1 are not closable.
    pub fn close(&mut self, fd: usize) -> Result<(), KernelError> {
        if !(FIRST_USER_FD..FD_COUNT).contains(&fd) || self.slots[fd].is_none() {
            return Err(KernelError::BadFileDescriptor { fd });
        }
        self.slots[fd] = None;
        Ok(())
    }

    pub fn get(&self, fd: usize) -> Result<&FdKind, KernelError> {
        self.slots
            .get(fd)
            .and_then(|s| s.as_ref())
            .ok_or(KernelError::BadFileDescriptor { fd })
    }

    pub fn get_mut(&mut self, fd: usize) -> Result<&mut FdKind, KernelError> {
        self.slots
            .get_mut(fd)
            .and_then(|s| s.as_mut())
            .ok_or(KernelError::BadFileDescriptor { fd })
    }

    /// Drop every user descriptor (process teardown).
    pub fn close_all_user(&mut self) {
        for slot in &mut self.slots[FIRST_USER_FD..] {
            *slot = None;
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        FdTable::new()
    }
}

/// Process control block.
pub struct Pcb {
    pub pid: Pid,
    /// Terminal this process renders to and reads from.
    pub terminal: usize,
    /// Parent PID; a base shell is its own parent.
    pub parent: Pid,
    pub command: [u8; MAX_COMMAND],
    pub command_len: usize,
    pub args: [u8; MAX_ARGS],
    pub arg_len: usize,
    pub fds: FdTable,
    /// The parent's kernel context inside `execute`, resumed by `halt`.
    pub parent_ctx: Context,
    /// This process's kernel stack top, loaded into TSS.esp0 while it
    /// runs.
    pub tss_esp: u32,
    pub signals: SigState,
    /// Last user stack pointer observed on a kernel entry; zero until the
    /// process first reaches ring 3.
    pub user_esp: u32,
}

impl Pcb {
    pub fn new(pid: Pid, terminal: usize, parent: Pid, command: &[u8], args: &[u8]) -> Pcb {
        let mut cmd = [0u8; MAX_COMMAND];
        let command_len = command.len().min(MAX_COMMAND);
        cmd[..command_len].copy_from_slice(&command[..command_len]);

        let mut arg_buf = [0u8; MAX_ARGS];
        let arg_len = args.len().min(MAX_ARGS);
        arg_buf[..arg_len].copy_from_slice(&args[..arg_len]);

        Pcb {
            pid,
            terminal,
            parent,
            command: cmd,
            command_len,
            args: arg_buf,
            arg_len,
            fds: FdTable::new(),
            parent_ctx: Context::default(),
            tss_esp: crate::mm::kernel_stack_top(pid.index()),
            signals: SigState::new(),
            user_esp: 0,
        }
    }

    /// True for the first process of a terminal; halt restarts these
    /// instead of letting the terminal go empty.
    pub fn is_base_shell(&self) -> bool {
        self.parent == self.pid
    }

    pub fn command_str(&self) -> &str {
        core::str::from_utf8(&self.command[..self.command_len]).unwrap_or("?")
    }
}

/// Split a command line into the program name and its trimmed argument
/// string: leading blanks skipped, the name runs to the first blank, the
/// argument is everything after with both ends trimmed.
pub fn parse_command(cmd: &[u8]) -> Result<(&[u8], &[u8]), KernelError> {
    let start = cmd.iter().position(|&b| b != b' ').ok_or(
        KernelError::InvalidArgument {
            name: "command",
            value: 0,
        },
    )?;
    let rest = &cmd[start..];
    let name_len = rest.iter().position(|&b| b == b' ').unwrap_or(rest.len());
    let name = &rest[..name_len];

    let tail = &rest[name_len..];
    let args = match tail.iter().position(|&b| b != b' ') {
        Some(first) => {
            let last = tail.iter().rposition(|&b| b != b' ').unwrap_or(first);
            &tail[first..=last]
        }
        None => &[],
    };
    if args.len() > MAX_ARGS {
        return Err(KernelError::InvalidArgument {
            name: "argument length",
            value: args.len(),
        });
    }
    Ok((name, args))
}
