//! Kernel error types.
//!
//! Everything user-visible collapses to `-1` in the syscall return
//! register; internally each failure carries enough context to log a
//! useful diagnostic.

use core::fmt;

/// Result type for the system-call surface. `Ok` carries the value placed
/// in the accumulator on return to user space.
pub type SyscallResult = Result<usize, KernelError>;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A user-supplied pointer was null or outside the user slot.
    BadAddress { addr: usize },
    /// A file-descriptor index was out of range or not open.
    BadFileDescriptor { fd: usize },
    /// A numeric argument was outside its domain.
    InvalidArgument { name: &'static str, value: usize },
    /// Unknown system-call number.
    InvalidSyscall { number: usize },
    /// Named object does not exist in the file system.
    NotFound { name: &'static str },
    /// The object exists but its type does not support the operation.
    UnsupportedType { file_type: u32 },
    /// The image loaded for execute is not a valid executable.
    NotExecutable,
    /// A fixed table has no free slot.
    Exhausted { resource: &'static str },
    /// The file system is read-only.
    ReadOnly,
    /// Operation requires a device that has not been armed.
    NotOpen { device: &'static str },
    /// Device was already armed and does not support re-arming.
    AlreadyOpen { device: &'static str },
    /// The file-system image failed structural validation at mount.
    CorruptImage { reason: &'static str },
    /// No argument string was recorded for the current process.
    NoArguments,
    /// Subsystem used before its `init()` ran.
    NotInitialized { subsystem: &'static str },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::BadAddress { addr } => write!(f, "bad address {:#x}", addr),
            KernelError::BadFileDescriptor { fd } => write!(f, "bad file descriptor {}", fd),
            KernelError::InvalidArgument { name, value } => {
                write!(f, "invalid {}: {}", name, value)
            }
            KernelError::InvalidSyscall { number } => {
                write!(f, "system call #{} is not valid", number)
            }
            KernelError::NotFound { name } => write!(f, "{} not found", name),
            KernelError::UnsupportedType { file_type } => {
                write!(f, "unsupported file type {}", file_type)
            }
            KernelError::NotExecutable => write!(f, "not an executable image"),
            KernelError::Exhausted { resource } => write!(f, "{} exhausted", resource),
            KernelError::ReadOnly => write!(f, "file system is read-only"),
            KernelError::NotOpen { device } => write!(f, "{} is not open", device),
            KernelError::AlreadyOpen { device } => write!(f, "{} is already open", device),
            KernelError::CorruptImage { reason } => write!(f, "corrupt fs image: {}", reason),
            KernelError::NoArguments => write!(f, "no argument recorded"),
            KernelError::NotInitialized { subsystem } => {
                write!(f, "{} used before init", subsystem)
            }
        }
    }
}
