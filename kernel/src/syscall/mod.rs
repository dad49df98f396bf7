//! System-call surface.
//!
//! User space enters through interrupt 0x80 with the call number in EAX
//! and up to three arguments in EBX/ECX/EDX; the result goes back in EAX,
//! with every failure collapsed to -1. Descriptor dispatch is a match on
//! the slot's [`FdKind`]; the suspending reads (STDIN line wait, RTC
//! tick wait) extract what they need under the table lock and then wait
//! with nothing held.

use crate::arch::TrapFrame;
use crate::drivers::vrtc;
use crate::error::{KernelError, SyscallResult};
use crate::fs::{self, FileType, FsImage};
use crate::mm::{self, paging, uaccess};
use crate::process::{self, exec, FdKind, Pcb};
use crate::process::pcb::{FD_STDIN, FD_STDOUT};
use crate::{sched, signal, terminal};

/// Call numbers of the 0x80 gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SyscallNumber {
    Halt = 1,
    Execute = 2,
    Read = 3,
    Write = 4,
    Open = 5,
    Close = 6,
    GetArgs = 7,
    VidMap = 8,
    SetHandler = 9,
    SigReturn = 10,
}

impl SyscallNumber {
    fn from_raw(raw: usize) -> Option<SyscallNumber> {
        match raw {
            1 => Some(SyscallNumber::Halt),
            2 => Some(SyscallNumber::Execute),
            3 => Some(SyscallNumber::Read),
            4 => Some(SyscallNumber::Write),
            5 => Some(SyscallNumber::Open),
            6 => Some(SyscallNumber::Close),
            7 => Some(SyscallNumber::GetArgs),
            8 => Some(SyscallNumber::VidMap),
            9 => Some(SyscallNumber::SetHandler),
            10 => Some(SyscallNumber::SigReturn),
            _ => None,
        }
    }
}

/// Longest command line `execute` accepts: a 32-byte program name, the
/// separator and a 128-byte argument string.
const MAX_CMDLINE: usize = 192;

/// Entry point from the trap dispatcher.
pub fn handle(frame: &mut TrapFrame) {
    let number = frame.eax as usize;
    let (arg1, arg2, arg3) = (frame.ebx, frame.ecx, frame.edx);

    let result: SyscallResult = match SyscallNumber::from_raw(number) {
        Some(SyscallNumber::Halt) => exec::halt_current(arg1 & 0xFF),
        Some(SyscallNumber::Execute) => sys_execute(arg1),
        Some(SyscallNumber::Read) => sys_read(arg1 as usize, arg2, arg3),
        Some(SyscallNumber::Write) => sys_write(arg1 as usize, arg2, arg3),
        Some(SyscallNumber::Open) => sys_open(arg1),
        Some(SyscallNumber::Close) => sys_close(arg1 as usize),
        Some(SyscallNumber::GetArgs) => sys_getargs(arg1, arg2),
        Some(SyscallNumber::VidMap) => sys_vidmap(arg1),
        Some(SyscallNumber::SetHandler) => sys_set_handler(arg1 as usize, arg2),
        Some(SyscallNumber::SigReturn) => match signal::sigreturn(frame) {
            // The restored frame already carries the interrupted call's
            // return value; do not touch eax again.
            Ok(()) => return,
            Err(err) => Err(err),
        },
        None => Err(KernelError::InvalidSyscall { number }),
    };

    match result {
        Ok(value) => frame.eax = value as u32,
        Err(err) => {
            println!("<!> {}", err);
            log::warn!("syscall #{} failed: {}", number, err);
            frame.eax = -1i32 as u32;
        }
    }
}

fn current_terminal() -> Result<usize, KernelError> {
    process::with(|t| t.current_ref().map(|p| p.terminal)).ok_or(KernelError::NotInitialized {
        subsystem: "process table",
    })
}

fn sys_execute(cmd_addr: u32) -> SyscallResult {
    let mut cmdline = [0u8; MAX_CMDLINE];
    let len = uaccess::read_cstr(cmd_addr, &mut cmdline).ok_or(KernelError::BadAddress {
        addr: cmd_addr as usize,
    })?;
    exec::execute(&cmdline[..len])
}

fn sys_read(fd: usize, buf_addr: u32, len: u32) -> SyscallResult {
    if (len as i32) < 0 {
        return Err(KernelError::InvalidArgument {
            name: "read length",
            value: len as usize,
        });
    }
    if fd == FD_STDOUT {
        return Err(KernelError::BadFileDescriptor { fd });
    }

    // Snapshot the descriptor so the waiting paths run with no lock held.
    let (kind, tid) = process::with(|t| -> Result<(FdKind, usize), KernelError> {
        let pcb = t.current().ok_or(KernelError::NotInitialized {
            subsystem: "process table",
        })?;
        Ok((*pcb.fds.get(fd)?, pcb.terminal))
    })?;

    match kind {
        FdKind::Stdin => {
            let buf = uaccess::user_slice_mut(buf_addr, len).ok_or(KernelError::BadAddress {
                addr: buf_addr as usize,
            })?;
            Ok(terminal::read(tid, buf))
        }
        FdKind::Rtc { freq } => {
            vrtc::wait(tid, freq)?;
            Ok(0)
        }
        FdKind::File { .. } | FdKind::Directory { .. } => {
            let buf = uaccess::user_slice_mut(buf_addr, len).ok_or(KernelError::BadAddress {
                addr: buf_addr as usize,
            })?;
            let fs = fs::image()?;
            process::with(|t| {
                let pcb = t.current().ok_or(KernelError::NotInitialized {
                    subsystem: "process table",
                })?;
                read_fd(pcb, fs, fd, buf)
            })
        }
        FdKind::Stdout => Err(KernelError::BadFileDescriptor { fd }),
    }
}

fn sys_write(fd: usize, buf_addr: u32, len: u32) -> SyscallResult {
    if (len as i32) < 0 {
        return Err(KernelError::InvalidArgument {
            name: "write length",
            value: len as usize,
        });
    }
    let buf = uaccess::user_slice(buf_addr, len).ok_or(KernelError::BadAddress {
        addr: buf_addr as usize,
    })?;
    process::with(|t| {
        let pcb = t.current().ok_or(KernelError::NotInitialized {
            subsystem: "process table",
        })?;
        write_fd(pcb, fd, buf)
    })
}

fn sys_open(name_addr: u32) -> SyscallResult {
    let mut name = [0u8; 64];
    let len = uaccess::read_cstr(name_addr, &mut name).ok_or(KernelError::BadAddress {
        addr: name_addr as usize,
    })?;
    let fs = fs::image()?;
    process::with(|t| {
        let pcb = t.current().ok_or(KernelError::NotInitialized {
            subsystem: "process table",
        })?;
        open_fd(pcb, fs, &name[..len])
    })
}

fn sys_close(fd: usize) -> SyscallResult {
    process::with(|t| {
        let pcb = t.current().ok_or(KernelError::NotInitialized {
            subsystem: "process table",
        })?;
        pcb.fds.close(fd)?;
        Ok(0)
    })
}

fn sys_getargs(buf_addr: u32, len: u32) -> SyscallResult {
    let buf = uaccess::user_slice_mut(buf_addr, len).ok_or(KernelError::BadAddress {
        addr: buf_addr as usize,
    })?;
    process::with(|t| {
        let pcb = t.current().ok_or(KernelError::NotInitialized {
            subsystem: "process table",
        })?;
        getargs(pcb, buf)
    })
}

fn sys_vidmap(out_addr: u32) -> SyscallResult {
    if !mm::vidmap_ptr_ok(out_addr) {
        return Err(KernelError::BadAddress {
            addr: out_addr as usize,
        });
    }
    let tid = current_terminal()?;

    terminal::with(|ts| ts[tid].vidmap = true);
    paging::enable_vidmap();
    let target = if tid == sched::active_tid() {
        mm::VIDEO_MEM
    } else {
        terminal::vga::backing_frame(tid)
    };
    paging::set_video_target(target);

    if !uaccess::write_u32(out_addr, mm::VIDMAP_VA) {
        return Err(KernelError::BadAddress {
            addr: out_addr as usize,
        });
    }
    Ok(0)
}

fn sys_set_handler(signum: usize, handler: u32) -> SyscallResult {
    process::with(|t| {
        let pcb = t.current().ok_or(KernelError::NotInitialized {
            subsystem: "process table",
        })?;
        pcb.signals.set_handler(signum, handler)?;
        Ok(0)
    })
}

// ---------------------------------------------------------------------------
// Descriptor-level operations, parameterized on the PCB and image so the
// host tests drive them directly.
// ---------------------------------------------------------------------------

/// Open `name` into the lowest free slot of 2..7, with the descriptor
/// shape fixed by the dentry's type.
pub(crate) fn open_fd(pcb: &mut Pcb, fs: &FsImage, name: &[u8]) -> SyscallResult {
    let dentry = fs.read_dentry_by_name(name)?;
    let kind = match dentry.file_type {
        FileType::Rtc => {
            vrtc::ensure_armed();
            FdKind::Rtc { freq: vrtc::DEFAULT_FREQ }
        }
        FileType::Directory => FdKind::Directory { index: 0 },
        FileType::Regular => FdKind::File {
            inode: dentry.inode,
            position: 0,
        },
    };
    pcb.fds.open(kind)
}

/// Read from a file or directory descriptor, advancing its position.
pub(crate) fn read_fd(
    pcb: &mut Pcb,
    fs: &FsImage,
    fd: usize,
    buf: &mut [u8],
) -> SyscallResult {
    match pcb.fds.get_mut(fd)? {
        FdKind::File { inode, position } => {
            let n = fs.read_data(*inode, *position, buf)?;
            *position += n;
            Ok(n)
        }
        FdKind::Directory { index } => match fs.read_dentry_by_index(*index) {
            Ok(dentry) => {
                let n = buf.len().min(fs::NAME_LEN);
                buf[..n].copy_from_slice(&dentry.name[..n]);
                *index += 1;
                Ok(n)
            }
            // Past the last entry: a directory read reports zero bytes.
            Err(_) => Ok(0),
        },
        _ => Err(KernelError::BadFileDescriptor { fd }),
    }
}

/// Write through a descriptor. Only STDOUT and the RTC accept writes; the
/// file system is read-only.
pub(crate) fn write_fd(pcb: &mut Pcb, fd: usize, buf: &[u8]) -> SyscallResult {
    if fd == FD_STDIN {
        return Err(KernelError::BadFileDescriptor { fd });
    }
    if fd == FD_STDOUT {
        return Ok(terminal::write_bytes(buf));
    }
    match pcb.fds.get_mut(fd)? {
        FdKind::Rtc { freq } => {
            let requested = parse_freq(buf)?;
            if !vrtc::valid_freq(requested) {
                return Err(KernelError::InvalidArgument {
                    name: "rtc frequency",
                    value: requested as usize,
                });
            }
            *freq = requested;
            Ok(0)
        }
        FdKind::File { .. } | FdKind::Directory { .. } => Err(KernelError::ReadOnly),
        FdKind::Stdin | FdKind::Stdout => Err(KernelError::BadFileDescriptor { fd }),
    }
}

/// The RTC write buffer carries the requested frequency as one
/// little-endian 32-bit value.
fn parse_freq(buf: &[u8]) -> Result<u32, KernelError> {
    if buf.len() < 4 {
        return Err(KernelError::InvalidArgument {
            name: "rtc frequency buffer",
            value: buf.len(),
        });
    }
    Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Copy the recorded argument string plus a terminator into `buf`.
pub(crate) fn getargs(pcb: &Pcb, buf: &mut [u8]) -> SyscallResult {
    if pcb.arg_len == 0 {
        return Err(KernelError::NoArguments);
    }
    if pcb.arg_len + 1 > buf.len() {
        return Err(KernelError::InvalidArgument {
            name: "getargs buffer",
            value: buf.len(),
        });
    }
    buf[..pcb.arg_len].copy_from_slice(&pcb.args[..pcb.arg_len]);
    buf[pcb.arg_len] = 0;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::BLOCK_SIZE;
    use crate::process::Pid;
    use std::vec;

    fn test_fs() -> FsImage {
        // Dentries: rtc device, the directory, two files.
        let mut image = vec![0u8; 5 * BLOCK_SIZE];
        image[0..4].copy_from_slice(&4u32.to_le_bytes());
        image[4..8].copy_from_slice(&2u32.to_le_bytes());
        image[8..12].copy_from_slice(&2u32.to_le_bytes());

        let names: [(&[u8], u32, u32); 4] =
            [(b"rtc", 0, 0), (b".", 1, 0), (b"frame0.txt", 2, 0), (b"ls", 2, 1)];
        for (i, (name, ftype, inode)) in names.iter().enumerate() {
            let base = 64 + i * 64;
            image[base..base + name.len()].copy_from_slice(name);
            image[base + 32..base + 36].copy_from_slice(&ftype.to_le_bytes());
            image[base + 36..base + 40].copy_from_slice(&inode.to_le_bytes());
        }

        // Inode 0: 11-byte file in data block 0; inode 1: 4 bytes in block 1.
        let inode0 = BLOCK_SIZE;
        image[inode0..inode0 + 4].copy_from_slice(&11u32.to_le_bytes());
        image[inode0 + 4..inode0 + 8].copy_from_slice(&0u32.to_le_bytes());
        let inode1 = 2 * BLOCK_SIZE;
        image[inode1..inode1 + 4].copy_from_slice(&4u32.to_le_bytes());
        image[inode1 + 4..inode1 + 8].copy_from_slice(&1u32.to_le_bytes());

        let data0 = 3 * BLOCK_SIZE;
        image[data0..data0 + 11].copy_from_slice(b"hello world");
        let data1 = 4 * BLOCK_SIZE;
        image[data1..data1 + 4].copy_from_slice(b"\x7FELF");

        FsImage::new(std::boxed::Box::leak(image.into_boxed_slice())).unwrap()
    }

    fn test_pcb() -> Pcb {
        Pcb::new(Pid(3), 0, Pid(0), b"cat", b"frame0.txt")
    }

    // -- open/close ---------------------------------------------------------

    #[test]
    fn open_shapes_descriptor_by_type() {
        let fs = test_fs();
        let mut pcb = test_pcb();

        let rtc = open_fd(&mut pcb, &fs, b"rtc").unwrap();
        assert_eq!(
            pcb.fds.get(rtc).unwrap(),
            &FdKind::Rtc { freq: vrtc::DEFAULT_FREQ }
        );

        let dir = open_fd(&mut pcb, &fs, b".").unwrap();
        assert_eq!(pcb.fds.get(dir).unwrap(), &FdKind::Directory { index: 0 });

        let file = open_fd(&mut pcb, &fs, b"frame0.txt").unwrap();
        assert_eq!(
            pcb.fds.get(file).unwrap(),
            &FdKind::File { inode: 0, position: 0 }
        );

        assert!(open_fd(&mut pcb, &fs, b"missing").is_err());
    }

    #[test]
    fn open_close_restores_table() {
        let fs = test_fs();
        let mut pcb = test_pcb();
        let before = pcb.fds;
        let fd = open_fd(&mut pcb, &fs, b"frame0.txt").unwrap();
        pcb.fds.close(fd).unwrap();
        assert_eq!(pcb.fds, before);
    }

    // -- file reads ---------------------------------------------------------

    #[test]
    fn sequential_reads_advance_position() {
        let fs = test_fs();
        let mut pcb = test_pcb();
        let fd = open_fd(&mut pcb, &fs, b"frame0.txt").unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(read_fd(&mut pcb, &fs, fd, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        let mut buf2 = [0u8; 64];
        assert_eq!(read_fd(&mut pcb, &fs, fd, &mut buf2).unwrap(), 6);
        assert_eq!(&buf2[..6], b" world");
        // At EOF reads return zero, position stays put.
        assert_eq!(read_fd(&mut pcb, &fs, fd, &mut buf2).unwrap(), 0);
    }

    #[test]
    fn split_read_equals_single_read() {
        let fs = test_fs();
        let mut pcb = test_pcb();

        let fd = open_fd(&mut pcb, &fs, b"frame0.txt").unwrap();
        let mut first = [0u8; 4];
        let mut second = [0u8; 7];
        read_fd(&mut pcb, &fs, fd, &mut first).unwrap();
        read_fd(&mut pcb, &fs, fd, &mut second).unwrap();

        let mut joined = [0u8; 11];
        joined[..4].copy_from_slice(&first);
        joined[4..].copy_from_slice(&second);

        let mut whole = [0u8; 11];
        fs.read_data(0, 0, &mut whole).unwrap();
        assert_eq!(joined, whole);
    }

    // -- directory reads ----------------------------------------------------

    #[test]
    fn dir_read_yields_one_name_per_call_then_zero() {
        let fs = test_fs();
        let mut pcb = test_pcb();
        let fd = open_fd(&mut pcb, &fs, b".").unwrap();

        let expected: [&[u8]; 4] = [b"rtc", b".", b"frame0.txt", b"ls"];
        for name in expected {
            let mut buf = [0u8; 32];
            assert_eq!(read_fd(&mut pcb, &fs, fd, &mut buf).unwrap(), 32);
            assert_eq!(&buf[..name.len()], name);
            assert!(buf[name.len()..].iter().all(|&b| b == 0));
        }
        let mut buf = [0u8; 32];
        assert_eq!(read_fd(&mut pcb, &fs, fd, &mut buf).unwrap(), 0);
    }

    // -- writes -------------------------------------------------------------

    #[test]
    fn rtc_write_validates_and_stores_frequency() {
        let fs = test_fs();
        let mut pcb = test_pcb();
        let fd = open_fd(&mut pcb, &fs, b"rtc").unwrap();

        assert_eq!(write_fd(&mut pcb, fd, &8u32.to_le_bytes()).unwrap(), 0);
        assert_eq!(pcb.fds.get(fd).unwrap(), &FdKind::Rtc { freq: 8 });

        for bad in [1u32, 3, 2048, 0, u32::MAX] {
            assert!(write_fd(&mut pcb, fd, &bad.to_le_bytes()).is_err());
        }
        // Failed writes leave the stored divisor alone.
        assert_eq!(pcb.fds.get(fd).unwrap(), &FdKind::Rtc { freq: 8 });
    }

    #[test]
    fn files_and_directories_are_read_only() {
        let fs = test_fs();
        let mut pcb = test_pcb();
        let file = open_fd(&mut pcb, &fs, b"frame0.txt").unwrap();
        let dir = open_fd(&mut pcb, &fs, b".").unwrap();
        assert_eq!(write_fd(&mut pcb, file, b"data"), Err(KernelError::ReadOnly));
        assert_eq!(write_fd(&mut pcb, dir, b"data"), Err(KernelError::ReadOnly));
        assert!(write_fd(&mut pcb, FD_STDIN, b"data").is_err());
        assert!(write_fd(&mut pcb, 6, b"data").is_err());
    }

    // -- getargs ------------------------------------------------------------

    #[test]
    fn getargs_copies_with_terminator() {
        let pcb = test_pcb();
        let mut buf = [0xAAu8; 32];
        assert_eq!(getargs(&pcb, &mut buf).unwrap(), 0);
        assert_eq!(&buf[..10], b"frame0.txt");
        assert_eq!(buf[10], 0);
    }

    #[test]
    fn getargs_rejects_small_buffer_and_missing_args() {
        let pcb = test_pcb();
        let mut exact = [0u8; 10];
        assert!(getargs(&pcb, &mut exact).is_err());
        let mut fits = [0u8; 11];
        assert_eq!(getargs(&pcb, &mut fits).unwrap(), 0);

        let bare = Pcb::new(Pid(4), 0, Pid(0), b"ls", b"");
        let mut buf = [0u8; 16];
        assert_eq!(getargs(&bare, &mut buf), Err(KernelError::NoArguments));
    }
}
