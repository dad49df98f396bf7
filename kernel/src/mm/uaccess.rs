//! User-memory access helpers.
//!
//! Every accessor range-checks against the user 4 MiB page before
//! touching anything. The user slot is always mapped while its process
//! is scheduled, so access is a plain copy through the identity of the
//! current address space; there is no fault-and-fixup machinery.
//!
//! Hosted builds keep the validation but have no user address space;
//! slice accessors return `None` there and plain writes succeed as
//! no-ops so the delivery logic above them stays testable.

use super::{user_range_ok, USER_PAGE_VA, USER_SLOT_SIZE};

/// Mutable view of user memory at `addr`.
pub fn user_slice_mut(addr: u32, len: u32) -> Option<&'static mut [u8]> {
    if len == 0 || !user_range_ok(addr, len) {
        return None;
    }
    #[cfg(target_os = "none")]
    {
        // SAFETY: Range-checked against the mapped user page; the kernel
        // is single-threaded per process while handling its trap.
        Some(unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, len as usize) })
    }
    #[cfg(not(target_os = "none"))]
    {
        None
    }
}

/// Shared view of user memory at `addr`.
pub fn user_slice(addr: u32, len: u32) -> Option<&'static [u8]> {
    user_slice_mut(addr, len).map(|s| &*s)
}

/// Copy a NUL-terminated user string into `buf`; the terminator is not
/// copied. Fails on an unmapped or unterminated (longer than `buf`)
/// string.
pub fn read_cstr(addr: u32, buf: &mut [u8]) -> Option<usize> {
    let max = buf.len() as u32;
    if !user_range_ok(addr, 1) {
        return None;
    }
    // Clamp the scan window to the end of the user page.
    let window = max.min(USER_PAGE_VA + USER_SLOT_SIZE - addr);
    let src = user_slice(addr, window)?;
    let len = src.iter().position(|&b| b == 0)?;
    buf[..len].copy_from_slice(&src[..len]);
    Some(len)
}

/// Write one 32-bit word to user memory. Returns false if the address is
/// outside the user page.
pub fn write_u32(addr: u32, value: u32) -> bool {
    if !user_range_ok(addr, 4) {
        return false;
    }
    #[cfg(target_os = "none")]
    {
        // SAFETY: Range-checked; the user page is mapped writable.
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) };
    }
    #[cfg(not(target_os = "none"))]
    let _ = value;
    true
}

/// Copy `bytes` into user memory at `addr`.
pub fn copy_to_user(addr: u32, bytes: &[u8]) -> bool {
    if !user_range_ok(addr, bytes.len() as u32) {
        return false;
    }
    #[cfg(target_os = "none")]
    {
        // SAFETY: Range-checked destination inside the mapped user page.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len());
        }
    }
    #[cfg(not(target_os = "none"))]
    let _ = bytes;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm;

    #[test]
    fn rejects_out_of_slot_addresses() {
        assert!(user_slice(0x1000, 4).is_none());
        assert!(user_slice_mut(mm::USER_PAGE_VA - 4, 4).is_none());
        assert!(!write_u32(mm::VIDMAP_VA, 1));
        assert!(!copy_to_user(0, b"x"));
    }

    #[test]
    fn in_slot_writes_validate() {
        assert!(write_u32(mm::PROGRAM_LOAD_VA, 0xdead_beef));
        assert!(copy_to_user(mm::TRAMPOLINE_VA, &[1, 2, 3]));
    }
}
