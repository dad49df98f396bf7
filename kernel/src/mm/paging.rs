//! Page directory and page table management.
//!
//! One directory, two tables, no allocation. The low table identity-maps
//! only the video region; PDE 1 is the 4 MiB kernel page; PDE 32 is the
//! running process's 4 MiB user slot; PDE 33 points at a table whose
//! single entry is the optional user vidmap page. Every change is
//! followed by a full CR3 reload.

use bitflags::bitflags;
use core::cell::UnsafeCell;

use crate::arch;
use crate::mm;
use crate::sync::CriticalGuard;

bitflags! {
    /// IA-32 directory/table entry flag bits (non-PAE).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT    = 1 << 0;
        const WRITABLE   = 1 << 1;
        const USER       = 1 << 2;
        const WRITE_THRU = 1 << 3;
        const NO_CACHE   = 1 << 4;
        const ACCESSED   = 1 << 5;
        const DIRTY      = 1 << 6;
        const LARGE      = 1 << 7;
        const GLOBAL     = 1 << 8;
    }
}

/// A raw directory or table entry.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry(u32);

impl Entry {
    pub const EMPTY: Entry = Entry(0);

    /// 4 KiB page-table entry or table-pointer entry.
    pub fn page(frame: u32, flags: EntryFlags) -> Entry {
        debug_assert_eq!(frame & 0xFFF, 0);
        Entry((frame & 0xFFFF_F000) | flags.bits())
    }

    /// 4 MiB directory entry.
    pub fn large(frame: u32, flags: EntryFlags) -> Entry {
        debug_assert_eq!(frame & 0x3F_FFFF, 0);
        Entry((frame & 0xFFC0_0000) | (flags | EntryFlags::LARGE).bits())
    }

    pub fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    pub fn frame(self) -> u32 {
        if self.flags().contains(EntryFlags::LARGE) {
            self.0 & 0xFFC0_0000
        } else {
            self.0 & 0xFFFF_F000
        }
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(EntryFlags::PRESENT)
    }

    fn with_present(self, present: bool) -> Entry {
        if present {
            Entry(self.0 | EntryFlags::PRESENT.bits())
        } else {
            Entry(self.0 & !EntryFlags::PRESENT.bits())
        }
    }
}

const ENTRIES: usize = 1024;

/// Directory index of the user 4 MiB page (VA 0x08000000 >> 22).
const USER_PDE: usize = 32;
/// Directory index of the vidmap table (VA 0x08400000 >> 22).
const VIDMAP_PDE: usize = 33;

#[repr(C, align(4096))]
struct Table([Entry; ENTRIES]);

#[repr(C)]
struct PagingTables {
    directory: Table,
    low: Table,
    vidmap: Table,
}

struct PagingCell(UnsafeCell<PagingTables>);

// SAFETY: Single processor. Mutation goes through the functions below,
// each of which holds a CriticalGuard with interrupts disabled; the MMU's
// concurrent reads only ever observe a fully written 32-bit entry.
unsafe impl Sync for PagingCell {}

static PAGING: PagingCell = PagingCell(UnsafeCell::new(PagingTables {
    directory: Table([Entry::EMPTY; ENTRIES]),
    low: Table([Entry::EMPTY; ENTRIES]),
    vidmap: Table([Entry::EMPTY; ENTRIES]),
}));

fn with_tables<R>(f: impl FnOnce(&mut PagingTables) -> R) -> R {
    let _crit = CriticalGuard::enter();
    arch::without_interrupts(|| {
        // SAFETY: Guarded per the PagingCell invariant.
        let tables = unsafe { &mut *PAGING.0.get() };
        f(tables)
    })
}

/// Build the boot address space and switch the MMU onto it.
pub fn init() {
    with_tables(|t| {
        let low_base = &t.low as *const Table as u32;
        let vidmap_base = &t.vidmap as *const Table as u32;

        t.directory.0[0] = Entry::page(low_base, EntryFlags::PRESENT | EntryFlags::WRITABLE);
        t.directory.0[1] = Entry::large(
            mm::KERNEL_BASE,
            EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::GLOBAL,
        );
        // User slot template; execute() retargets it before anything runs.
        t.directory.0[USER_PDE] = Entry::large(
            mm::user_slot_phys(0),
            EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER,
        );
        t.directory.0[VIDMAP_PDE] = Entry::page(
            vidmap_base,
            EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER,
        );

        // Identity map the video region only: framebuffer, three backing
        // pages and the kernel scratch page.
        for frame in (mm::VIDEO_MEM..=mm::VIDEO_SCRATCH).step_by(0x1000) {
            t.low.0[(frame >> 12) as usize] =
                Entry::page(frame, EntryFlags::PRESENT | EntryFlags::WRITABLE);
        }

        // Vidmap page starts at the real framebuffer, not yet present.
        t.vidmap.0[0] = Entry::page(mm::VIDEO_MEM, EntryFlags::WRITABLE | EntryFlags::USER);

        let dir_base = &t.directory as *const Table as u32;
        arch::load_page_directory(dir_base);
    });
}

/// Point the user 4 MiB page at `pid`'s slot.
pub fn remap_user_slot(pid: usize) {
    with_tables(|t| {
        t.directory.0[USER_PDE] = Entry::large(
            mm::user_slot_phys(pid),
            EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER,
        );
        arch::flush_tlb();
    });
}

/// Make the vidmap page visible to ring 3.
pub fn enable_vidmap() {
    with_tables(|t| {
        t.vidmap.0[0] = t.vidmap.0[0].with_present(true);
        arch::flush_tlb();
    });
}

/// Hide the vidmap page again (process halted or switched away).
pub fn disable_vidmap() {
    with_tables(|t| {
        t.vidmap.0[0] = t.vidmap.0[0].with_present(false);
        arch::flush_tlb();
    });
}

/// Retarget the vidmap page at the framebuffer or a backing page,
/// preserving its present state.
pub fn set_video_target(frame: u32) {
    with_tables(|t| {
        let present = t.vidmap.0[0].is_present();
        t.vidmap.0[0] = Entry::page(frame, EntryFlags::WRITABLE | EntryFlags::USER)
            .with_present(present);
        arch::flush_tlb();
    });
}

/// Whether the vidmap page is currently user-visible.
pub fn vidmap_enabled() -> bool {
    with_tables(|t| t.vidmap.0[0].is_present())
}
