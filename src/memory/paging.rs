//! 32-bit paging bookkeeping.
//!
//! A page directory is 1024 dword entries, each mapping a 4 MiB slot either
//! through a page table or directly (PS bit). This module only manages the
//! directories themselves; installing identity mappings for low memory is
//! the caller's business.

use bitflags::bitflags;

use crate::memory::heap;
use crate::memory::pmm::PAGE_SIZE;
use crate::sync::irqlock::IrqLock;

/// Entries per page directory (and per page table).
pub const DIRECTORY_ENTRIES: usize = 1024;

bitflags! {
    /// Flag bits of a page-directory/page-table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        /// 4 MiB page (directory entries only).
        const PAGE_4MIB = 1 << 7;
    }
}

/// An owned, page-aligned 1024-entry page directory living on the kernel
/// heap.
pub struct PageDirectory {
    entries: *mut u32,
}

// SAFETY:
// - The entries pointer refers to heap memory exclusively owned by this
//   directory; access is serialized by the owning lock.
unsafe impl Send for PageDirectory {}

impl PageDirectory {
    /// Allocates a zero-filled, page-aligned directory from the kernel heap.
    ///
    /// Returns `None` when the heap is exhausted.
    pub fn new() -> Option<Self> {
        let bytes = DIRECTORY_ENTRIES * core::mem::size_of::<u32>();
        let ptr = heap::malloc_aligned(bytes, PAGE_SIZE);
        if ptr.is_null() {
            return None;
        }

        // SAFETY:
        // - `ptr` was just allocated with `bytes` usable bytes.
        unsafe {
            core::ptr::write_bytes(ptr, 0, bytes);
        }

        Some(Self {
            entries: ptr as *mut u32,
        })
    }

    /// Physical address of the directory (identity heap window).
    pub fn physical_address(&self) -> usize {
        self.entries as usize
    }

    /// Installs a directory entry mapping one 4 MiB slot.
    pub fn set_entry(&mut self, index: usize, phys_addr: u32, flags: PageFlags) {
        debug_assert!(index < DIRECTORY_ENTRIES);
        debug_assert!(phys_addr as usize % PAGE_SIZE == 0);

        // SAFETY:
        // - `index` is bounds-checked above; the entry array is owned.
        unsafe {
            self.entries
                .add(index)
                .write_volatile((phys_addr & 0xFFFF_F000) | flags.bits());
        }
    }

    /// Reads back one directory entry.
    pub fn entry(&self, index: usize) -> (u32, PageFlags) {
        debug_assert!(index < DIRECTORY_ENTRIES);

        // SAFETY:
        // - `index` is bounds-checked above; the entry array is owned.
        let raw = unsafe { self.entries.add(index).read_volatile() };
        (raw & 0xFFFF_F000, PageFlags::from_bits_truncate(raw))
    }
}

impl Drop for PageDirectory {
    fn drop(&mut self) {
        heap::free(self.entries as *mut u8);
    }
}

/// The kernel's initial page directory, created during memory init.
static KERNEL_DIRECTORY: IrqLock<Option<PageDirectory>> = IrqLock::new(None);

/// Creates the kernel page directory. Identity mappings for low memory are
/// expected to be installed by the boot path before paging is enabled.
///
/// Returns the directory's physical address, or `None` when the heap could
/// not back it.
pub fn init_kernel_directory() -> Option<usize> {
    let directory = PageDirectory::new()?;
    let phys = directory.physical_address();
    *KERNEL_DIRECTORY.lock() = Some(directory);
    log::info!(target: "paging", "kernel page directory at {:#010x}", phys);
    Some(phys)
}

/// Executes a closure with the kernel page directory, if one exists.
pub fn with_kernel_directory<R>(f: impl FnOnce(&mut PageDirectory) -> R) -> Option<R> {
    let mut directory = KERNEL_DIRECTORY.lock();
    directory.as_mut().map(f)
}

/// Physical address of the kernel page directory, if created.
pub fn kernel_directory_address() -> Option<usize> {
    KERNEL_DIRECTORY.lock().as_ref().map(|d| d.physical_address())
}
