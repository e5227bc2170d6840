//! Physical Memory Manager: a bitmap of 4 KiB page frames.
//!
//! One bit per frame over the managed 128 MiB region; bit set = frame used.
//! A `first_free` hint remembers a lower bound for the scan start. The hint
//! is never trusted as a claim: the scan always re-validates bits, so a
//! stale hint costs time, never correctness.
//!
//! ```text
//!     Each u32 word in the bitmap:
//!     ┌────┬────┬─────────┬────┬────┬────┐
//!     │ 31 │ 30 │   ...   │  2 │  1 │  0 │
//!     └────┴────┴─────────┴────┴────┴────┘
//!       1 = frame allocated, 0 = frame free
//!       bit b of word w covers PFN (w * 32 + b)
//! ```

use crate::sync::irqlock::IrqLock;

/// Size of a single page frame in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Bytes of physical memory covered by the bitmap (128 MiB).
pub const MANAGED_BYTES: usize = 128 * 1024 * 1024;

/// Number of frames covered by the bitmap.
pub const TOTAL_FRAMES: usize = MANAGED_BYTES / PAGE_SIZE;

const BITS_PER_WORD: usize = 32;
const WORD_COUNT: usize = TOTAL_FRAMES / BITS_PER_WORD;

/// Handle for one allocated physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFrame {
    /// Page Frame Number = physical address / 4096.
    pub pfn: usize,
}

impl PageFrame {
    pub const fn physical_address(&self) -> usize {
        self.pfn * PAGE_SIZE
    }
}

/// Counters snapshot for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub total: usize,
    pub used: usize,
    pub free: usize,
    pub first_free: usize,
}

/// Bitmap-backed frame allocator.
pub struct FrameBitmap {
    words: [u32; WORD_COUNT],
    total: usize,
    used: usize,
    free: usize,
    /// Lower bound for the next scan; may be stale after frees.
    first_free: usize,
}

impl FrameBitmap {
    pub const fn new() -> Self {
        Self {
            words: [0; WORD_COUNT],
            total: TOTAL_FRAMES,
            used: 0,
            free: TOTAL_FRAMES,
            first_free: 0,
        }
    }

    #[inline]
    fn bit_is_set(&self, pfn: usize) -> bool {
        self.words[pfn / BITS_PER_WORD] & (1 << (pfn % BITS_PER_WORD)) != 0
    }

    #[inline]
    fn set_bit(&mut self, pfn: usize) {
        self.words[pfn / BITS_PER_WORD] |= 1 << (pfn % BITS_PER_WORD);
    }

    #[inline]
    fn clear_bit(&mut self, pfn: usize) {
        self.words[pfn / BITS_PER_WORD] &= !(1 << (pfn % BITS_PER_WORD));
    }

    /// Allocates the lowest free frame at or above the hint.
    ///
    /// Returns `None` when every frame is used.
    pub fn alloc_frame(&mut self) -> Option<PageFrame> {
        if self.free == 0 {
            return None;
        }

        let mut pfn = self.first_free;
        while pfn < self.total {
            // Skip fully used words in one step.
            if pfn % BITS_PER_WORD == 0 && self.words[pfn / BITS_PER_WORD] == u32::MAX {
                pfn += BITS_PER_WORD;
                continue;
            }

            if !self.bit_is_set(pfn) {
                self.set_bit(pfn);
                self.used += 1;
                self.free -= 1;
                // Optimistic: the next free bit is at or above pfn + 1.
                self.first_free = pfn + 1;
                return Some(PageFrame { pfn });
            }
            pfn += 1;
        }

        // The hint overshot every free bit; rescan from the bottom once.
        self.first_free = 0;
        let mut pfn = 0;
        while pfn < self.total {
            if !self.bit_is_set(pfn) {
                self.set_bit(pfn);
                self.used += 1;
                self.free -= 1;
                self.first_free = pfn + 1;
                return Some(PageFrame { pfn });
            }
            pfn += 1;
        }
        None
    }

    /// Releases the frame containing `phys_addr`.
    ///
    /// Freeing a frame that is already free is a no-op (idempotent against
    /// spurious frees). The hint is tightened downward when applicable.
    pub fn free_frame(&mut self, phys_addr: usize) {
        let pfn = phys_addr / PAGE_SIZE;
        if pfn >= self.total {
            log::warn!(target: "pmm", "free of out-of-range frame {:#010x} ignored", phys_addr);
            return;
        }

        if !self.bit_is_set(pfn) {
            return;
        }

        self.clear_bit(pfn);
        self.used -= 1;
        self.free += 1;
        if pfn < self.first_free {
            self.first_free = pfn;
        }
    }

    /// Marks every frame overlapping `[start, end)` as used. Used during
    /// boot to fence off the kernel image, stack, and heap window.
    pub fn reserve_range(&mut self, start: usize, end: usize) {
        let first = start / PAGE_SIZE;
        let last = end.div_ceil(PAGE_SIZE).min(self.total);

        for pfn in first..last {
            if !self.bit_is_set(pfn) {
                self.set_bit(pfn);
                self.used += 1;
                self.free -= 1;
            }
        }

        if self.first_free >= first && self.first_free < last {
            self.first_free = last;
        }
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            total: self.total,
            used: self.used,
            free: self.free,
            first_free: self.first_free,
        }
    }

    /// Counts set bits the slow way; tests compare this against `used`.
    pub fn popcount(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl Default for FrameBitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide frame allocator instance.
static PMM: IrqLock<FrameBitmap> = IrqLock::new(FrameBitmap::new());

/// Resets the kernel bitmap and fences off the boot-time reserved ranges.
pub fn init(reserved: &[(usize, usize)]) {
    let mut pmm = PMM.lock();
    *pmm = FrameBitmap::new();
    for &(start, end) in reserved {
        pmm.reserve_range(start, end);
    }
    let stats = pmm.stats();
    log::info!(
        target: "pmm",
        "{} frames managed, {} reserved",
        stats.total,
        stats.used
    );
}

/// Executes a closure with exclusive access to the kernel frame bitmap.
pub fn with_pmm<R>(f: impl FnOnce(&mut FrameBitmap) -> R) -> R {
    let mut pmm = PMM.lock();
    f(&mut pmm)
}

/// Allocates one physical frame from the kernel bitmap.
pub fn alloc_frame() -> Option<PageFrame> {
    with_pmm(|pmm| pmm.alloc_frame())
}

/// Releases one physical frame back to the kernel bitmap.
pub fn free_frame(phys_addr: usize) {
    with_pmm(|pmm| pmm.free_frame(phys_addr));
}
