//! Kernel heap manager.
//!
//! Design summary:
//! - Fixed heap window with variable-sized blocks.
//! - First-fit allocation strategy over an address-ordered, doubly-linked
//!   block list; one header (`BlockHeader`) in front of every payload.
//! - Block splitting on allocation, eager coalescing on free, and release
//!   of a trailing free block back to the bump cursor.
//! - Fresh blocks are bump-allocated at `base + total_allocated` until the
//!   window is exhausted.
//! - Headers carry a sentinel: `MAGIC_ALLOCATED` while live, `MAGIC_FREE`
//!   once freed, so an invalid or repeated `free` is detected and dropped
//!   instead of corrupting the list.
//!
//! Notes:
//! - Block size includes the header itself.
//! - The payload pointer is always `header + HEADER_SIZE` and is aligned to
//!   the caller's requested alignment (default 16).

use core::mem::size_of;
use core::ptr;

use crate::sync::irqlock::IrqLock;

/// Sentinel stored in every live block header.
pub const MAGIC_ALLOCATED: u32 = 0xDEAD_BEEF;

/// Sentinel stored in freed headers; a `free` that finds this is a double
/// free and is ignored.
pub const MAGIC_FREE: u32 = 0xFEEE_FEEE;

/// Default payload alignment.
pub const DEFAULT_ALIGNMENT: usize = 16;

/// Size of one block header, padded so payloads keep the default alignment.
pub const HEADER_SIZE: usize = align_up(size_of::<BlockHeader>(), DEFAULT_ALIGNMENT);

/// Minimum tail size that is still worth splitting into a new free block.
const MIN_SPLIT_TAIL: usize = HEADER_SIZE + 64;

/// Start of the kernel heap window (above the kernel image and stack).
pub const KERNEL_HEAP_BASE: usize = 0x0040_0000;

/// Size of the kernel heap window.
pub const KERNEL_HEAP_SIZE: usize = 0x0010_0000;

/// Per-block metadata stored directly in heap memory.
#[repr(C)]
struct BlockHeader {
    /// `MAGIC_ALLOCATED` or `MAGIC_FREE`.
    magic: u32,
    /// Full block size in bytes, header included.
    size: usize,
    /// Whether the payload is handed out.
    used: bool,
    /// Address-order neighbors.
    prev: *mut BlockHeader,
    next: *mut BlockHeader,
}

#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Reinterprets an address as a mutable block-header pointer.
#[inline]
fn header_at(addr: usize) -> *mut BlockHeader {
    addr as *mut BlockHeader
}

/// Converts a block header pointer to the corresponding payload pointer.
#[inline]
fn payload_ptr(block: *mut BlockHeader) -> *mut u8 {
    (block as usize + HEADER_SIZE) as *mut u8
}

/// Computes the block header pointer from a payload pointer.
#[inline]
fn block_from_payload(ptr: *mut u8) -> *mut BlockHeader {
    (ptr as usize - HEADER_SIZE) as *mut BlockHeader
}

/// A first-fit, coalescing allocator over one contiguous memory window.
///
/// The struct is freestanding so tests can run it over any writable arena;
/// the kernel instance lives behind [`with_heap`].
pub struct HeapAllocator {
    /// Start address of the managed window.
    base: usize,
    /// Window capacity in bytes.
    capacity: usize,
    /// Sum of all block sizes, used and free; also the bump cursor.
    total_allocated: usize,
    /// First block in address order, null while the heap is untouched.
    head: *mut BlockHeader,
}

// SAFETY:
// - The raw block pointers all point into the owned window; access is
//   serialized by the IrqLock around the kernel instance (and by `&mut self`
//   for test-local instances).
unsafe impl Send for HeapAllocator {}

impl HeapAllocator {
    /// Returns an allocator with no backing window; every `alloc` fails
    /// until [`reset`](Self::reset) provides one.
    pub const fn empty() -> Self {
        Self {
            base: 0,
            capacity: 0,
            total_allocated: 0,
            head: ptr::null_mut(),
        }
    }

    /// Creates an allocator over `[base, base + capacity)`.
    ///
    /// # Safety
    /// The window must be writable, unused by anything else, and `base` must
    /// be aligned to [`DEFAULT_ALIGNMENT`].
    pub unsafe fn new(base: usize, capacity: usize) -> Self {
        debug_assert!(base % DEFAULT_ALIGNMENT == 0);
        Self {
            base,
            capacity,
            total_allocated: 0,
            head: ptr::null_mut(),
        }
    }

    /// Re-points the allocator at a fresh window, dropping all bookkeeping.
    ///
    /// # Safety
    /// Same contract as [`new`](Self::new); outstanding pointers from the
    /// previous window become invalid.
    pub unsafe fn reset(&mut self, base: usize, capacity: usize) {
        debug_assert!(base % DEFAULT_ALIGNMENT == 0);
        self.base = base;
        self.capacity = capacity;
        self.total_allocated = 0;
        self.head = ptr::null_mut();
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of all block sizes (the bump cursor).
    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }

    /// Allocates `size` bytes aligned to `align` (a power of two).
    ///
    /// Returns a null pointer when `size` is 0 or the window is exhausted.
    pub fn alloc(&mut self, size: usize, align: usize) -> *mut u8 {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");

        if size == 0 || self.capacity == 0 {
            return ptr::null_mut();
        }

        let align = align.max(DEFAULT_ALIGNMENT);

        // Round the request up to the alignment, then add the header.
        let rounded_size = match size.checked_add(align - 1) {
            Some(s) => s & !(align - 1),
            None => return ptr::null_mut(),
        };
        let block_size = match rounded_size.checked_add(HEADER_SIZE) {
            Some(s) => align_up(s, DEFAULT_ALIGNMENT),
            None => return ptr::null_mut(),
        };

        if let Some(block) = self.find_first_fit(block_size, align) {
            self.take_block(block, block_size);
            return payload_ptr(block);
        }

        self.bump_new_block(block_size, align)
            .map(payload_ptr)
            .unwrap_or(ptr::null_mut())
    }

    /// Allocates `count * size` zero-filled bytes at the default alignment.
    pub fn alloc_zeroed(&mut self, count: usize, size: usize) -> *mut u8 {
        let total = match count.checked_mul(size) {
            Some(t) => t,
            None => return ptr::null_mut(),
        };

        let ptr = self.alloc(total, DEFAULT_ALIGNMENT);
        if !ptr.is_null() {
            // SAFETY:
            // - `ptr` was just handed out with at least `total` usable bytes.
            unsafe {
                ptr::write_bytes(ptr, 0, total);
            }
        }
        ptr
    }

    /// Frees a previously allocated payload pointer.
    ///
    /// An unrecognized or already-freed header is reported and dropped:
    /// safety over reclamation.
    pub fn free(&mut self, payload: *mut u8) {
        if payload.is_null() {
            return;
        }

        let block = block_from_payload(payload);
        // SAFETY:
        // - `block` is derived from a payload pointer; the magic check below
        //   rejects anything that is not a live header of this heap.
        let header = unsafe { &mut *block };

        match header.magic {
            MAGIC_ALLOCATED if header.used => {}
            MAGIC_FREE => {
                log::warn!(target: "heap", "double free of {:p} ignored", payload);
                return;
            }
            _ => {
                log::warn!(
                    target: "heap",
                    "invalid free of {:p} (bad sentinel {:#010x}) ignored",
                    payload,
                    header.magic
                );
                return;
            }
        }

        header.used = false;
        header.magic = MAGIC_FREE;

        let block = self.merge_with_right(block);
        let block = self.merge_with_left(block);
        self.release_top(block);
    }

    /// First-fit scan for a free block that can carry `block_size` bytes
    /// with its payload aligned to `align`.
    fn find_first_fit(&self, block_size: usize, align: usize) -> Option<*mut BlockHeader> {
        let mut current = self.head;
        while !current.is_null() {
            // SAFETY:
            // - `current` came from the block list, which only holds headers
            //   inside the window.
            let header = unsafe { &*current };
            if !header.used && header.size >= block_size && self.payload_aligned(current, align) {
                return Some(current);
            }
            current = header.next;
        }
        None
    }

    fn payload_aligned(&self, block: *mut BlockHeader, align: usize) -> bool {
        (block as usize + HEADER_SIZE) % align == 0
    }

    /// Marks a free block used, splitting off a trailing free block when the
    /// remainder is worth keeping.
    fn take_block(&mut self, block: *mut BlockHeader, block_size: usize) {
        // SAFETY:
        // - `block` is a free block from the list, large enough for
        //   `block_size` (checked by the caller).
        unsafe {
            let old_size = (*block).size;

            if old_size >= block_size + MIN_SPLIT_TAIL {
                let tail = header_at(block as usize + block_size);
                (*tail).magic = MAGIC_FREE;
                (*tail).size = old_size - block_size;
                (*tail).used = false;
                (*tail).prev = block;
                (*tail).next = (*block).next;
                if !(*tail).next.is_null() {
                    (*(*tail).next).prev = tail;
                }

                (*block).size = block_size;
                (*block).next = tail;
            }

            (*block).used = true;
            (*block).magic = MAGIC_ALLOCATED;
        }
    }

    /// Bump-allocates a fresh block at the top of the heap, inserting a
    /// leading free block when extra space is needed for alignment.
    fn bump_new_block(&mut self, block_size: usize, align: usize) -> Option<*mut BlockHeader> {
        let mut block_addr = self.base + self.total_allocated;
        let mut payload = align_up(block_addr + HEADER_SIZE, align);

        // A too-small alignment gap cannot carry its own header; push the
        // payload one alignment step further so the gap becomes a real block.
        while payload - HEADER_SIZE != block_addr
            && payload - HEADER_SIZE - block_addr < MIN_SPLIT_TAIL
        {
            payload += align;
        }

        let gap = payload - HEADER_SIZE - block_addr;
        let end = block_addr + gap + block_size;
        if end > self.base + self.capacity {
            log::warn!(
                target: "heap",
                "out of memory: need {} bytes, {} remain",
                gap + block_size,
                self.capacity - self.total_allocated
            );
            return None;
        }

        let tail = self.last_block();

        if gap > 0 {
            // SAFETY:
            // - `[block_addr, block_addr + gap)` is unused window space past
            //   the bump cursor.
            unsafe {
                let filler = header_at(block_addr);
                (*filler).magic = MAGIC_FREE;
                (*filler).size = gap;
                (*filler).used = false;
                (*filler).prev = tail;
                (*filler).next = ptr::null_mut();
                self.append_block(filler, tail);
            }
            block_addr += gap;
        }

        let tail = self.last_block();
        // SAFETY:
        // - `[block_addr, end)` is unused window space past the bump cursor.
        unsafe {
            let block = header_at(block_addr);
            (*block).magic = MAGIC_ALLOCATED;
            (*block).size = block_size;
            (*block).used = true;
            (*block).prev = tail;
            (*block).next = ptr::null_mut();
            self.append_block(block, tail);
            self.total_allocated = end - self.base;
            Some(block)
        }
    }

    fn last_block(&self) -> *mut BlockHeader {
        let mut current = self.head;
        let mut last = ptr::null_mut();
        while !current.is_null() {
            last = current;
            // SAFETY:
            // - `current` came from the block list.
            current = unsafe { (*current).next };
        }
        last
    }

    /// Threads `block` behind `tail` (or installs it as the head).
    ///
    /// # Safety
    /// `block` must be a fully initialized header; `tail` must be the
    /// current last block or null.
    unsafe fn append_block(&mut self, block: *mut BlockHeader, tail: *mut BlockHeader) {
        if tail.is_null() {
            self.head = block;
        } else {
            (*tail).next = block;
        }
    }

    /// Absorbs the right neighbor when both blocks are free and adjacent.
    fn merge_with_right(&mut self, block: *mut BlockHeader) -> *mut BlockHeader {
        // SAFETY:
        // - `block` and its `next` are list members inside the window.
        unsafe {
            let next = (*block).next;
            if next.is_null() || (*next).used {
                return block;
            }

            debug_assert_eq!(block as usize + (*block).size, next as usize);

            (*block).size += (*next).size;
            (*block).next = (*next).next;
            if !(*block).next.is_null() {
                (*(*block).next).prev = block;
            }
            // Poison the absorbed header so stale payload pointers into it
            // fail the sentinel check.
            (*next).magic = 0;
        }
        block
    }

    /// Absorbs `block` into its left neighbor when both are free.
    fn merge_with_left(&mut self, block: *mut BlockHeader) -> *mut BlockHeader {
        // SAFETY:
        // - `block` and its `prev` are list members inside the window.
        unsafe {
            let prev = (*block).prev;
            if prev.is_null() || (*prev).used {
                return block;
            }

            debug_assert_eq!(prev as usize + (*prev).size, block as usize);

            (*prev).size += (*block).size;
            (*prev).next = (*block).next;
            if !(*prev).next.is_null() {
                (*(*prev).next).prev = prev;
            }
            (*block).magic = 0;
            prev
        }
    }

    /// Gives a trailing free block back to the bump cursor so the heap
    /// returns to its pre-allocation state after a matching free.
    fn release_top(&mut self, block: *mut BlockHeader) {
        // SAFETY:
        // - `block` is a list member; unlinking the last free block only
        //   touches headers inside the window.
        unsafe {
            if (*block).used || !(*block).next.is_null() {
                return;
            }

            let prev = (*block).prev;
            if prev.is_null() {
                self.head = ptr::null_mut();
            } else {
                (*prev).next = ptr::null_mut();
            }

            self.total_allocated -= (*block).size;
            (*block).magic = 0;
        }
    }

    /// Returns `(size, used)` of the block whose header sits at
    /// `base + offset`, validating the sentinel first.
    ///
    /// Intended for heap self-tests to check the internal layout.
    pub fn block_at(&self, offset: usize) -> Option<(usize, bool)> {
        let addr = self.base + offset;
        let mut current = self.head;
        while !current.is_null() {
            // SAFETY:
            // - `current` came from the block list.
            let header = unsafe { &*current };
            if current as usize == addr {
                return Some((header.size, header.used));
            }
            current = header.next;
        }
        None
    }

    /// Number of blocks currently threaded in the list.
    pub fn block_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.head;
        while !current.is_null() {
            count += 1;
            // SAFETY:
            // - `current` came from the block list.
            current = unsafe { (*current).next };
        }
        count
    }

    /// Checks the structural invariants of the block list:
    /// address order, back links, sentinels, eager coalescing, and the
    /// bump-cursor accounting. Returns a violation description on failure.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        let mut current = self.head;
        let mut prev: *mut BlockHeader = ptr::null_mut();
        let mut sum = 0usize;
        let mut expected_addr = self.base;

        while !current.is_null() {
            // SAFETY:
            // - `current` came from the block list.
            let header = unsafe { &*current };

            if current as usize != expected_addr {
                return Err("blocks are not contiguous in address order");
            }
            if header.prev != prev {
                return Err("back link does not match list order");
            }
            match (header.used, header.magic) {
                (true, MAGIC_ALLOCATED) | (false, MAGIC_FREE) => {}
                _ => return Err("sentinel does not match block state"),
            }
            if !prev.is_null() {
                // SAFETY:
                // - `prev` was visited in the previous iteration.
                let prev_free = unsafe { !(*prev).used };
                if prev_free && !header.used {
                    return Err("adjacent free blocks were not coalesced");
                }
            }

            sum += header.size;
            expected_addr += header.size;
            prev = current;
            current = header.next;
        }

        if sum != self.total_allocated {
            return Err("block sizes do not sum to total_allocated");
        }
        if sum > self.capacity {
            return Err("blocks exceed heap capacity");
        }
        Ok(())
    }
}

/// Process-wide kernel heap instance.
static HEAP: IrqLock<HeapAllocator> = IrqLock::new(HeapAllocator::empty());

/// Points the kernel heap at its window. Called once from `kernel_main`
/// (tests may re-point it at an arena of their own).
///
/// # Safety
/// The window must be writable and unused by anything else.
pub unsafe fn init(base: usize, capacity: usize) {
    let mut heap = HEAP.lock();
    heap.reset(base, capacity);
    log::info!(
        target: "heap",
        "kernel heap at {:#010x}, {} KiB",
        base,
        capacity / 1024
    );
}

/// Executes a closure with exclusive access to the kernel heap.
pub fn with_heap<R>(f: impl FnOnce(&mut HeapAllocator) -> R) -> R {
    let mut heap = HEAP.lock();
    f(&mut heap)
}

/// Allocates from the kernel heap at the default alignment.
pub fn malloc(size: usize) -> *mut u8 {
    with_heap(|heap| heap.alloc(size, DEFAULT_ALIGNMENT))
}

/// Allocates from the kernel heap at an explicit alignment.
pub fn malloc_aligned(size: usize, align: usize) -> *mut u8 {
    with_heap(|heap| heap.alloc(size, align))
}

/// Frees a kernel-heap pointer.
pub fn free(ptr: *mut u8) {
    with_heap(|heap| heap.free(ptr));
}
