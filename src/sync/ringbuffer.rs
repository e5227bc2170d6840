//! Lock-free SPSC (single producer, single consumer) ring buffer.
//!
//! This module provides a fixed-size byte ring buffer suitable for
//! interrupt-safe producer/consumer communication: the IRQ handler is the
//! only producer, the kernel main loop the only consumer. On a uniprocessor
//! no lock is required as long as index updates are single-word atomic and
//! the payload write happens before the index publish.
//!
//! - `head`: write index (producer side), points to the next free slot.
//! - `tail`: read index (consumer side), points to the oldest unread byte.
//! - Both advance with modular arithmetic (`% N`), wrapping back to slot 0.
//! - The buffer is **empty** when `tail == head` and **full** when
//!   `(head + 1) % N == tail`: one slot is always left unused so that full
//!   can be distinguished from empty, and a push into a full buffer drops
//!   the byte instead of silently overwriting unread data.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct RingBuffer<const N: usize> {
    buf: UnsafeCell<[u8; N]>,
    /// Write index (producer side): points to the next free slot.
    head: AtomicUsize,
    /// Read index (consumer side): points to the oldest unread byte.
    tail: AtomicUsize,
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + 1) % N == tail
    }

    /// Number of unread bytes currently stored.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + N - tail) % N
    }

    pub fn clear(&self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
    }

    /// Append a byte to the buffer. Returns `true` on success, `false` if
    /// the buffer is full (the byte is dropped in that case).
    ///
    /// Only safe for a **single producer**. The `Release` store on `head`
    /// ensures that the byte written to `buf[head]` is visible to a consumer
    /// that later observes the new `head` value via an `Acquire` load.
    pub fn push(&self, value: u8) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % N;
        let tail = self.tail.load(Ordering::Acquire);

        // Buffer full: the next slot would collide with the read index.
        if next == tail {
            return false;
        }

        // Write the byte *before* publishing the new head.
        // SAFETY:
        // - Single-producer contract guarantees exclusive writes to the
        //   `head` slot.
        // - `head` is in-bounds due to modulo arithmetic.
        unsafe {
            (*self.buf.get())[head] = value;
        }

        self.head.store(next, Ordering::Release);
        true
    }

    /// Remove and return the next byte, or `None` if the buffer is empty.
    ///
    /// Only safe for a **single consumer**. The slot at `tail` is always
    /// initialised: the producer publishes `head` with `Release` ordering
    /// only after the payload write, and we read `head` with `Acquire`.
    pub fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        // SAFETY:
        // - `tail != head` guarantees the slot was initialised by the
        //   producer before `head` moved past it.
        // - `tail` is in-bounds due to modulo arithmetic.
        let value = unsafe { (*self.buf.get())[tail] };
        self.tail.store((tail + 1) % N, Ordering::Release);
        Some(value)
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY:
// - All mutable access to `buf` is synchronized via the atomic indices: the
//   producer writes only to `buf[head]` before publishing, the consumer
//   reads only slots between `tail` and `head`.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}
// SAFETY:
// - Sending the ring buffer transfers ownership of the atomic state and
//   buffer; the SPSC protocol is preserved on the receiving side.
unsafe impl<const N: usize> Send for RingBuffer<N> {}
