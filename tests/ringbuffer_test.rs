//! SPSC ring buffer integration tests.

use ferrite_kernel::sync::ringbuffer::RingBuffer;

#[test]
fn test_new_buffer_is_empty() {
    let ring: RingBuffer<8> = RingBuffer::new();
    assert!(ring.is_empty());
    assert!(!ring.is_full());
    assert_eq!(ring.len(), 0);
    assert_eq!(ring.pop(), None);
}

#[test]
fn test_fifo_order() {
    let ring: RingBuffer<8> = RingBuffer::new();

    for value in [10, 20, 30] {
        assert!(ring.push(value));
    }
    assert_eq!(ring.len(), 3);

    assert_eq!(ring.pop(), Some(10));
    assert_eq!(ring.pop(), Some(20));
    assert_eq!(ring.pop(), Some(30));
    assert_eq!(ring.pop(), None);
}

#[test]
fn test_one_slot_stays_reserved() {
    let ring: RingBuffer<8> = RingBuffer::new();

    // N-1 pushes fill the buffer.
    for i in 0..7 {
        assert!(ring.push(i), "push {} into a non-full buffer failed", i);
    }
    assert!(ring.is_full());
    assert_eq!(ring.len(), 7);

    // The Nth byte is dropped, not overwritten over unread data.
    assert!(!ring.push(99));
    assert_eq!(ring.len(), 7);

    for i in 0..7 {
        assert_eq!(ring.pop(), Some(i));
    }
    assert_eq!(ring.pop(), None);
}

#[test]
fn test_wraparound() {
    let ring: RingBuffer<4> = RingBuffer::new();

    // Cycle enough data through to wrap the indices several times.
    for round in 0..10u8 {
        assert!(ring.push(round));
        assert!(ring.push(round.wrapping_add(100)));
        assert_eq!(ring.pop(), Some(round));
        assert_eq!(ring.pop(), Some(round.wrapping_add(100)));
    }
    assert!(ring.is_empty());
}

#[test]
fn test_clear() {
    let ring: RingBuffer<8> = RingBuffer::new();

    ring.push(1);
    ring.push(2);
    ring.clear();

    assert!(ring.is_empty());
    assert_eq!(ring.pop(), None);
    assert!(ring.push(3));
    assert_eq!(ring.pop(), Some(3));
}

#[test]
fn test_interleaved_producer_consumer() {
    let ring: RingBuffer<16> = RingBuffer::new();

    let mut produced = 0u8;
    let mut consumed = 0u8;
    while consumed < 100 {
        // Producer bursts of three, consumer drains one at a time, the way
        // an IRQ handler outpaces the main loop.
        for _ in 0..3 {
            if ring.push(produced) {
                produced = produced.wrapping_add(1);
            }
        }
        if let Some(value) = ring.pop() {
            assert_eq!(value, consumed);
            consumed = consumed.wrapping_add(1);
        }
    }
}
