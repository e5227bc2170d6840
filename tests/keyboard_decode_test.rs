//! PS/2 scancode decoding tests against a private keyboard instance.

use ferrite_kernel::drivers::keyboard::{KeyModifiers, Keyboard};

const SC_A: u8 = 0x1E;
const SC_B: u8 = 0x30;
const SC_C: u8 = 0x2E;
const SC_ONE: u8 = 0x02;
const SC_LEFT_SHIFT: u8 = 0x2A;
const SC_RIGHT_SHIFT: u8 = 0x36;
const SC_CTRL: u8 = 0x1D;
const SC_ALT: u8 = 0x38;
const SC_CAPS: u8 = 0x3A;
const BREAK: u8 = 0x80;

fn feed(kbd: &Keyboard, codes: &[u8]) {
    for &code in codes {
        kbd.process_scancode(code);
    }
}

#[test]
fn test_plain_letters_decode_in_order() {
    let kbd = Keyboard::new();

    feed(&kbd, &[SC_A, SC_B, SC_C]);

    assert_eq!(kbd.read_char(), Some(b'a'));
    assert_eq!(kbd.read_char(), Some(b'b'));
    assert_eq!(kbd.read_char(), Some(b'c'));
    assert_eq!(kbd.read_char(), None);
}

#[test]
fn test_shift_make_and_break() {
    let kbd = Keyboard::new();

    // Shift held: upper case. Shift released: back to lower case.
    feed(&kbd, &[SC_LEFT_SHIFT, SC_A, SC_LEFT_SHIFT | BREAK, SC_A]);

    assert_eq!(kbd.read_char(), Some(b'A'));
    assert_eq!(kbd.read_char(), Some(b'a'));
    assert_eq!(kbd.read_char(), None);
}

#[test]
fn test_right_shift_selects_shifted_table() {
    let kbd = Keyboard::new();

    feed(&kbd, &[SC_RIGHT_SHIFT, SC_ONE, SC_RIGHT_SHIFT | BREAK, SC_ONE]);

    assert_eq!(kbd.read_char(), Some(b'!'));
    assert_eq!(kbd.read_char(), Some(b'1'));
}

#[test]
fn test_caps_lock_uppercases_letters_only() {
    let kbd = Keyboard::new();

    feed(&kbd, &[SC_CAPS, SC_A, SC_ONE]);

    assert_eq!(kbd.read_char(), Some(b'A'), "caps lock uppercases letters");
    assert_eq!(kbd.read_char(), Some(b'1'), "caps lock must not shift digits");

    // Shift inverts the letter case while caps lock is on.
    feed(&kbd, &[SC_LEFT_SHIFT, SC_A, SC_LEFT_SHIFT | BREAK]);
    assert_eq!(kbd.read_char(), Some(b'a'));

    // A second caps press toggles back off.
    feed(&kbd, &[SC_CAPS, SC_A]);
    assert_eq!(kbd.read_char(), Some(b'a'));
}

#[test]
fn test_modifier_state_tracking() {
    let kbd = Keyboard::new();

    feed(&kbd, &[SC_CTRL, SC_ALT]);
    assert!(kbd.modifiers().contains(KeyModifiers::CTRL));
    assert!(kbd.modifiers().contains(KeyModifiers::ALT));

    feed(&kbd, &[SC_CTRL | BREAK, SC_ALT | BREAK]);
    assert!(kbd.modifiers().is_empty());
}

#[test]
fn test_modifiers_produce_no_characters() {
    let kbd = Keyboard::new();

    feed(
        &kbd,
        &[
            SC_CTRL,
            SC_ALT,
            SC_CAPS,
            SC_LEFT_SHIFT,
            SC_CTRL | BREAK,
            SC_ALT | BREAK,
            SC_LEFT_SHIFT | BREAK,
        ],
    );
    assert_eq!(kbd.read_char(), None);
}

#[test]
fn test_break_codes_produce_no_characters() {
    let kbd = Keyboard::new();

    feed(&kbd, &[SC_A, SC_A | BREAK]);
    assert_eq!(kbd.read_char(), Some(b'a'));
    assert_eq!(kbd.read_char(), None);
}

#[test]
fn test_unmapped_scancodes_are_ignored() {
    let kbd = Keyboard::new();

    // F-keys and beyond-table codes decode to nothing.
    feed(&kbd, &[0x3B, 0x58, 0x5F, 0x7F]);
    assert_eq!(kbd.read_char(), None);
}

#[test]
fn test_raw_ring_pipeline() {
    let kbd = Keyboard::new();

    // The IRQ side enqueues raw codes; nothing is decoded until poll runs.
    assert!(kbd.enqueue_scancode(SC_LEFT_SHIFT));
    assert!(kbd.enqueue_scancode(SC_A));
    assert_eq!(kbd.read_char(), None);

    kbd.poll();
    assert_eq!(kbd.read_char(), Some(b'A'));
    assert_eq!(kbd.read_char(), None);
}

#[test]
fn test_overflow_drops_newest_input() {
    let kbd = Keyboard::new();

    // The decoded ring holds 255 characters; the rest are dropped.
    for _ in 0..300 {
        kbd.process_scancode(SC_A);
    }

    let mut decoded = 0;
    while kbd.read_char().is_some() {
        decoded += 1;
    }
    assert_eq!(decoded, 255);
}

#[test]
fn test_reset_clears_state() {
    let kbd = Keyboard::new();

    feed(&kbd, &[SC_LEFT_SHIFT, SC_A]);
    kbd.reset();

    assert_eq!(kbd.read_char(), None);
    assert!(kbd.modifiers().is_empty());

    // After reset, shift is no longer considered held.
    feed(&kbd, &[SC_A]);
    assert_eq!(kbd.read_char(), Some(b'a'));
}
