//! PS/2 keyboard driver.
//!
//! Two-stage pipeline: the IRQ1 fast path only enqueues raw scancodes into
//! a ring buffer; [`Keyboard::poll`] drains and decodes them (modifier
//! tracking, base/shifted ASCII lookup) into a second ring that
//! [`Keyboard::read_char`] consumes. Both rings follow the one-slot-
//! reserved discipline, so a burst beyond capacity drops bytes instead of
//! overwriting unread input.

use bitflags::bitflags;
use spin::Mutex;

use crate::arch::port::{io_wait, PortByte};
use crate::drivers::{Driver, DriverError};
use crate::sync::ringbuffer::RingBuffer;

/// Keyboard controller ports
const KBD_STATUS_PORT: u16 = 0x64;
const KBD_DATA_PORT: u16 = 0x60;

/// Controller status bits
#[cfg(target_arch = "x86")]
const KBD_STATUS_OUTPUT_FULL: u8 = 0x01;
#[cfg(target_arch = "x86")]
const KBD_STATUS_INPUT_FULL: u8 = 0x02;

/// Controller and device commands
const KBD_CTRL_CMD_ENABLE: u8 = 0xAE;
const KBD_DEV_CMD_ENABLE_SCANNING: u8 = 0xF4;
const KBD_DEV_CMD_SET_LEDS: u8 = 0xED;
#[cfg(target_arch = "x86")]
const KBD_DEV_ACK: u8 = 0xFA;

/// Poll budget for controller handshakes.
#[cfg(target_arch = "x86")]
const KBD_POLL_BUDGET: u32 = 100_000;

/// Modifier scancodes
const SCANCODE_LEFT_SHIFT: u8 = 0x2A;
const SCANCODE_RIGHT_SHIFT: u8 = 0x36;
const SCANCODE_CTRL: u8 = 0x1D;
const SCANCODE_ALT: u8 = 0x38;
const SCANCODE_CAPS_LOCK: u8 = 0x3A;

/// High bit set denotes a key release.
const SCANCODE_BREAK_BIT: u8 = 0x80;

/// Scan code table size (0x00..=0x58)
const SCANCODE_TABLE_LEN: usize = 0x59;

/// Ring buffer capacity (one slot stays reserved).
const INPUT_BUFFER_CAPACITY: usize = 256;

/// Lower-case US scan code map (printable ASCII only; 0 == ignored)
const SCANCODES_BASE: [u8; SCANCODE_TABLE_LEN] = [
    0, 0, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0x08, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0, b'a', b's',
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v',
    b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ', 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Shifted US scan code map (printable ASCII only; 0 == ignored)
const SCANCODES_SHIFTED: [u8; SCANCODE_TABLE_LEN] = [
    0, 0, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 0x08, b'\t',
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n', 0, b'A', b'S',
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~', 0, b'|', b'Z', b'X', b'C', b'V',
    b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*', 0, b' ', 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0,
];

bitflags! {
    /// Live modifier state tracked across make/break codes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyModifiers: u8 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
        const CAPS_LOCK = 1 << 3;
    }
}

/// Keyboard state: raw scancode ring, decoded character ring, modifiers.
pub struct Keyboard {
    raw: RingBuffer<INPUT_BUFFER_CAPACITY>,
    chars: RingBuffer<INPUT_BUFFER_CAPACITY>,
    modifiers: Mutex<KeyModifiers>,
}

impl Keyboard {
    pub const fn new() -> Self {
        Self {
            raw: RingBuffer::new(),
            chars: RingBuffer::new(),
            modifiers: Mutex::new(KeyModifiers::empty()),
        }
    }

    /// Resets rings and modifier state.
    pub fn reset(&self) {
        self.raw.clear();
        self.chars.clear();
        *self.modifiers.lock() = KeyModifiers::empty();
    }

    /// IRQ fast path: push one raw scancode. Full buffer drops the code.
    pub fn enqueue_scancode(&self, code: u8) -> bool {
        self.raw.push(code)
    }

    /// Drains pending raw scancodes and decodes them into characters.
    /// Call regularly from the main loop before consuming characters.
    pub fn poll(&self) {
        while let Some(code) = self.raw.pop() {
            self.process_scancode(code);
        }
    }

    /// Read a decoded character if available.
    pub fn read_char(&self) -> Option<u8> {
        self.chars.pop()
    }

    pub fn modifiers(&self) -> KeyModifiers {
        *self.modifiers.lock()
    }

    /// Decodes one scancode, updating modifier state and appending any
    /// resulting ASCII character to the character ring.
    pub fn process_scancode(&self, code: u8) {
        if code & SCANCODE_BREAK_BIT != 0 {
            self.handle_break(code & !SCANCODE_BREAK_BIT);
        } else {
            self.handle_make(code);
        }
    }

    fn handle_break(&self, code: u8) {
        let mut modifiers = self.modifiers.lock();
        match code {
            SCANCODE_CTRL => modifiers.remove(KeyModifiers::CTRL),
            SCANCODE_ALT => modifiers.remove(KeyModifiers::ALT),
            SCANCODE_LEFT_SHIFT | SCANCODE_RIGHT_SHIFT => modifiers.remove(KeyModifiers::SHIFT),
            _ => {}
        }
    }

    fn handle_make(&self, code: u8) {
        {
            let mut modifiers = self.modifiers.lock();
            match code {
                SCANCODE_CTRL => {
                    modifiers.insert(KeyModifiers::CTRL);
                    return;
                }
                SCANCODE_ALT => {
                    modifiers.insert(KeyModifiers::ALT);
                    return;
                }
                SCANCODE_LEFT_SHIFT | SCANCODE_RIGHT_SHIFT => {
                    modifiers.insert(KeyModifiers::SHIFT);
                    return;
                }
                SCANCODE_CAPS_LOCK => {
                    modifiers.toggle(KeyModifiers::CAPS_LOCK);
                    let caps = modifiers.contains(KeyModifiers::CAPS_LOCK);
                    drop(modifiers);
                    update_leds(caps);
                    return;
                }
                _ => {}
            }
        }

        let modifiers = self.modifiers();
        let shift = modifiers.contains(KeyModifiers::SHIFT);
        let caps = modifiers.contains(KeyModifiers::CAPS_LOCK);

        // Caps Lock inverts the case of letters only; everything else
        // follows the shift state alone.
        let use_shifted = if is_alpha(code) { shift ^ caps } else { shift };

        let table = if use_shifted {
            &SCANCODES_SHIFTED
        } else {
            &SCANCODES_BASE
        };

        let Some(&key) = table.get(code as usize) else {
            return;
        };

        if key != 0 {
            let _ = self.chars.push(key);
        }
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

fn is_alpha(code: u8) -> bool {
    matches!(
        code,
        0x10..=0x19 // Q..P
            | 0x1E..=0x26 // A..L
            | 0x2C..=0x32 // Z..M
    )
}

/// Waits until the controller input buffer can accept another byte.
#[cfg(target_arch = "x86")]
fn wait_input_clear() -> bool {
    for _ in 0..KBD_POLL_BUDGET {
        // SAFETY:
        // - Reading controller status has no side effects.
        let status = unsafe { PortByte::new(KBD_STATUS_PORT).read() };
        if status & KBD_STATUS_INPUT_FULL == 0 {
            return true;
        }
        core::hint::spin_loop();
    }
    false
}

#[cfg(not(target_arch = "x86"))]
fn wait_input_clear() -> bool {
    true
}

/// Waits for the device to acknowledge the last command with 0xFA.
#[cfg(target_arch = "x86")]
fn wait_ack() -> bool {
    for _ in 0..KBD_POLL_BUDGET {
        // SAFETY:
        // - Reading controller status/data consumes a pending response.
        unsafe {
            let status = PortByte::new(KBD_STATUS_PORT).read();
            if status & KBD_STATUS_OUTPUT_FULL != 0
                && PortByte::new(KBD_DATA_PORT).read() == KBD_DEV_ACK
            {
                return true;
            }
        }
        core::hint::spin_loop();
    }
    false
}

#[cfg(not(target_arch = "x86"))]
fn wait_ack() -> bool {
    true
}

/// Reflects the Caps Lock state on the keyboard LEDs (0xED command).
fn update_leds(caps: bool) {
    let leds = if caps { 0x04 } else { 0x00 };

    if !wait_input_clear() {
        return;
    }
    // SAFETY:
    // - 0xED followed by the LED byte is the documented device command.
    unsafe {
        PortByte::new(KBD_DATA_PORT).write(KBD_DEV_CMD_SET_LEDS);
    }
    if !wait_input_clear() {
        return;
    }
    // SAFETY:
    // - See above; the device expects the LED payload next.
    unsafe {
        PortByte::new(KBD_DATA_PORT).write(leds);
    }
}

/// Process-wide keyboard instance.
static KEYBOARD: Keyboard = Keyboard::new();

/// IRQ1 fast path called from the interrupt dispatcher.
pub fn isr_enqueue_scancode(code: u8) {
    let _ = KEYBOARD.enqueue_scancode(code);
}

/// Drains and decodes pending scancodes on the kernel keyboard.
pub fn poll() {
    KEYBOARD.poll();
}

/// Reads one decoded character from the kernel keyboard.
pub fn read_char() -> Option<u8> {
    KEYBOARD.read_char()
}

/// Registry-facing PS/2 keyboard driver.
pub struct KeyboardDriver;

impl KeyboardDriver {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for KeyboardDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for KeyboardDriver {
    fn name(&self) -> &'static str {
        "ps2-keyboard"
    }

    fn irq(&self) -> Option<u8> {
        Some(1)
    }

    /// Enables the first PS/2 port and device scanning, waiting for the
    /// 0xFA acknowledge.
    fn init(&mut self) -> Result<(), DriverError> {
        KEYBOARD.reset();

        if !wait_input_clear() {
            return Err(DriverError::Timeout);
        }
        // SAFETY:
        // - 0xAE on the command port enables the first PS/2 port.
        unsafe {
            PortByte::new(KBD_STATUS_PORT).write(KBD_CTRL_CMD_ENABLE);
        }
        io_wait();

        if !wait_input_clear() {
            return Err(DriverError::Timeout);
        }
        // SAFETY:
        // - 0xF4 on the data port starts device scanning.
        unsafe {
            PortByte::new(KBD_DATA_PORT).write(KBD_DEV_CMD_ENABLE_SCANNING);
        }

        if !wait_ack() {
            return Err(DriverError::InitFailed);
        }
        Ok(())
    }

    fn handle_interrupt(&mut self) {
        // SAFETY:
        // - Reading the data port consumes the pending scancode.
        let code = unsafe { PortByte::new(KBD_DATA_PORT).read() };
        let _ = KEYBOARD.enqueue_scancode(code);
    }
}
