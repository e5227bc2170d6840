//! Serial Port Driver for Log Output
//!
//! Implements a simple serial port driver for COM1 (0x3F8) used as the sink
//! of the kernel logger. When running under QEMU, use `-serial
//! file:debug.log` to redirect the output to a file on the host system.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::port::PortByte;

/// Standard COM1 base port address
const COM1_PORT: u16 = 0x3F8;

/// Serial port register offsets
const DATA_REGISTER: u16 = 0; // Read/Write data
const INTERRUPT_ENABLE: u16 = 1; // Interrupt enable register
const FIFO_CONTROL: u16 = 2; // FIFO control register
const LINE_CONTROL: u16 = 3; // Line control register
const MODEM_CONTROL: u16 = 4; // Modem control register
const LINE_STATUS: u16 = 5; // Line status register

/// Line status register bits
const LINE_STATUS_THRE: u8 = 0x20; // Transmitter holding register empty

/// Serial port driver for log output
pub struct Serial {
    base_port: u16,
}

impl Serial {
    /// Create a new serial port driver for COM1
    pub const fn new() -> Self {
        Self {
            base_port: COM1_PORT,
        }
    }

    /// Initialize the serial port
    ///
    /// Sets up 115200 baud, 8 data bits, no parity, 1 stop bit (8N1)
    pub fn init(&self) {
        // SAFETY:
        // - The register writes below follow the documented 16550 init
        //   sequence on this port block.
        unsafe {
            let interrupt_enable = PortByte::new(self.base_port + INTERRUPT_ENABLE);
            let fifo_control = PortByte::new(self.base_port + FIFO_CONTROL);
            let line_control = PortByte::new(self.base_port + LINE_CONTROL);
            let modem_control = PortByte::new(self.base_port + MODEM_CONTROL);

            // Disable all interrupts
            interrupt_enable.write(0x00);

            // Enable DLAB (Divisor Latch Access Bit) to set baud rate
            line_control.write(0x80);

            // Set divisor to 1 (115200 baud)
            let divisor_low = PortByte::new(self.base_port + DATA_REGISTER);
            let divisor_high = PortByte::new(self.base_port + INTERRUPT_ENABLE);
            divisor_low.write(0x01);
            divisor_high.write(0x00);

            // Configure line: 8 bits, no parity, 1 stop bit (8N1).
            // Also clears DLAB.
            line_control.write(0x03);

            // Enable FIFO, clear them, with 14-byte threshold
            fifo_control.write(0xC7);

            // Enable IRQs, set RTS/DSR
            modem_control.write(0x0B);
        }
    }

    /// Check if the transmit buffer is empty and ready for data
    #[cfg(target_arch = "x86")]
    fn is_transmit_empty(&self) -> bool {
        // SAFETY:
        // - Reading line status has no side effects.
        unsafe {
            let line_status = PortByte::new(self.base_port + LINE_STATUS);
            (line_status.read() & LINE_STATUS_THRE) != 0
        }
    }

    #[cfg(not(target_arch = "x86"))]
    fn is_transmit_empty(&self) -> bool {
        true
    }

    /// Write a single byte to the serial port
    pub fn write_byte(&self, byte: u8) {
        // Wait for transmit buffer to be empty
        while !self.is_transmit_empty() {
            core::hint::spin_loop();
        }

        // SAFETY:
        // - The data register accepts the next byte once THRE is set.
        unsafe {
            let data = PortByte::new(self.base_port + DATA_REGISTER);
            data.write(byte);
        }
    }

    /// Write a string to the serial port
    pub fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            // Convert LF to CRLF for proper line endings in log files
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl Default for Serial {
    fn default() -> Self {
        Self::new()
    }
}

/// Implement fmt::Write for Serial so we can use write!() and writeln!()
impl fmt::Write for Serial {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Serial::write_str(self, s);
        Ok(())
    }
}

/// Global serial port instance for log output
struct LogSerial {
    serial: UnsafeCell<Serial>,
    initialized: AtomicBool,
}

// SAFETY:
// - Serial port access is inherently single-threaded in this kernel (no
//   SMP), and the initialization state is an atomic flag.
unsafe impl Sync for LogSerial {}

static LOG_SERIAL: LogSerial = LogSerial {
    serial: UnsafeCell::new(Serial::new()),
    initialized: AtomicBool::new(false),
};

/// Initialize the log serial port
///
/// Call this early in kernel initialization to enable log output.
pub fn init() {
    // SAFETY:
    // - Runs once during early boot before concurrent users exist.
    unsafe {
        (*LOG_SERIAL.serial.get()).init();
    }
    LOG_SERIAL.initialized.store(true, Ordering::Release);
}

/// Write formatted output to the serial port, if it is up.
pub fn write_args(args: fmt::Arguments) {
    use fmt::Write;
    if LOG_SERIAL.initialized.load(Ordering::Acquire) {
        // SAFETY:
        // - No SMP; serial writes are serialized by kernel context.
        unsafe {
            let _ = (*LOG_SERIAL.serial.get()).write_fmt(args);
        }
    }
}
