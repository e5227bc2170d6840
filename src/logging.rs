//! Kernel logger: `log` facade over the serial sink, with optional
//! in-memory capture.
//!
//! Every subsystem logs through the `log` macros with a module target; the
//! sink formats `[LEVEL target] message` lines onto COM1. When capture is
//! enabled, the same lines land in a fixed buffer so diagnostics can be
//! replayed onto the console (and inspected by tests) later.

use core::fmt::{self, Write as _};

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::drivers::serial;

const CAPTURE_BUF_SIZE: usize = 8 * 1024;

struct CaptureState {
    enabled: bool,
    len: usize,
    overflow: bool,
    buf: [u8; CAPTURE_BUF_SIZE],
}

impl CaptureState {
    const fn new() -> Self {
        Self {
            enabled: false,
            len: 0,
            overflow: false,
            buf: [0; CAPTURE_BUF_SIZE],
        }
    }
}

struct CaptureWriter<'a> {
    state: &'a mut CaptureState,
}

impl fmt::Write for CaptureWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.state.buf.len().saturating_sub(self.state.len);
        let write_len = remaining.min(bytes.len());

        if write_len > 0 {
            let start = self.state.len;
            self.state.buf[start..start + write_len].copy_from_slice(&bytes[..write_len]);
            self.state.len += write_len;
        }

        if write_len < bytes.len() {
            self.state.overflow = true;
        }
        Ok(())
    }
}

/// The kernel's `log::Log` implementation.
struct KernelLogger {
    capture: Mutex<CaptureState>,
}

impl KernelLogger {
    const fn new() -> Self {
        Self {
            capture: Mutex::new(CaptureState::new()),
        }
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        serial::write_args(format_args!(
            "[{} {}] {}\n",
            record.level(),
            record.target(),
            record.args()
        ));

        let mut capture = self.capture.lock();
        if capture.enabled {
            let mut writer = CaptureWriter {
                state: &mut capture,
            };
            let _ = writer.write_fmt(format_args!(
                "[{} {}] {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger::new();

/// Installs the kernel logger. Safe to call more than once; only the first
/// call wins.
pub fn init() {
    serial::init();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

/// Raises or lowers the global level filter.
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Enables/disables the capture buffer and resets it.
pub fn set_capture_enabled(enabled: bool) {
    let mut capture = LOGGER.capture.lock();
    capture.enabled = enabled;
    capture.len = 0;
    capture.overflow = false;
}

/// Runs a closure over the captured log text; the second argument reports
/// whether lines were dropped on overflow.
pub fn with_captured<R>(f: impl FnOnce(&str, bool) -> R) -> R {
    let capture = LOGGER.capture.lock();
    let text = core::str::from_utf8(&capture.buf[..capture.len]).unwrap_or("");
    f(text, capture.overflow)
}
