//! PIT (8254) timer driver.
//!
//! Channel 0 is programmed as a rate generator; at 100 Hz the kernel clock
//! advances 10 ms per interrupt. The scheduler's tick path records each
//! tick here so the driver counter stays in step with the kernel clock.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::port::PortByte;
use crate::drivers::{Driver, DriverError};

const PIT_COMMAND: u16 = 0x43;
const PIT_CHANNEL0: u16 = 0x40;

/// Command byte: channel 0, lobyte/hibyte access, rate generator.
const PIT_MODE_RATE_GENERATOR: u8 = 0x36;

/// Input clock of the PIT in Hz.
pub const PIT_INPUT_HZ: u32 = 1_193_180;

/// Default interrupt rate: 100 Hz = one tick per 10 ms.
pub const DEFAULT_FREQUENCY_HZ: u32 = 100;

/// Ticks observed by the timer driver since boot.
static TICK_COUNT: AtomicU64 = AtomicU64::new(0);

/// Computes the PIT divisor for the requested interrupt frequency.
///
/// Returns 0 for `hz == 0` so callers can decide how to handle invalid
/// input; out-of-range divisors are clamped to the 16-bit latch.
pub const fn pit_divisor_for_hz(hz: u32) -> u16 {
    if hz == 0 {
        return 0;
    }

    let divisor = PIT_INPUT_HZ / hz;
    if divisor == 0 {
        1
    } else if divisor > u16::MAX as u32 {
        u16::MAX
    } else {
        divisor as u16
    }
}

/// Programs PIT channel 0 as a periodic timer with the given frequency.
pub fn program_channel0(hz: u32) -> Result<(), DriverError> {
    let divisor = pit_divisor_for_hz(hz);
    if divisor == 0 {
        return Err(DriverError::OutOfRange);
    }

    // SAFETY:
    // - Command then low/high divisor bytes is the documented channel-0
    //   programming sequence.
    unsafe {
        let cmd = PortByte::new(PIT_COMMAND);
        let data = PortByte::new(PIT_CHANNEL0);
        cmd.write(PIT_MODE_RATE_GENERATOR);
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);
    }
    Ok(())
}

/// Called once per timer IRQ by the kernel tick path.
pub fn record_tick() {
    TICK_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Ticks observed since boot.
pub fn tick_count() -> u64 {
    TICK_COUNT.load(Ordering::Relaxed)
}

/// Registry-facing PIT driver.
pub struct PitDriver {
    frequency_hz: u32,
}

impl PitDriver {
    pub const fn new(frequency_hz: u32) -> Self {
        Self { frequency_hz }
    }
}

impl Default for PitDriver {
    fn default() -> Self {
        Self::new(DEFAULT_FREQUENCY_HZ)
    }
}

impl Driver for PitDriver {
    fn name(&self) -> &'static str {
        "pit"
    }

    fn irq(&self) -> Option<u8> {
        Some(0)
    }

    fn init(&mut self) -> Result<(), DriverError> {
        TICK_COUNT.store(0, Ordering::Relaxed);
        program_channel0(self.frequency_hz)
    }

    fn handle_interrupt(&mut self) {
        // IRQ0 normally takes the scheduler fast path; this only runs when
        // the line is routed through the registry.
        record_tick();
    }
}
