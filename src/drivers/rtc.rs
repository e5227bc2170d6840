//! CMOS real-time clock driver.
//!
//! The RTC is reached through the CMOS index/data port pair. Init turns on
//! periodic interrupts (register B bit 6) and reads register C once to arm
//! the line; every interrupt must read register C again to be acknowledged.
//! `now()` waits out an in-progress update, then reads and BCD-decodes the
//! date/time registers.

use crate::arch::port::PortByte;
use crate::drivers::{Driver, DriverError};

const CMOS_INDEX_PORT: u16 = 0x70;
const CMOS_DATA_PORT: u16 = 0x71;

/// Date/time register indices.
const RTC_SECONDS: u8 = 0x00;
const RTC_MINUTES: u8 = 0x02;
const RTC_HOURS: u8 = 0x04;
const RTC_DAY: u8 = 0x07;
const RTC_MONTH: u8 = 0x08;
const RTC_YEAR: u8 = 0x09;

/// Status registers.
const RTC_STATUS_A: u8 = 0x0A;
const RTC_STATUS_B: u8 = 0x0B;
const RTC_STATUS_C: u8 = 0x0C;

/// Status A bit 7: update in progress.
const RTC_UPDATE_IN_PROGRESS: u8 = 0x80;

/// Status B bit 6: periodic interrupt enable.
const RTC_PERIODIC_ENABLE: u8 = 0x40;

/// Poll budget for the update-in-progress wait.
const RTC_POLL_BUDGET: u32 = 100_000;

/// Calendar timestamp read from the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

/// Decodes one binary-coded-decimal byte.
pub const fn bcd_to_binary(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

fn read_register(index: u8) -> u8 {
    // SAFETY:
    // - Selecting an index then reading the data port is the CMOS access
    //   protocol; both ports are only driven from kernel context.
    unsafe {
        PortByte::new(CMOS_INDEX_PORT).write(index);
        PortByte::new(CMOS_DATA_PORT).read()
    }
}

fn write_register(index: u8, value: u8) {
    // SAFETY:
    // - See `read_register`; writes follow the same index/data protocol.
    unsafe {
        PortByte::new(CMOS_INDEX_PORT).write(index);
        PortByte::new(CMOS_DATA_PORT).write(value);
    }
}

/// Waits until the clock is not mid-update, within the poll budget.
fn wait_update_clear() -> bool {
    for _ in 0..RTC_POLL_BUDGET {
        if read_register(RTC_STATUS_A) & RTC_UPDATE_IN_PROGRESS == 0 {
            return true;
        }
        core::hint::spin_loop();
    }
    false
}

/// Reads the current wall-clock time.
///
/// Returns `None` when the clock never left its update window.
pub fn now() -> Option<DateTime> {
    if !wait_update_clear() {
        return None;
    }

    let seconds = bcd_to_binary(read_register(RTC_SECONDS));
    let minutes = bcd_to_binary(read_register(RTC_MINUTES));
    let hours = bcd_to_binary(read_register(RTC_HOURS));
    let day = bcd_to_binary(read_register(RTC_DAY));
    let month = bcd_to_binary(read_register(RTC_MONTH));
    let year = bcd_to_binary(read_register(RTC_YEAR)) as u16 + 2000;

    Some(DateTime {
        year,
        month,
        day,
        hours,
        minutes,
        seconds,
    })
}

/// Registry-facing RTC driver.
pub struct RtcDriver;

impl RtcDriver {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for RtcDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for RtcDriver {
    fn name(&self) -> &'static str {
        "rtc"
    }

    fn irq(&self) -> Option<u8> {
        Some(8)
    }

    /// Enables periodic interrupts and arms the line by clearing register C.
    fn init(&mut self) -> Result<(), DriverError> {
        let status_b = read_register(RTC_STATUS_B);
        write_register(RTC_STATUS_B, status_b | RTC_PERIODIC_ENABLE);

        // Register C must be read once, or the first interrupt never fires.
        let _ = read_register(RTC_STATUS_C);
        Ok(())
    }

    fn shutdown(&mut self) {
        let status_b = read_register(RTC_STATUS_B);
        write_register(RTC_STATUS_B, status_b & !RTC_PERIODIC_ENABLE);
    }

    fn handle_interrupt(&mut self) {
        // Reading register C acknowledges the interrupt; without it the RTC
        // holds the line and no further periodic interrupts arrive.
        let _ = read_register(RTC_STATUS_C);
    }
}
