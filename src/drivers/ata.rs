//! ATA PIO Mode Driver for the Primary ATA Controller
//!
//! Implements 28-bit LBA sector read/write using PIO (Programmed I/O) mode
//! on the primary ATA bus (ports 0x1F0-0x1F7, control 0x3F6). All device
//! waits poll the status register with a fixed budget; a device that never
//! becomes ready fails the operation instead of hanging the kernel.

use bitflags::bitflags;
use spin::Mutex;

use crate::arch::port::{PortByte, PortWord};
use crate::drivers::{Driver, DriverError};

/// Bytes per sector on an ATA disk.
pub const SECTOR_SIZE: usize = 512;

/// Number of 16-bit words per sector (512 / 2 = 256).
const WORDS_PER_SECTOR: usize = SECTOR_SIZE / 2;

/// Primary ATA controller base I/O port.
const PRIMARY_BASE: u16 = 0x1F0;

/// Primary ATA device-control port.
const PRIMARY_CONTROL: u16 = 0x3F6;

// Primary ATA controller port offsets from base
const DATA_PORT_OFFSET: u16 = 0;
const SECTOR_COUNT_OFFSET: u16 = 2;
const LBA_LOW_OFFSET: u16 = 3;
const LBA_MID_OFFSET: u16 = 4;
const LBA_HIGH_OFFSET: u16 = 5;
const DRIVE_HEAD_OFFSET: u16 = 6;
const STATUS_COMMAND_OFFSET: u16 = 7;

/// ATA commands.
const ATA_CMD_READ_SECTORS: u8 = 0x20;
const ATA_CMD_WRITE_SECTORS: u8 = 0x30;
const ATA_CMD_CACHE_FLUSH: u8 = 0xE7;
const ATA_CMD_IDENTIFY: u8 = 0xEC;

/// Drive select bytes for the master device.
const DRIVE_SELECT_MASTER: u8 = 0xA0;
const DRIVE_SELECT_MASTER_LBA: u8 = 0xE0;

/// Highest address expressible in 28-bit LBA.
pub const LBA28_MAX: u32 = 0x0FFF_FFFF;

/// Every status wait gives up after this many polls.
pub const POLL_BUDGET: u32 = 100_000;

/// IDENTIFY word offsets.
const IDENTIFY_MODEL_OFFSET: usize = 27;
const IDENTIFY_MODEL_WORDS: usize = 20;
const IDENTIFY_LBA28_LOW: usize = 60;
const IDENTIFY_LBA28_HIGH: usize = 61;

bitflags! {
    /// ATA status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AtaStatus: u8 {
        const ERR = 0x01;
        const DRQ = 0x08;
        const DF = 0x20;
        const BSY = 0x80;
    }
}

/// Errors that can occur during ATA operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaError {
    /// The device did not reach the expected state within [`POLL_BUDGET`].
    Timeout,
    /// The drive reported an error (ERR bit set in status).
    DeviceError,
    /// The drive reported a fault (DF bit set in status).
    DeviceFault,
    /// The LBA exceeds the 28-bit limit.
    LbaOutOfRange,
    /// No device answered the IDENTIFY handshake.
    NoDevice,
}

/// ATA PIO driver for one ATA bus.
pub struct AtaPio {
    data: PortWord,
    sector_count: PortByte,
    lba_low: PortByte,
    lba_mid: PortByte,
    lba_high: PortByte,
    drive_head: PortByte,
    status_cmd: PortByte,
    control: PortByte,
}

impl AtaPio {
    /// Create a new ATA PIO driver for the given base port.
    pub const fn new(base: u16, control: u16) -> Self {
        Self {
            data: PortWord::new(base + DATA_PORT_OFFSET),
            sector_count: PortByte::new(base + SECTOR_COUNT_OFFSET),
            lba_low: PortByte::new(base + LBA_LOW_OFFSET),
            lba_mid: PortByte::new(base + LBA_MID_OFFSET),
            lba_high: PortByte::new(base + LBA_HIGH_OFFSET),
            drive_head: PortByte::new(base + DRIVE_HEAD_OFFSET),
            status_cmd: PortByte::new(base + STATUS_COMMAND_OFFSET),
            control: PortByte::new(control),
        }
    }

    /// Read the status register.
    fn read_status(&self) -> AtaStatus {
        // SAFETY:
        // - Reading ATA status uses the controller I/O port of this device.
        AtaStatus::from_bits_truncate(unsafe { self.status_cmd.read() })
    }

    /// Poll until BSY clears, within the budget.
    fn wait_not_busy(&self) -> Result<(), AtaError> {
        for _ in 0..POLL_BUDGET {
            if !self.read_status().contains(AtaStatus::BSY) {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(AtaError::Timeout)
    }

    /// Poll until the device requests data (!BSY && DRQ), within the budget.
    /// Error bits have priority over readiness.
    fn wait_data_request(&self) -> Result<(), AtaError> {
        for _ in 0..POLL_BUDGET {
            let status = self.read_status();
            if status.contains(AtaStatus::ERR) {
                return Err(AtaError::DeviceError);
            }
            if status.contains(AtaStatus::DF) {
                return Err(AtaError::DeviceFault);
            }
            if !status.contains(AtaStatus::BSY) && status.contains(AtaStatus::DRQ) {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(AtaError::Timeout)
    }

    /// Program transfer count and 28-bit LBA address, then issue a command.
    fn setup_command(&self, lba: u32, sector_count: u8, command: u8) -> Result<(), AtaError> {
        self.wait_not_busy()?;

        // SAFETY:
        // - Writes target ATA task-file registers on the configured bus.
        // - The caller validated `lba` against the 28-bit limit.
        unsafe {
            self.drive_head
                .write(DRIVE_SELECT_MASTER_LBA | ((lba >> 24) as u8 & 0x0F));
            self.sector_count.write(sector_count);
            self.lba_low.write(lba as u8);
            self.lba_mid.write((lba >> 8) as u8);
            self.lba_high.write((lba >> 16) as u8);
            self.status_cmd.write(command);
        }
        Ok(())
    }

    /// Runs IDENTIFY DEVICE on the master drive and returns the raw 256
    /// identification words.
    pub fn identify(&self) -> Result<[u16; 256], AtaError> {
        self.wait_not_busy()?;

        // SAFETY:
        // - Select master with zeroed task-file registers, then IDENTIFY,
        //   per the legacy ATA handshake.
        unsafe {
            self.drive_head.write(DRIVE_SELECT_MASTER);
            self.sector_count.write(0);
            self.lba_low.write(0);
            self.lba_mid.write(0);
            self.lba_high.write(0);
            self.status_cmd.write(ATA_CMD_IDENTIFY);
        }

        if self.read_status().is_empty() {
            return Err(AtaError::NoDevice);
        }

        self.wait_not_busy()?;

        // A non-ATA device parks a signature in the LBA registers.
        // SAFETY:
        // - Reading task-file registers has no side effects here.
        let (mid, high) = unsafe { (self.lba_mid.read(), self.lba_high.read()) };
        if mid != 0 || high != 0 {
            return Err(AtaError::NoDevice);
        }

        self.wait_data_request()?;

        let mut words = [0u16; 256];
        for word in words.iter_mut() {
            // SAFETY:
            // - DRQ is set; the device streams 256 words.
            *word = unsafe { self.data.read() };
        }
        Ok(words)
    }

    /// Reads one 512-byte sector.
    pub fn read_sector(&self, lba: u32, buffer: &mut [u8; SECTOR_SIZE]) -> Result<(), AtaError> {
        if lba > LBA28_MAX {
            return Err(AtaError::LbaOutOfRange);
        }

        self.setup_command(lba, 1, ATA_CMD_READ_SECTORS)?;
        self.wait_data_request()?;

        for word_idx in 0..WORDS_PER_SECTOR {
            // SAFETY:
            // - Controller state is `!BSY && DRQ` for this sector.
            let word = unsafe { self.data.read() };
            buffer[word_idx * 2] = word as u8;
            buffer[word_idx * 2 + 1] = (word >> 8) as u8;
        }
        Ok(())
    }

    /// Writes one 512-byte sector, then flushes the device cache.
    pub fn write_sector(&self, lba: u32, buffer: &[u8; SECTOR_SIZE]) -> Result<(), AtaError> {
        if lba > LBA28_MAX {
            return Err(AtaError::LbaOutOfRange);
        }

        self.setup_command(lba, 1, ATA_CMD_WRITE_SECTORS)?;
        self.wait_data_request()?;

        for word_idx in 0..WORDS_PER_SECTOR {
            let word = (buffer[word_idx * 2] as u16) | ((buffer[word_idx * 2 + 1] as u16) << 8);
            // SAFETY:
            // - Controller state is `!BSY && DRQ` for this sector.
            unsafe {
                self.data.write(word);
            }
        }

        // SAFETY:
        // - CACHE FLUSH forces the device to commit its write cache.
        unsafe {
            self.status_cmd.write(ATA_CMD_CACHE_FLUSH);
        }
        self.wait_not_busy()
    }

    /// Resets the bus through the device-control register.
    pub fn soft_reset(&self) -> Result<(), AtaError> {
        // SAFETY:
        // - Setting then clearing SRST is the documented software reset.
        unsafe {
            self.control.write(0x04);
            self.control.write(0x00);
        }
        self.wait_not_busy()
    }
}

/// Decodes the model string from IDENTIFY data: 20 words at offset 27,
/// each holding two characters byte-swapped.
pub fn identify_model(words: &[u16; 256]) -> [u8; IDENTIFY_MODEL_WORDS * 2] {
    let mut model = [0u8; IDENTIFY_MODEL_WORDS * 2];
    for i in 0..IDENTIFY_MODEL_WORDS {
        let word = words[IDENTIFY_MODEL_OFFSET + i];
        model[i * 2] = (word >> 8) as u8;
        model[i * 2 + 1] = word as u8;
    }
    model
}

/// Total addressable LBA28 sectors from IDENTIFY words 60-61.
pub const fn identify_lba28_sectors(words: &[u16; 256]) -> u32 {
    words[IDENTIFY_LBA28_LOW] as u32 | ((words[IDENTIFY_LBA28_HIGH] as u32) << 16)
}

/// Identification summary of the attached disk.
#[derive(Debug, Clone, Copy)]
pub struct DiskInfo {
    model: [u8; IDENTIFY_MODEL_WORDS * 2],
    pub total_sectors: u32,
}

impl DiskInfo {
    pub fn from_identify(words: &[u16; 256]) -> Self {
        Self {
            model: identify_model(words),
            total_sectors: identify_lba28_sectors(words),
        }
    }

    /// Model string with trailing padding stripped.
    pub fn model(&self) -> &str {
        let text = core::str::from_utf8(&self.model).unwrap_or("");
        text.trim_end_matches([' ', '\0'])
    }
}

/// Primary-bus controller instance.
static PRIMARY_ATA: Mutex<AtaPio> = Mutex::new(AtaPio::new(PRIMARY_BASE, PRIMARY_CONTROL));

/// Reads one sector from the primary master disk.
pub fn read_sector(lba: u32, buffer: &mut [u8; SECTOR_SIZE]) -> Result<(), AtaError> {
    PRIMARY_ATA.lock().read_sector(lba, buffer)
}

/// Writes one sector to the primary master disk.
pub fn write_sector(lba: u32, buffer: &[u8; SECTOR_SIZE]) -> Result<(), AtaError> {
    PRIMARY_ATA.lock().write_sector(lba, buffer)
}

/// Registry-facing ATA driver for the primary master.
pub struct AtaDriver {
    info: Option<DiskInfo>,
}

impl AtaDriver {
    pub const fn new() -> Self {
        Self { info: None }
    }

    pub fn info(&self) -> Option<&DiskInfo> {
        self.info.as_ref()
    }
}

impl Default for AtaDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for AtaDriver {
    fn name(&self) -> &'static str {
        "ata-primary"
    }

    fn irq(&self) -> Option<u8> {
        Some(14)
    }

    /// Identifies the master drive; a bus with no answering device fails
    /// registration.
    fn init(&mut self) -> Result<(), DriverError> {
        let words = PRIMARY_ATA.lock().identify().map_err(|err| match err {
            AtaError::Timeout => DriverError::Timeout,
            AtaError::NoDevice => DriverError::InitFailed,
            _ => DriverError::DeviceError,
        })?;

        let info = DiskInfo::from_identify(&words);
        log::info!(
            target: "ata",
            "primary master: '{}', {} sectors",
            info.model(),
            info.total_sectors
        );
        self.info = Some(info);
        Ok(())
    }

    fn handle_interrupt(&mut self) {
        // Reading the status register clears the device interrupt line.
        let _ = PRIMARY_ATA.lock().read_status();
    }
}
