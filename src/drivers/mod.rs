//! Device drivers and the driver registry.
//!
//! Every platform driver implements the [`Driver`] contract and is owned by
//! the process-wide [`DriverRegistry`] after successful registration. The
//! registry is constructed eagerly in `kernel_main`, before interrupts are
//! enabled; lazy construction under live interrupts would race its own
//! first use.

pub mod ata;
pub mod keyboard;
pub mod rtc;
pub mod screen;
pub mod serial;
pub mod timer;

use core::fmt;

use alloc::boxed::Box;
use lazy_static::lazy_static;

use crate::sync::irqlock::IrqLock;

/// Capacity of the driver registry.
pub const MAX_DRIVERS: usize = 32;

/// Registry-assigned driver identifier.
pub type DriverId = u32;

/// Error space for driver lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The registry has no free slot.
    RegistryFull,
    /// The driver's `init` reported failure; the driver was dropped.
    InitFailed,
    /// No driver with the given id is registered.
    NotFound,
    /// The device did not respond within the polling budget.
    Timeout,
    /// The device reported an error condition.
    DeviceError,
    /// The request is outside the device's addressable range.
    OutOfRange,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegistryFull => f.write_str("driver registry full"),
            Self::InitFailed => f.write_str("driver initialization failed"),
            Self::NotFound => f.write_str("no such driver"),
            Self::Timeout => f.write_str("device timed out"),
            Self::DeviceError => f.write_str("device reported an error"),
            Self::OutOfRange => f.write_str("request out of device range"),
        }
    }
}

/// Uniform driver contract.
///
/// Lifetime: constructed by the per-device factory, owned by the registry
/// after successful registration, released by `unregister` or
/// `shutdown_all`.
pub trait Driver: Send {
    fn name(&self) -> &'static str;

    /// Hardware IRQ line serviced by this driver, if any.
    fn irq(&self) -> Option<u8> {
        None
    }

    /// Brings the device up. A failed init keeps the driver out of the
    /// registry.
    fn init(&mut self) -> Result<(), DriverError>;

    fn shutdown(&mut self) {}

    /// Services one interrupt from the device's IRQ line.
    fn handle_interrupt(&mut self) {}
}

struct DriverRecord {
    id: DriverId,
    name: &'static str,
    irq: Option<u8>,
    initialized: bool,
    driver: Box<dyn Driver>,
}

/// Fixed-capacity driver registry.
pub struct DriverRegistry {
    slots: [Option<DriverRecord>; MAX_DRIVERS],
    count: usize,
    next_id: DriverId,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            count: 0,
            next_id: 1,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Initializes and takes ownership of `driver`.
    ///
    /// On success the assigned id is returned; on failure the driver is
    /// dropped without being retained.
    pub fn register(&mut self, mut driver: Box<dyn Driver>) -> Result<DriverId, DriverError> {
        if self.count >= MAX_DRIVERS {
            return Err(DriverError::RegistryFull);
        }

        driver.init().map_err(|_| DriverError::InitFailed)?;

        let id = self.next_id;
        self.next_id += 1;

        let record = DriverRecord {
            id,
            name: driver.name(),
            irq: driver.irq(),
            initialized: true,
            driver,
        };
        self.slots[self.count] = Some(record);
        self.count += 1;
        Ok(id)
    }

    /// Shuts a driver down and removes it, compacting the array left.
    pub fn unregister(&mut self, id: DriverId) -> Result<(), DriverError> {
        let index = self
            .slots[..self.count]
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|r| r.id == id))
            .ok_or(DriverError::NotFound)?;

        if let Some(mut record) = self.slots[index].take() {
            record.driver.shutdown();
            record.initialized = false;
        }

        for i in index..self.count - 1 {
            self.slots.swap(i, i + 1);
        }
        self.count -= 1;
        Ok(())
    }

    /// Name, IRQ line, and initialized flag of a registered driver.
    pub fn info(&self, id: DriverId) -> Option<(&'static str, Option<u8>, bool)> {
        self.slots[..self.count]
            .iter()
            .flatten()
            .find(|r| r.id == id)
            .map(|r| (r.name, r.irq, r.initialized))
    }

    /// Linear scan for the driver servicing `irq`.
    pub fn id_by_irq(&self, irq: u8) -> Option<DriverId> {
        self.slots[..self.count]
            .iter()
            .flatten()
            .find(|r| r.irq == Some(irq))
            .map(|r| r.id)
    }

    /// Routes one interrupt on `irq` to its owning driver.
    ///
    /// Returns whether a driver claimed the IRQ; an unclaimed IRQ is a
    /// spurious interrupt and is the caller's to log.
    pub fn dispatch_irq(&mut self, irq: u8) -> bool {
        for slot in self.slots[..self.count].iter_mut().flatten() {
            if slot.irq == Some(irq) {
                slot.driver.handle_interrupt();
                return true;
            }
        }
        false
    }

    /// Shuts every driver down and clears the registry.
    pub fn shutdown_all(&mut self) {
        for slot in self.slots[..self.count].iter_mut() {
            if let Some(record) = slot.as_mut() {
                record.driver.shutdown();
                record.initialized = false;
            }
            *slot = None;
        }
        self.count = 0;
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Process-wide driver registry.
    static ref REGISTRY: IrqLock<DriverRegistry> = IrqLock::new(DriverRegistry::new());
}

/// Executes a closure with exclusive access to the kernel driver registry.
pub fn with_registry<R>(f: impl FnOnce(&mut DriverRegistry) -> R) -> R {
    let mut registry = REGISTRY.lock();
    f(&mut registry)
}

/// Registers a driver with the kernel registry.
pub fn register(driver: Box<dyn Driver>) -> Result<DriverId, DriverError> {
    let name = driver.name();
    match with_registry(|registry| registry.register(driver)) {
        Ok(id) => {
            log::info!(target: "drivers", "registered '{}' as driver {}", name, id);
            Ok(id)
        }
        Err(err) => {
            log::warn!(target: "drivers", "registration of '{}' failed: {}", name, err);
            Err(err)
        }
    }
}

/// Removes a driver from the kernel registry.
pub fn unregister(id: DriverId) -> Result<(), DriverError> {
    with_registry(|registry| registry.unregister(id))
}

/// IRQ fan-out for lines not claimed by the timer/keyboard fast path.
pub fn dispatch_irq(irq: u8) {
    let claimed = with_registry(|registry| registry.dispatch_irq(irq));
    if !claimed {
        log::debug!(target: "drivers", "spurious IRQ {}", irq);
    }
}

/// Shuts every registered driver down.
pub fn shutdown_all() {
    with_registry(|registry| registry.shutdown_all());
}
