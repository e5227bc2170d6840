//! Driver framework integration tests, driven by a mock driver that
//! records its lifecycle calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ferrite_kernel::drivers::{Driver, DriverError, DriverRegistry, MAX_DRIVERS};

#[derive(Default)]
struct MockCounters {
    inits: AtomicUsize,
    shutdowns: AtomicUsize,
    interrupts: AtomicUsize,
}

struct MockDriver {
    name: &'static str,
    irq: Option<u8>,
    fail_init: bool,
    counters: Arc<MockCounters>,
}

impl MockDriver {
    fn new(name: &'static str, irq: Option<u8>) -> (Box<Self>, Arc<MockCounters>) {
        let counters = Arc::new(MockCounters::default());
        let driver = Box::new(Self {
            name,
            irq,
            fail_init: false,
            counters: counters.clone(),
        });
        (driver, counters)
    }

    fn failing(name: &'static str) -> (Box<Self>, Arc<MockCounters>) {
        let counters = Arc::new(MockCounters::default());
        let driver = Box::new(Self {
            name,
            irq: None,
            fail_init: true,
            counters: counters.clone(),
        });
        (driver, counters)
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    fn irq(&self) -> Option<u8> {
        self.irq
    }

    fn init(&mut self) -> Result<(), DriverError> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            Err(DriverError::InitFailed)
        } else {
            Ok(())
        }
    }

    fn shutdown(&mut self) {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_interrupt(&mut self) {
        self.counters.interrupts.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_register_runs_init_and_retains_driver() {
    let mut registry = DriverRegistry::new();
    let (driver, counters) = MockDriver::new("mock0", Some(5));

    let id = registry.register(driver).expect("registration failed");
    assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
    assert_eq!(registry.count(), 1);
    assert_eq!(registry.info(id), Some(("mock0", Some(5), true)));
    assert_eq!(registry.id_by_irq(5), Some(id));
}

#[test]
fn test_failed_init_drops_driver() {
    let mut registry = DriverRegistry::new();
    let (driver, counters) = MockDriver::failing("broken");

    assert_eq!(registry.register(driver), Err(DriverError::InitFailed));
    assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
    assert_eq!(registry.count(), 0, "a failed driver must not be retained");
}

#[test]
fn test_irq_dispatch_reaches_owning_driver() {
    let mut registry = DriverRegistry::new();
    let (kbd, kbd_counters) = MockDriver::new("kbd", Some(1));
    let (disk, disk_counters) = MockDriver::new("disk", Some(14));
    registry.register(kbd).unwrap();
    registry.register(disk).unwrap();

    assert!(registry.dispatch_irq(14));
    assert!(registry.dispatch_irq(14));
    assert!(registry.dispatch_irq(1));

    assert_eq!(disk_counters.interrupts.load(Ordering::SeqCst), 2);
    assert_eq!(kbd_counters.interrupts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unclaimed_irq_reports_spurious() {
    let mut registry = DriverRegistry::new();
    let (driver, counters) = MockDriver::new("mock0", Some(3));
    registry.register(driver).unwrap();

    assert!(!registry.dispatch_irq(9));
    assert_eq!(counters.interrupts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unregister_shuts_down_and_compacts() {
    let mut registry = DriverRegistry::new();
    let (d0, _) = MockDriver::new("d0", Some(3));
    let (d1, c1) = MockDriver::new("d1", Some(4));
    let (d2, c2) = MockDriver::new("d2", Some(5));
    let id0 = registry.register(d0).unwrap();
    let id1 = registry.register(d1).unwrap();
    let id2 = registry.register(d2).unwrap();

    registry.unregister(id1).unwrap();
    assert_eq!(c1.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(registry.count(), 2);

    // The survivors stay reachable after compaction.
    assert_eq!(registry.info(id0), Some(("d0", Some(3), true)));
    assert_eq!(registry.info(id2), Some(("d2", Some(5), true)));
    assert_eq!(registry.id_by_irq(4), None);
    assert!(registry.dispatch_irq(5));
    assert_eq!(c2.interrupts.load(Ordering::SeqCst), 1);

    assert_eq!(registry.unregister(id1), Err(DriverError::NotFound));
}

#[test]
fn test_handler_stays_callable_until_unregister() {
    let mut registry = DriverRegistry::new();
    let (driver, counters) = MockDriver::new("mock0", Some(6));
    let id = registry.register(driver).unwrap();

    for _ in 0..10 {
        assert!(registry.dispatch_irq(6));
    }
    assert_eq!(counters.interrupts.load(Ordering::SeqCst), 10);

    registry.unregister(id).unwrap();
    assert!(!registry.dispatch_irq(6));
    assert_eq!(counters.interrupts.load(Ordering::SeqCst), 10);
}

#[test]
fn test_shutdown_all_clears_registry() {
    let mut registry = DriverRegistry::new();
    let (d0, c0) = MockDriver::new("d0", Some(3));
    let (d1, c1) = MockDriver::new("d1", None);
    registry.register(d0).unwrap();
    registry.register(d1).unwrap();

    registry.shutdown_all();

    assert_eq!(registry.count(), 0);
    assert_eq!(c0.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(c1.shutdowns.load(Ordering::SeqCst), 1);
    assert!(!registry.dispatch_irq(3));
}

#[test]
fn test_registry_capacity_is_enforced() {
    let mut registry = DriverRegistry::new();

    for _ in 0..MAX_DRIVERS {
        let (driver, _) = MockDriver::new("filler", None);
        registry.register(driver).unwrap();
    }

    let (extra, counters) = MockDriver::new("extra", None);
    assert_eq!(registry.register(extra), Err(DriverError::RegistryFull));
    // A full registry rejects before running init.
    assert_eq!(counters.inits.load(Ordering::SeqCst), 0);
    assert_eq!(registry.count(), MAX_DRIVERS);
}
