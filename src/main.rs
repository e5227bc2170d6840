//! Kernel binary: boot entry and main loop.
//!
//! The boot stub enters `kernel_main` with interrupts disabled, protected
//! mode established, segments loaded, and a stack in place. Everything the
//! kernel owns is brought up here, in dependency order, before interrupts
//! come on.

#![cfg_attr(target_arch = "x86", no_std)]
#![cfg_attr(target_arch = "x86", no_main)]

#[cfg(target_arch = "x86")]
mod kernel {
    use core::panic::PanicInfo;

    use alloc::boxed::Box;

    use ferrite_kernel::arch;
    use ferrite_kernel::arch::interrupts;
    use ferrite_kernel::drivers;
    use ferrite_kernel::drivers::ata::AtaDriver;
    use ferrite_kernel::drivers::keyboard::{self, KeyboardDriver};
    use ferrite_kernel::drivers::rtc::{self, RtcDriver};
    use ferrite_kernel::drivers::screen::with_screen;
    use ferrite_kernel::drivers::timer::{PitDriver, DEFAULT_FREQUENCY_HZ};
    use ferrite_kernel::logging;
    use ferrite_kernel::memory::{heap, paging, pmm};
    use ferrite_kernel::panic;
    use ferrite_kernel::scheduler;

    extern crate alloc;

    /// Everything below the end of the kernel heap window is off-limits for
    /// the frame allocator: real-mode data, the kernel image, its stack,
    /// and the heap itself.
    const RESERVED_LOW: (usize, usize) = (0, heap::KERNEL_HEAP_BASE + heap::KERNEL_HEAP_SIZE);

    #[no_mangle]
    pub extern "C" fn kernel_main() -> ! {
        logging::init();

        with_screen(|screen| {
            screen.clear();
            screen.print_str("ferrite kernel booting...\n");
        });

        // Memory first: everything else allocates from the heap.
        // SAFETY:
        // - The heap window is carved out of identity-mapped RAM that
        //   nothing else uses.
        unsafe {
            heap::init(heap::KERNEL_HEAP_BASE, heap::KERNEL_HEAP_SIZE);
        }
        pmm::init(&[RESERVED_LOW]);
        if paging::init_kernel_directory().is_none() {
            log::warn!(target: "kernel", "no heap space for the kernel page directory");
        }

        interrupts::init();
        scheduler::init();

        register_platform_drivers();

        interrupts::enable();
        log::info!(target: "kernel", "boot complete, entering main loop");

        main_loop();
    }

    /// Registers the platform drivers. The registry is built before
    /// interrupts are enabled so IRQ dispatch never races construction.
    fn register_platform_drivers() {
        if drivers::register(Box::new(PitDriver::new(DEFAULT_FREQUENCY_HZ))).is_err() {
            log::warn!(target: "kernel", "timer unavailable, no preemption");
        }

        if drivers::register(Box::new(KeyboardDriver::new())).is_err() {
            log::warn!(target: "kernel", "keyboard unavailable");
        }

        if drivers::register(Box::new(RtcDriver::new())).is_ok() {
            interrupts::unmask_irq(8);
            if let Some(now) = rtc::now() {
                log::info!(
                    target: "kernel",
                    "rtc: {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    now.year,
                    now.month,
                    now.day,
                    now.hours,
                    now.minutes,
                    now.seconds
                );
            }
        }

        // A missing disk is not fatal; the kernel runs without storage.
        if drivers::register(Box::new(AtaDriver::new())).is_ok() {
            interrupts::unmask_irq(14);
        }
    }

    /// Idle work: drain the keyboard, echo decoded input, halt until the
    /// next interrupt.
    fn main_loop() -> ! {
        loop {
            keyboard::poll();
            while let Some(ch) = keyboard::read_char() {
                with_screen(|screen| screen.print_char(ch));
            }
            arch::wait_for_interrupt();
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        panic::rust_panic(info)
    }
}

#[cfg(not(target_arch = "x86"))]
fn main() {}
