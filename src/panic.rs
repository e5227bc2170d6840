//! Kernel panic rendering: failure banner, register dump, halt.
//!
//! Irrecoverable errors end here. Interrupts are disabled first, the
//! banner and the register file are rendered red-on-white on a fresh
//! screen handle (the global console lock may be held by the interrupted
//! context), and the CPU parks in a `cli; hlt` loop. There is no
//! unwinding; errors that can be handled are values, not panics.

use core::fmt::Write;
use core::panic::PanicInfo;

use crate::arch;
use crate::arch::interrupts::{self, InterruptFrame, PageFaultCode};
use crate::drivers::screen::{Color, Screen};

/// Renders the banner head shared by all fatal paths.
fn banner(screen: &mut Screen, title: &str) {
    screen.set_colors(Color::Red, Color::White);
    let _ = write!(screen, "\n!!! KERNEL PANIC: {} !!!\n", title);
}

/// Renders the full general-purpose register file.
fn register_dump(screen: &mut Screen, frame: &InterruptFrame) {
    let _ = write!(
        screen,
        "eax={:#010x} ebx={:#010x} ecx={:#010x} edx={:#010x}\n",
        frame.eax, frame.ebx, frame.ecx, frame.edx
    );
    let _ = write!(
        screen,
        "esi={:#010x} edi={:#010x} ebp={:#010x} esp={:#010x}\n",
        frame.esi, frame.edi, frame.ebp, frame.esp
    );
    let _ = write!(
        screen,
        "eip={:#010x} cs={:#06x} ds={:#06x} eflags={:#010x}\n",
        frame.eip, frame.cs, frame.ds, frame.eflags
    );
    let _ = write!(
        screen,
        "vec={} err={:#010x}\n",
        frame.int_no, frame.err_code
    );
}

/// Fatal exception sink: banner, register dump, halt.
pub fn exception_panic(title: &str, frame: &InterruptFrame) -> ! {
    interrupts::disable();

    let mut screen = Screen::new();
    banner(&mut screen, title);
    register_dump(&mut screen, frame);

    arch::halt_loop();
}

/// Page faults are fatal in this kernel: report the faulting address and
/// the decoded error bits, then halt.
pub fn page_fault_panic(faulting_address: u32, code: PageFaultCode, frame: &InterruptFrame) -> ! {
    interrupts::disable();

    let mut screen = Screen::new();
    banner(&mut screen, "PAGE FAULT");
    let (presence, access, origin) = code.describe();
    let _ = write!(
        screen,
        "address={:#010x} ({}, {}, {})\n",
        faulting_address, presence, access, origin
    );
    register_dump(&mut screen, frame);

    arch::halt_loop();
}

/// Sink for Rust-level panics (`panic!`, failed asserts). Wired up by the
/// kernel binary's `#[panic_handler]`.
pub fn rust_panic(info: &PanicInfo) -> ! {
    interrupts::disable();

    let mut screen = Screen::new();
    banner(&mut screen, "RUST PANIC");

    if let Some(location) = info.location() {
        let _ = write!(screen, "at {}:{}\n", location.file(), location.line());
    }
    let _ = write!(screen, "{}\n", info.message());

    arch::halt_loop();
}
