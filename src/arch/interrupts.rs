//! Interrupt and PIC wiring: IDT population, 8259 remap, ISR/IRQ dispatch.
//!
//! Vector layout:
//! - 0..=31: CPU exceptions (divide, debug, GPF, page fault get real stubs)
//! - 32..=47: hardware IRQs, remapped away from the exception range
//! - 0x80: syscall trap gate, reachable from ring 3

#[cfg(target_arch = "x86")]
use core::cell::UnsafeCell;
use core::mem::size_of;

use bitflags::bitflags;

use crate::arch::port::{io_wait, PortByte};
use crate::drivers;
use crate::panic;
use crate::scheduler;
use crate::syscall;

#[cfg(target_arch = "x86")]
const IDT_ENTRIES: usize = 256;

/// First vector of the remapped IRQ range.
pub const IRQ_BASE: u8 = 32;
pub const IRQ0_PIT_TIMER_VECTOR: u8 = IRQ_BASE;
pub const IRQ1_KEYBOARD_VECTOR: u8 = IRQ_BASE + 1;
pub const IRQ8_CMOS_RTC_VECTOR: u8 = IRQ_BASE + 8;
pub const IRQ14_PRIMARY_ATA_VECTOR: u8 = IRQ_BASE + 14;
pub const SYSCALL_INT80_VECTOR: u8 = 0x80;

pub const EXCEPTION_DIVIDE_ERROR: u8 = 0;
pub const EXCEPTION_DEBUG: u8 = 1;
pub const EXCEPTION_GENERAL_PROTECTION: u8 = 13;
pub const EXCEPTION_PAGE_FAULT: u8 = 14;

/// Gate type/attribute byte: present, ring 0, 32-bit interrupt gate.
pub const IDT_GATE_FLAGS: u8 = 0x8E;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;
const PIC_EOI: u8 = 0x20;

const PIC_ICW1_INIT: u8 = 0x10;
const PIC_ICW1_ICW4: u8 = 0x01;
const PIC_ICW4_8086: u8 = 0x01;

/// Master mask after remap: only the timer (bit 0) and keyboard (bit 1) open.
const PIC1_INITIAL_MASK: u8 = 0xFC;
/// Slave mask after remap: every line closed until a driver opens its own.
const PIC2_INITIAL_MASK: u8 = 0xFF;

/// PS/2 controller data port, read by the keyboard IRQ fast path.
const PS2_DATA_PORT: u16 = 0x60;

bitflags! {
    /// Low bits of the page-fault error code pushed by the CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultCode: u32 {
        /// Set: protection violation. Clear: page not present.
        const PROTECTION_VIOLATION = 1 << 0;
        /// Set: faulting access was a write.
        const CAUSED_BY_WRITE = 1 << 1;
        /// Set: fault originated in ring 3.
        const USER_MODE = 1 << 2;
        /// Set: reserved bit violation in a paging structure.
        const RESERVED_BIT = 1 << 3;
        /// Set: fault was an instruction fetch.
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

impl PageFaultCode {
    /// Human-readable decode of the three bits the kernel acts on.
    pub fn describe(self) -> (&'static str, &'static str, &'static str) {
        let presence = if self.contains(Self::PROTECTION_VIOLATION) {
            "protection violation"
        } else {
            "not present"
        };
        let access = if self.contains(Self::CAUSED_BY_WRITE) {
            "write"
        } else {
            "read"
        };
        let origin = if self.contains(Self::USER_MODE) {
            "user"
        } else {
            "kernel"
        };
        (presence, access, origin)
    }
}

/// Register state captured by the interrupt trampolines.
///
/// Layout contract:
/// - Built bottom-up by the stubs: CPU pushes EFLAGS/CS/EIP (plus ESP/SS on
///   a ring crossing and an error code for some exceptions), the stub pushes
///   a zero error code where the CPU does not, then the vector number, then
///   the general-purpose registers in `pusha` order, then DS.
/// - Any change requires synchronized updates in the assembly stubs and the
///   compile-time size assertion below.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct InterruptFrame {
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

/// 8-byte protected-mode interrupt gate descriptor.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    /// Returns a non-present gate (the default state of all 256 entries).
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    pub fn set_handler(&mut self, handler: usize) {
        self.set_handler_with_dpl(handler, 0);
    }

    pub fn set_handler_with_dpl(&mut self, handler: usize, dpl: u8) {
        self.offset_low = handler as u16;
        self.selector = crate::arch::KERNEL_CODE_SELECTOR;
        self.zero = 0;
        self.type_attr = IDT_GATE_FLAGS | ((dpl & 0x03) << 5);
        self.offset_high = (handler >> 16) as u16;
    }

    pub fn is_present(&self) -> bool {
        self.type_attr & 0x80 != 0
    }

    /// Reassembles the 32-bit handler offset from the split fields.
    pub fn handler_offset(&self) -> u32 {
        (self.offset_low as u32) | ((self.offset_high as u32) << 16)
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }

    pub fn type_attr(&self) -> u8 {
        self.type_attr
    }
}

#[cfg(target_arch = "x86")]
#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

/// Holds the IDT behind `UnsafeCell` to avoid `static mut` (which permits
/// aliased `&mut` references and is unsound).
#[cfg(target_arch = "x86")]
struct InterruptState {
    idt: UnsafeCell<[IdtEntry; IDT_ENTRIES]>,
}

#[cfg(target_arch = "x86")]
impl InterruptState {
    const fn new() -> Self {
        Self {
            idt: UnsafeCell::new([IdtEntry::missing(); IDT_ENTRIES]),
        }
    }
}

// SAFETY:
// - The kernel is single-threaded (no SMP). The IDT is written only during
//   init() before interrupts are enabled, and only read by the CPU after.
#[cfg(target_arch = "x86")]
unsafe impl Sync for InterruptState {}

#[cfg(target_arch = "x86")]
static STATE: InterruptState = InterruptState::new();

#[cfg(target_arch = "x86")]
extern "C" {
    fn isr0_divide_error_stub();
    fn isr1_debug_stub();
    fn isr13_general_protection_stub();
    fn isr14_page_fault_stub();
    fn irq0_pit_timer_stub();
    fn irq1_keyboard_stub();
    fn irq8_cmos_rtc_stub();
    fn irq14_primary_ata_stub();
    fn int80_syscall_stub();
}

/// Initialize IDT and PIC for IRQ handling.
///
/// Must run with interrupts disabled, before the scheduler starts.
pub fn init() {
    disable();
    init_idt();
    remap_pic(IRQ_BASE, IRQ_BASE + 8);
    mask_pic();
}

/// Enable interrupts globally.
#[cfg(target_arch = "x86")]
pub fn enable() {
    // SAFETY:
    // - `sti` only sets the IF flag.
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
    }
}

/// Disable interrupts globally.
#[cfg(target_arch = "x86")]
pub fn disable() {
    // SAFETY:
    // - `cli` only clears the IF flag.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack, preserves_flags));
    }
}

/// Returns whether interrupts are currently enabled (IF flag set).
#[cfg(target_arch = "x86")]
#[inline]
pub fn are_enabled() -> bool {
    let eflags: u32;
    // SAFETY:
    // - Reading EFLAGS via pushfd/pop does not modify machine state.
    unsafe {
        core::arch::asm!(
            "pushfd",
            "pop {}",
            out(reg) eflags,
            options(nomem, preserves_flags)
        );
    }
    (eflags & (1 << 9)) != 0
}

#[cfg(not(target_arch = "x86"))]
pub fn enable() {}

#[cfg(not(target_arch = "x86"))]
pub fn disable() {}

#[cfg(not(target_arch = "x86"))]
#[inline]
pub fn are_enabled() -> bool {
    false
}

#[cfg(target_arch = "x86")]
fn init_idt() {
    // SAFETY:
    // - Runs once during init with interrupts disabled; no concurrent IDT
    //   access is possible.
    unsafe {
        let idt = &mut *STATE.idt.get();

        idt[EXCEPTION_DIVIDE_ERROR as usize].set_handler(isr0_divide_error_stub as *const () as usize);
        idt[EXCEPTION_DEBUG as usize].set_handler(isr1_debug_stub as *const () as usize);
        idt[EXCEPTION_GENERAL_PROTECTION as usize]
            .set_handler(isr13_general_protection_stub as *const () as usize);
        idt[EXCEPTION_PAGE_FAULT as usize].set_handler(isr14_page_fault_stub as *const () as usize);

        idt[IRQ0_PIT_TIMER_VECTOR as usize].set_handler(irq0_pit_timer_stub as *const () as usize);
        idt[IRQ1_KEYBOARD_VECTOR as usize].set_handler(irq1_keyboard_stub as *const () as usize);
        idt[IRQ8_CMOS_RTC_VECTOR as usize].set_handler(irq8_cmos_rtc_stub as *const () as usize);
        idt[IRQ14_PRIMARY_ATA_VECTOR as usize]
            .set_handler(irq14_primary_ata_stub as *const () as usize);

        idt[SYSCALL_INT80_VECTOR as usize]
            .set_handler_with_dpl(int80_syscall_stub as *const () as usize, 3);

        let idt_ptr = IdtPointer {
            limit: (size_of::<IdtEntry>() * IDT_ENTRIES - 1) as u16,
            base: STATE.idt.get() as u32,
        };

        core::arch::asm!(
            "lidt [{}]",
            in(reg) &idt_ptr,
            options(readonly, nostack, preserves_flags)
        );
    }
}

#[cfg(not(target_arch = "x86"))]
fn init_idt() {}

/// Returns whether a CPU exception vector pushes an error code on entry.
pub const fn exception_has_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10 | 11 | 12 | 13 | 14 | 17)
}

fn remap_pic(offset1: u8, offset2: u8) {
    // SAFETY:
    // - The ICW1..ICW4 sequence below is the documented 8259 initialization
    //   protocol; `io_wait` gives the controllers time to settle.
    unsafe {
        let cmd1 = PortByte::new(PIC1_COMMAND);
        let cmd2 = PortByte::new(PIC2_COMMAND);
        let data1 = PortByte::new(PIC1_DATA);
        let data2 = PortByte::new(PIC2_DATA);

        // ICW1: begin initialization, ICW4 follows.
        let icw1 = PIC_ICW1_INIT | PIC_ICW1_ICW4;
        cmd1.write(icw1);
        io_wait();
        cmd2.write(icw1);
        io_wait();

        // ICW2: vector offsets.
        data1.write(offset1);
        io_wait();
        data2.write(offset2);
        io_wait();

        // ICW3: cascade topology (slave on master IRQ2).
        data1.write(0x04);
        io_wait();
        data2.write(0x02);
        io_wait();

        // ICW4: 8086 mode.
        data1.write(PIC_ICW4_8086);
        io_wait();
        data2.write(PIC_ICW4_8086);
        io_wait();
    }
}

fn mask_pic() {
    // SAFETY:
    // - Writing the data ports after init sets the interrupt mask registers.
    unsafe {
        PortByte::new(PIC1_DATA).write(PIC1_INITIAL_MASK);
        PortByte::new(PIC2_DATA).write(PIC2_INITIAL_MASK);
    }
}

/// Opens one IRQ line. Slave lines also open the cascade (IRQ2).
pub fn unmask_irq(irq: u8) {
    // SAFETY:
    // - Read-modify-write of the PIC mask registers; serialized by being
    //   driven only from kernel context.
    unsafe {
        if irq < 8 {
            let data = PortByte::new(PIC1_DATA);
            let mask = data.read() & !(1 << irq);
            data.write(mask);
        } else {
            let data = PortByte::new(PIC2_DATA);
            let mask = data.read() & !(1 << (irq - 8));
            data.write(mask);

            let cascade = PortByte::new(PIC1_DATA);
            let mask = cascade.read() & !(1 << 2);
            cascade.write(mask);
        }
    }
}

/// Closes one IRQ line.
pub fn mask_irq(irq: u8) {
    // SAFETY:
    // - Read-modify-write of the PIC mask registers; serialized by being
    //   driven only from kernel context.
    unsafe {
        if irq < 8 {
            let data = PortByte::new(PIC1_DATA);
            let mask = data.read() | (1 << irq);
            data.write(mask);
        } else {
            let data = PortByte::new(PIC2_DATA);
            let mask = data.read() | (1 << (irq - 8));
            data.write(mask);
        }
    }
}

fn end_of_interrupt(vector: u8) {
    // SAFETY:
    // - Writing EOI to the command ports is the documented acknowledge path.
    unsafe {
        if vector >= IRQ_BASE + 8 {
            PortByte::new(PIC2_COMMAND).write(PIC_EOI);
        }
        PortByte::new(PIC1_COMMAND).write(PIC_EOI);
    }
}

/// Exception dispatch entry, called from the ISR assembly trampolines.
///
/// Every path here is terminal: the kernel treats all wired exceptions as
/// fatal and never returns to the faulting context.
///
/// # Safety
/// - `frame` must point to the register save area built by the ISR stub on
///   the active kernel stack.
/// - Must be entered with interrupts disabled.
#[no_mangle]
pub unsafe extern "C" fn isr_handler(frame: *mut InterruptFrame) -> ! {
    // SAFETY:
    // - The stub guarantees `frame` is valid until `iretd`, which this path
    //   never reaches.
    let frame = unsafe { &mut *frame };

    match frame.int_no as u8 {
        EXCEPTION_PAGE_FAULT => {
            let faulting_address = crate::arch::read_cr2();
            let code = PageFaultCode::from_bits_truncate(frame.err_code);
            let (presence, access, origin) = code.describe();
            log::error!(
                target: "interrupts",
                "page fault at {:#010x} ({}, {}, {})",
                faulting_address,
                presence,
                access,
                origin
            );
            panic::page_fault_panic(faulting_address, code, frame);
        }
        EXCEPTION_GENERAL_PROTECTION => {
            log::error!(
                target: "interrupts",
                "general protection fault at eip={:#010x} err={:#x}",
                frame.eip,
                frame.err_code
            );
            panic::exception_panic("GENERAL PROTECTION FAULT", frame);
        }
        _ => {
            log::error!(
                target: "interrupts",
                "unexpected exception vector {} at eip={:#010x}",
                frame.int_no,
                frame.eip
            );
            panic::exception_panic("UNEXPECTED EXCEPTION", frame);
        }
    }
}

/// IRQ dispatch entry, called from the IRQ assembly trampolines.
///
/// The timer and keyboard are handled on a fast path; every other vector is
/// routed to the driver registry by IRQ number. EOI is sent to the PIC(s)
/// before returning, after the handler ran.
///
/// # Safety
/// - `frame` must point to the register save area built by the IRQ stub on
///   the active kernel stack; it stays valid until the stub runs `iretd`.
/// - Must not be called reentrantly; the CPU keeps interrupts masked until
///   the stub returns.
#[no_mangle]
pub unsafe extern "C" fn irq_handler(frame: *mut InterruptFrame) {
    // SAFETY:
    // - See function contract; the stub owns the frame until `iretd`.
    let frame = unsafe { &mut *frame };
    let vector = frame.int_no as u8;

    match vector {
        IRQ0_PIT_TIMER_VECTOR => {
            scheduler::timer_tick(frame);
        }
        IRQ1_KEYBOARD_VECTOR => {
            // SAFETY:
            // - Reading the PS/2 data port consumes the pending scancode.
            let scancode = unsafe { PortByte::new(PS2_DATA_PORT).read() };
            drivers::keyboard::isr_enqueue_scancode(scancode);
        }
        _ => {
            if vector >= IRQ_BASE {
                drivers::dispatch_irq(vector - IRQ_BASE);
            }
        }
    }

    end_of_interrupt(vector);
}

/// Syscall trap entry for `int 0x80`.
///
/// ABI: number in EAX, arguments in EBX/ECX/EDX/ESI, result back in EAX.
///
/// # Safety
/// - `frame` must point to the register save area built by the syscall stub
///   on the active kernel stack.
#[no_mangle]
pub unsafe extern "C" fn syscall_handler(frame: *mut InterruptFrame) {
    // SAFETY:
    // - See function contract; the stub owns the frame until `iretd`.
    let frame = unsafe { &mut *frame };

    let result = syscall::dispatch(
        frame.eax,
        frame.ebx as usize,
        frame.ecx as usize,
        frame.edx as usize,
        frame.esi as usize,
    );
    frame.eax = result as u32;

    // Calls that gave up the CPU (exit, sleep, yield, wait) reschedule on
    // the way out, against the original trap frame. Raising the timer
    // vector from here instead would nest a second frame on this stack.
    if scheduler::take_resched_request() {
        scheduler::reschedule(frame);
    }
}

const _: () = {
    assert!(size_of::<InterruptFrame>() == 16 * 4);
};

const _: () = {
    assert!(size_of::<IdtEntry>() == 8);
};
