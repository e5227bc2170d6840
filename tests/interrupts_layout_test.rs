//! Layout and decoding tests for the interrupt plumbing: gate packing,
//! frame geometry, error-code classification.

use core::mem::size_of;

use ferrite_kernel::arch::interrupts::{
    exception_has_error_code, IdtEntry, InterruptFrame, PageFaultCode, EXCEPTION_DEBUG,
    EXCEPTION_DIVIDE_ERROR, EXCEPTION_GENERAL_PROTECTION, EXCEPTION_PAGE_FAULT, IDT_GATE_FLAGS,
    IRQ0_PIT_TIMER_VECTOR, IRQ1_KEYBOARD_VECTOR, IRQ8_CMOS_RTC_VECTOR, IRQ14_PRIMARY_ATA_VECTOR,
    SYSCALL_INT80_VECTOR,
};
use ferrite_kernel::arch::KERNEL_CODE_SELECTOR;

#[test]
fn test_gate_descriptor_is_eight_bytes() {
    assert_eq!(size_of::<IdtEntry>(), 8);
}

#[test]
fn test_interrupt_frame_layout() {
    // ds + 8 pusha registers + vector + error code + 5 CPU-pushed dwords.
    assert_eq!(size_of::<InterruptFrame>(), 16 * 4);
}

#[test]
fn test_missing_gate_is_not_present() {
    let gate = IdtEntry::missing();
    assert!(!gate.is_present());
    assert_eq!(gate.handler_offset(), 0);
}

#[test]
fn test_gate_packs_offset_and_selector() {
    let mut gate = IdtEntry::missing();
    gate.set_handler(0xDEAD_BEEF);

    assert!(gate.is_present());
    assert_eq!(gate.handler_offset(), 0xDEAD_BEEF);
    assert_eq!(gate.selector(), KERNEL_CODE_SELECTOR);
    assert_eq!(gate.type_attr(), IDT_GATE_FLAGS);
}

#[test]
fn test_syscall_gate_carries_dpl3() {
    let mut gate = IdtEntry::missing();
    gate.set_handler_with_dpl(0x10_0000, 3);

    // Present | DPL 3 | 32-bit interrupt gate.
    assert_eq!(gate.type_attr(), 0xEE);
    assert_eq!(gate.handler_offset(), 0x10_0000);
}

#[test]
fn test_vector_assignments() {
    assert_eq!(EXCEPTION_DIVIDE_ERROR, 0);
    assert_eq!(EXCEPTION_DEBUG, 1);
    assert_eq!(EXCEPTION_GENERAL_PROTECTION, 13);
    assert_eq!(EXCEPTION_PAGE_FAULT, 14);
    assert_eq!(IRQ0_PIT_TIMER_VECTOR, 32);
    assert_eq!(IRQ1_KEYBOARD_VECTOR, 33);
    assert_eq!(IRQ8_CMOS_RTC_VECTOR, 40);
    assert_eq!(IRQ14_PRIMARY_ATA_VECTOR, 46);
    assert_eq!(SYSCALL_INT80_VECTOR, 0x80);
}

#[test]
fn test_error_code_exceptions() {
    // Faults that push an error code on entry.
    for vector in [8, 10, 11, 12, 13, 14, 17] {
        assert!(exception_has_error_code(vector), "vector {}", vector);
    }
    // Divide error, debug, breakpoint, and the IRQ range do not.
    for vector in [0, 1, 3, 32, 33, 46] {
        assert!(!exception_has_error_code(vector), "vector {}", vector);
    }
}

#[test]
fn test_page_fault_code_decode() {
    // err=0x6: write to a non-present page from user mode.
    let code = PageFaultCode::from_bits_truncate(0x6);
    assert!(code.contains(PageFaultCode::CAUSED_BY_WRITE));
    assert!(code.contains(PageFaultCode::USER_MODE));
    assert!(!code.contains(PageFaultCode::PROTECTION_VIOLATION));
    assert_eq!(code.describe(), ("not present", "write", "user"));

    // err=0x3: write protection violation in kernel mode.
    let code = PageFaultCode::from_bits_truncate(0x3);
    assert_eq!(code.describe(), ("protection violation", "write", "kernel"));

    // err=0x0: kernel read of a non-present page.
    let code = PageFaultCode::from_bits_truncate(0x0);
    assert_eq!(code.describe(), ("not present", "read", "kernel"));
}

#[test]
fn test_page_fault_report_names_address_and_cause() {
    // The panic banner is rendered from these pieces; the fault report for
    // CR2=0xCAFEBABE err=0x6 must name the address, the write, the user
    // origin, and the missing page.
    let faulting_address = 0xCAFE_BABEu32;
    let code = PageFaultCode::from_bits_truncate(0x6);
    let (presence, access, origin) = code.describe();

    let report = format!(
        "address={:#010x} ({}, {}, {})",
        faulting_address, presence, access, origin
    );
    assert!(report.contains("0xcafebabe"));
    assert!(report.contains("write"));
    assert!(report.contains("user"));
    assert!(report.contains("not present"));
}
