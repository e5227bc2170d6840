//! Assembly trampolines between the IDT and the Rust dispatchers.
//!
//! Each stub normalizes the stack to the `InterruptFrame` layout: a zero
//! error code is pushed for vectors where the CPU does not push one, then
//! the vector number, the general-purpose registers (`pusha` order) and DS.
//! Kernel data segments are loaded before calling into Rust.

use core::arch::global_asm;

use super::interrupts::{
    EXCEPTION_DEBUG, EXCEPTION_DIVIDE_ERROR, EXCEPTION_GENERAL_PROTECTION, EXCEPTION_PAGE_FAULT,
    IRQ0_PIT_TIMER_VECTOR, IRQ14_PRIMARY_ATA_VECTOR, IRQ1_KEYBOARD_VECTOR, IRQ8_CMOS_RTC_VECTOR,
    SYSCALL_INT80_VECTOR,
};

macro_rules! isr_stub_without_error_code_asm {
    ($name:ident, $vector:expr) => {
        global_asm!(
            concat!(
                ".section .text\n",
                ".global ",
                stringify!($name),
                "\n",
                ".type ",
                stringify!($name),
                ", @function\n",
                stringify!($name),
                ":\n",
                "    push 0\n",
                "    push {vector}\n",
                "    jmp isr_common_stub\n",
            ),
            vector = const $vector,
        );
    };
}

macro_rules! isr_stub_with_error_code_asm {
    ($name:ident, $vector:expr) => {
        global_asm!(
            concat!(
                ".section .text\n",
                ".global ",
                stringify!($name),
                "\n",
                ".type ",
                stringify!($name),
                ", @function\n",
                stringify!($name),
                ":\n",
                "    push {vector}\n",
                "    jmp isr_common_stub\n",
            ),
            vector = const $vector,
        );
    };
}

macro_rules! irq_stub_asm {
    ($name:ident, $vector:expr) => {
        global_asm!(
            concat!(
                ".section .text\n",
                ".global ",
                stringify!($name),
                "\n",
                ".type ",
                stringify!($name),
                ", @function\n",
                stringify!($name),
                ":\n",
                "    push 0\n",
                "    push {vector}\n",
                "    jmp irq_common_stub\n",
            ),
            vector = const $vector,
        );
    };
}

// Shared tail for exceptions. `isr_handler` never returns; the halt loop
// below is a backstop in case it ever does.
global_asm!(
    r#"
    .section .text
    .global isr_common_stub
    .type isr_common_stub, @function
isr_common_stub:
    pusha
    xor eax, eax
    mov ax, ds
    push eax
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    push esp
    call isr_handler
1:
    cli
    hlt
    jmp 1b
"#,
);

// Shared tail for hardware IRQs: dispatch, then restore and resume.
global_asm!(
    r#"
    .section .text
    .global irq_common_stub
    .type irq_common_stub, @function
irq_common_stub:
    pusha
    xor eax, eax
    mov ax, ds
    push eax
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    push esp
    call irq_handler
    add esp, 4
    pop eax
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    popa
    add esp, 8
    iretd
"#,
);

global_asm!(
    concat!(
        ".section .text\n",
        ".global int80_syscall_stub\n",
        ".type int80_syscall_stub, @function\n",
        "int80_syscall_stub:\n",
        "    push 0\n",
        "    push {vector}\n",
        "    pusha\n",
        "    xor eax, eax\n",
        "    mov ax, ds\n",
        "    push eax\n",
        "    mov ax, 0x10\n",
        "    mov ds, ax\n",
        "    mov es, ax\n",
        "    mov fs, ax\n",
        "    mov gs, ax\n",
        "    push esp\n",
        "    call syscall_handler\n",
        "    add esp, 4\n",
        "    pop eax\n",
        "    mov ds, ax\n",
        "    mov es, ax\n",
        "    mov fs, ax\n",
        "    mov gs, ax\n",
        "    popa\n",
        "    add esp, 8\n",
        "    iretd\n",
    ),
    vector = const SYSCALL_INT80_VECTOR,
);

isr_stub_without_error_code_asm!(isr0_divide_error_stub, EXCEPTION_DIVIDE_ERROR);
isr_stub_without_error_code_asm!(isr1_debug_stub, EXCEPTION_DEBUG);
isr_stub_with_error_code_asm!(isr13_general_protection_stub, EXCEPTION_GENERAL_PROTECTION);
isr_stub_with_error_code_asm!(isr14_page_fault_stub, EXCEPTION_PAGE_FAULT);

irq_stub_asm!(irq0_pit_timer_stub, IRQ0_PIT_TIMER_VECTOR);
irq_stub_asm!(irq1_keyboard_stub, IRQ1_KEYBOARD_VECTOR);
irq_stub_asm!(irq8_cmos_rtc_stub, IRQ8_CMOS_RTC_VECTOR);
irq_stub_asm!(irq14_primary_ata_stub, IRQ14_PRIMARY_ATA_VECTOR);
