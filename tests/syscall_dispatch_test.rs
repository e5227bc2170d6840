//! Syscall dispatch integration tests.
//!
//! These tests go through the real dispatcher against the kernel-global
//! scheduler and console. The globals are shared across the test binary,
//! so every test serializes on one lock and re-initializes the scheduler.

use std::sync::Mutex;

use ferrite_kernel::drivers::screen::with_screen;
use ferrite_kernel::process::ProcessState;
use ferrite_kernel::scheduler;
use ferrite_kernel::syscall::{self, SyscallId, SYSCALL_ERROR, SYSCALL_OK};

static TEST_GUARD: Mutex<()> = Mutex::new(());

fn dispatch(id: SyscallId, arg1: usize, arg2: usize, arg3: usize) -> i32 {
    syscall::dispatch(id as u32, arg1, arg2, arg3, 0)
}

/// Locks the globals and resets scheduler plus reschedule flag.
fn setup() -> std::sync::MutexGuard<'static, ()> {
    let guard = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
    scheduler::init();
    let _ = scheduler::take_resched_request();
    guard
}

#[test]
fn test_unknown_syscall_returns_minus_one() {
    let _guard = setup();
    assert_eq!(syscall::dispatch(0, 0, 0, 0, 0), SYSCALL_ERROR);
    assert_eq!(syscall::dispatch(99, 0, 0, 0, 0), SYSCALL_ERROR);
    assert_eq!(syscall::dispatch(u32::MAX, 0, 0, 0, 0), SYSCALL_ERROR);
}

#[test]
fn test_reserved_syscalls_return_minus_one() {
    let _guard = setup();
    for id in [
        SyscallId::Fork,
        SyscallId::Read,
        SyscallId::Open,
        SyscallId::Close,
        SyscallId::Exec,
        SyscallId::Mmap,
        SyscallId::Munmap,
    ] {
        assert_eq!(dispatch(id, 1, 2, 3), SYSCALL_ERROR, "{:?}", id);
    }
}

#[test]
fn test_every_dispatch_is_counted() {
    let _guard = setup();
    let before = syscall::dispatch_count();

    dispatch(SyscallId::Getpid, 0, 0, 0);
    syscall::dispatch(99, 0, 0, 0, 0);
    dispatch(SyscallId::Yield, 0, 0, 0);

    assert_eq!(syscall::dispatch_count(), before + 3);
}

#[test]
fn test_getpid_returns_current() {
    let _guard = setup();
    // The idle task (PID 0) is current right after init.
    assert_eq!(dispatch(SyscallId::Getpid, 0, 0, 0), 0);
}

#[test]
fn test_write_to_console() {
    let _guard = setup();
    with_screen(|screen| screen.clear());
    let before = syscall::dispatch_count();

    let text = b"hi";
    let result = dispatch(SyscallId::Write, 1, text.as_ptr() as usize, text.len());

    assert_eq!(result, 2);
    assert_eq!(syscall::dispatch_count(), before + 1);
    with_screen(|screen| {
        assert_eq!(screen.char_at(0, 0).0, b'h');
        assert_eq!(screen.char_at(0, 1).0, b'i');
    });
}

#[test]
fn test_write_rejects_bad_arguments() {
    let _guard = setup();
    let text = b"x";

    // Only fd 1 is wired to the console.
    assert_eq!(
        dispatch(SyscallId::Write, 0, text.as_ptr() as usize, 1),
        SYSCALL_ERROR
    );
    assert_eq!(
        dispatch(SyscallId::Write, 7, text.as_ptr() as usize, 1),
        SYSCALL_ERROR
    );
    // Zero length is a successful no-op; a null pointer is not.
    assert_eq!(dispatch(SyscallId::Write, 1, text.as_ptr() as usize, 0), 0);
    assert_eq!(dispatch(SyscallId::Write, 1, 0, 1), SYSCALL_ERROR);
}

#[test]
fn test_yield_requests_reschedule() {
    let _guard = setup();

    assert_eq!(dispatch(SyscallId::Yield, 0, 0, 0), SYSCALL_OK);
    assert!(scheduler::take_resched_request());
    assert!(!scheduler::take_resched_request(), "flag must be consumed");
}

#[test]
fn test_sleep_blocks_current_for_seconds() {
    let _guard = setup();
    let ticks = scheduler::ticks();

    assert_eq!(dispatch(SyscallId::Sleep, 2, 0, 0), SYSCALL_OK);
    assert!(scheduler::take_resched_request());

    scheduler::with_scheduler(|sched| {
        let idle = sched.process(0).unwrap();
        assert_eq!(idle.state, ProcessState::Blocked);
        // Two seconds at 100 Hz.
        assert_eq!(idle.sleep_until, ticks + 200);
    });
}

#[test]
fn test_exit_leaves_a_zombie() {
    let _guard = setup();

    assert_eq!(dispatch(SyscallId::Exit, 42, 0, 0), SYSCALL_OK);
    assert!(scheduler::take_resched_request());

    scheduler::with_scheduler(|sched| {
        let idle = sched.process(0).unwrap();
        assert_eq!(idle.state, ProcessState::Zombie);
        assert_eq!(idle.exit_code, 42);
    });
}

#[test]
fn test_wait_without_children_fails() {
    let _guard = setup();
    assert_eq!(dispatch(SyscallId::Wait, 0, 0, 0), SYSCALL_ERROR);
}

#[test]
fn test_kill_sets_pending_signal() {
    let _guard = setup();

    assert_eq!(dispatch(SyscallId::Kill, 0, 3, 0), SYSCALL_OK);
    scheduler::with_scheduler(|sched| {
        assert_eq!(sched.process(0).unwrap().signals_pending, 1 << 3);
    });

    // Dead slot and out-of-range signal are rejected.
    assert_eq!(dispatch(SyscallId::Kill, 17, 1, 0), SYSCALL_ERROR);
    assert_eq!(dispatch(SyscallId::Kill, 0, 40, 0), SYSCALL_ERROR);
}

#[test]
fn test_signal_installs_handler() {
    let _guard = setup();

    assert_eq!(dispatch(SyscallId::Signal, 5, 0x0040_1000, 0), SYSCALL_OK);
    scheduler::with_scheduler(|sched| {
        assert_eq!(sched.process(0).unwrap().signal_handlers[5], 0x0040_1000);
    });

    assert_eq!(dispatch(SyscallId::Signal, 32, 0x1000, 0), SYSCALL_ERROR);
}

#[test]
fn test_brk_moves_heap_end_within_window() {
    let _guard = setup();

    scheduler::with_scheduler(|sched| {
        let idle = sched.process_mut(0).unwrap();
        idle.heap_start = 0x1000;
        idle.heap_end = 0x1000;
        idle.heap_limit = 0x9000;
    });

    // Query form.
    assert_eq!(dispatch(SyscallId::Brk, 0, 0, 0), 0x1000);
    // Grow inside the window.
    assert_eq!(dispatch(SyscallId::Brk, 0x2000, 0, 0), 0x2000);
    assert_eq!(dispatch(SyscallId::Brk, 0, 0, 0), 0x2000);
    // Outside the window in both directions.
    assert_eq!(dispatch(SyscallId::Brk, 0xA000, 0, 0), SYSCALL_ERROR);
    assert_eq!(dispatch(SyscallId::Brk, 0x500, 0, 0), SYSCALL_ERROR);
    assert_eq!(dispatch(SyscallId::Brk, 0, 0, 0), 0x2000);
}
