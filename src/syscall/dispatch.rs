//! Kernel-side syscall dispatcher (`int 0x80` path).
//!
//! Responsibilities of this module:
//! - decode the syscall number and ABI arguments,
//! - route to the corresponding kernel implementation,
//! - enforce minimal argument validation at the syscall boundary,
//! - return stable numeric result/error codes to the caller context.
//!
//! Calls that give up the CPU (exit, sleep, yield, wait) do not switch
//! inside their implementation: they flag a reschedule request, and the
//! trap glue feeds the original `int 0x80` frame into the scheduler after
//! `dispatch` returns. Raising the timer vector from here would nest a
//! second frame on the same kernel stack.

use core::slice;

use crate::drivers::screen::with_screen;
use crate::process::SIGNAL_COUNT;
use crate::scheduler::{self, WaitResult};

use super::{count_call, SyscallId, SYSCALL_ERROR, SYSCALL_OK};

/// File descriptor of the text console.
const STDOUT_FD: usize = 1;

/// Upper bound for one console write. A single syscall must not monopolize
/// the CPU; user code chunks larger buffers.
const MAX_CONSOLE_WRITE_LEN: usize = 4096;

/// Ticks per second at the 100 Hz PIT programming.
const TICKS_PER_SECOND: u64 = 100;

/// Resolves a syscall number and dispatches to the kernel implementation.
///
/// Arguments arrive as machine words; on the target they are the 32-bit
/// registers of the `int 0x80` frame.
///
/// Return contract:
/// - successful calls return call-specific values (`SYSCALL_OK`, a PID, a
///   byte count),
/// - unknown numbers and reserved operations return `SYSCALL_ERROR` (-1).
pub fn dispatch(number: u32, arg1: usize, arg2: usize, arg3: usize, arg4: usize) -> i32 {
    count_call();

    match number {
        n if n == SyscallId::Exit as u32 => sys_exit(arg1 as i32),
        n if n == SyscallId::Write as u32 => sys_write(arg1, arg2 as *const u8, arg3),
        n if n == SyscallId::Wait as u32 => sys_wait(),
        n if n == SyscallId::Getpid as u32 => sys_getpid(),
        n if n == SyscallId::Sleep as u32 => sys_sleep(arg1 as u32),
        n if n == SyscallId::Yield as u32 => sys_yield(),
        n if n == SyscallId::Kill as u32 => sys_kill(arg1, arg2 as u32),
        n if n == SyscallId::Signal as u32 => sys_signal(arg1 as u32, arg2 as u32),
        n if n == SyscallId::Brk as u32 => sys_brk(arg1),
        n if n == SyscallId::Fork as u32
            || n == SyscallId::Read as u32
            || n == SyscallId::Open as u32
            || n == SyscallId::Close as u32
            || n == SyscallId::Exec as u32
            || n == SyscallId::Mmap as u32
            || n == SyscallId::Munmap as u32 =>
        {
            // Reserved numbers: filesystem and image loading live in a
            // higher layer.
            let _ = (arg1, arg2, arg3, arg4);
            SYSCALL_ERROR
        }
        _ => SYSCALL_ERROR,
    }
}

/// `exit(code)`: leave a ZOMBIE for the parent to reap, wake the parent if
/// it already waits, then hand the CPU away.
fn sys_exit(code: i32) -> i32 {
    scheduler::with_scheduler(|sched| sched.exit_current(code));
    scheduler::request_resched();
    SYSCALL_OK
}

/// `write(fd, ptr, len)`: fd 1 writes to the text console.
///
/// Behavior:
/// - unknown fd returns `SYSCALL_ERROR`,
/// - `len == 0` is a successful no-op returning 0,
/// - a null pointer with non-zero `len` returns `SYSCALL_ERROR`,
/// - at most `MAX_CONSOLE_WRITE_LEN` bytes are written per call; the
///   number of bytes actually written is returned.
fn sys_write(fd: usize, ptr: *const u8, len: usize) -> i32 {
    if fd != STDOUT_FD {
        return SYSCALL_ERROR;
    }
    if len == 0 {
        return 0;
    }
    if ptr.is_null() {
        return SYSCALL_ERROR;
    }

    let actual_len = len.min(MAX_CONSOLE_WRITE_LEN);

    // SAFETY:
    // - This core runs kernel-mode processes in a flat address space; the
    //   caller owns `ptr..ptr + actual_len`.
    // - `actual_len` is bounded by `MAX_CONSOLE_WRITE_LEN`.
    let bytes = unsafe { slice::from_raw_parts(ptr, actual_len) };

    with_screen(|screen| {
        for byte in bytes {
            screen.print_char(*byte);
        }
    });

    actual_len as i32
}

/// `wait()`: reap a zombie child, or block in WAITING until one exits.
///
/// Returns the reaped child's PID, 0 after blocking (the caller retries
/// once it runs again), or `SYSCALL_ERROR` when there is nothing to wait
/// for.
fn sys_wait() -> i32 {
    match scheduler::with_scheduler(|sched| sched.wait_current()) {
        WaitResult::Reaped(pid) => pid as i32,
        WaitResult::Blocked => {
            scheduler::request_resched();
            0
        }
        WaitResult::NoChildren => SYSCALL_ERROR,
    }
}

/// `getpid()`: PID of the calling process, 0 when no process is current.
fn sys_getpid() -> i32 {
    scheduler::current_pid().unwrap_or(0) as i32
}

/// `sleep(seconds)`: block until `ticks + seconds * 100`, then reschedule.
fn sys_sleep(seconds: u32) -> i32 {
    scheduler::with_scheduler(|sched| {
        let until = sched.ticks() + seconds as u64 * TICKS_PER_SECOND;
        sched.sleep_current(until);
    });
    scheduler::request_resched();
    SYSCALL_OK
}

/// `yield()`: voluntary reschedule.
fn sys_yield() -> i32 {
    scheduler::request_resched();
    SYSCALL_OK
}

/// `kill(pid, signal)`: set the signal bit in the target's pending mask.
fn sys_kill(pid: usize, signal: u32) -> i32 {
    let delivered = scheduler::with_scheduler(|sched| sched.deliver_signal(pid, signal));
    if delivered {
        SYSCALL_OK
    } else {
        SYSCALL_ERROR
    }
}

/// `signal(signal, handler)`: install a handler address for the calling
/// process. Delivery is out of scope for this core.
fn sys_signal(signal: u32, handler: u32) -> i32 {
    if signal as usize >= SIGNAL_COUNT {
        return SYSCALL_ERROR;
    }

    scheduler::with_scheduler(|sched| {
        let Some(pid) = sched.current() else {
            return SYSCALL_ERROR;
        };
        match sched.process_mut(pid) {
            Some(pcb) => {
                pcb.signal_handlers[signal as usize] = handler;
                SYSCALL_OK
            }
            None => SYSCALL_ERROR,
        }
    })
}

/// `brk(new_end)`: adjust the current process heap end inside its window.
///
/// `brk(0)` queries the current heap end.
fn sys_brk(new_end: usize) -> i32 {
    scheduler::with_scheduler(|sched| {
        let Some(pid) = sched.current() else {
            return SYSCALL_ERROR;
        };
        let Some(pcb) = sched.process_mut(pid) else {
            return SYSCALL_ERROR;
        };

        if new_end == 0 {
            return pcb.heap_end as i32;
        }
        if new_end < pcb.heap_start || new_end > pcb.heap_limit {
            return SYSCALL_ERROR;
        }
        pcb.heap_end = new_end;
        new_end as i32
    })
}
