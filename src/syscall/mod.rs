//! Syscall table and dispatcher entry point.
//!
//! The `int 0x80` glue passes `(number, arg1..arg4)` into [`dispatch`].
//! Numbers, result codes, and the global call counter live here; the kernel
//! dispatch logic lives in `dispatch`; raw user-side wrappers in `abi`.

mod dispatch;

pub mod abi;

use core::sync::atomic::{AtomicU64, Ordering};

pub use dispatch::dispatch;

/// Stable syscall numbers.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallId {
    /// Terminate the current process with an exit code.
    Exit = 1,
    /// Duplicate the current process (reserved).
    Fork = 2,
    /// Read from a file descriptor (reserved, filesystem-dependent).
    Read = 3,
    /// Write bytes to a file descriptor; fd 1 is the text console.
    Write = 4,
    /// Open a path (reserved, filesystem-dependent).
    Open = 5,
    /// Close a file descriptor (reserved, filesystem-dependent).
    Close = 6,
    /// Block until a child process exits.
    Wait = 7,
    /// Replace the process image (reserved, loader-dependent).
    Exec = 8,
    /// PID of the calling process.
    Getpid = 9,
    /// Sleep a number of seconds.
    Sleep = 10,
    /// Give up the CPU voluntarily.
    Yield = 11,
    /// Raise a signal on a target process.
    Kill = 12,
    /// Install a signal handler (delivery is a higher layer's business).
    Signal = 13,
    /// Anonymous memory mapping (reserved).
    Mmap = 14,
    /// Release a mapping (reserved).
    Munmap = 15,
    /// Adjust the process heap end.
    Brk = 16,
}

/// Unknown syscall number, invalid argument, or reserved operation.
pub const SYSCALL_ERROR: i32 = -1;

/// Successful syscall return code for void-like operations.
pub const SYSCALL_OK: i32 = 0;

/// Total syscalls dispatched since boot.
static SYSCALL_COUNT: AtomicU64 = AtomicU64::new(0);

pub(crate) fn count_call() {
    SYSCALL_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Number of syscalls dispatched so far.
pub fn dispatch_count() -> u64 {
    SYSCALL_COUNT.load(Ordering::Relaxed)
}
