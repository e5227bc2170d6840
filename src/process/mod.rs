//! Process control blocks and the process state machine.
//!
//! The process table (in `scheduler`) is a fixed-capacity array indexed by
//! PID; all family and ready linkage is by PID, never by owning pointer, so
//! the parent/child/sibling cycles of a process tree cannot become
//! ownership cycles.

use core::fmt;

use crate::arch::interrupts::InterruptFrame;

/// Process identifier: the slot index in the process table.
pub type Pid = usize;

/// Capacity of the fixed process name buffer.
pub const PROCESS_NAME_LEN: usize = 16;

/// Capacity of the fixed working-directory buffer.
pub const PROCESS_CWD_LEN: usize = 32;

/// Slots in the per-process file-descriptor table.
pub const PROCESS_MAX_FDS: usize = 8;

/// Number of signals carried by the pending/blocked masks.
pub const SIGNAL_COUNT: usize = 32;

/// Scheduler quantum in timer ticks: 2 ticks at 100 Hz = 20 ms.
pub const QUANTUM_TICKS: u32 = 2;

/// Default size of a kernel task stack.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Life-cycle states of a process.
///
/// Valid transitions:
/// - NEW -> READY on admit
/// - READY <-> RUNNING via the scheduler
/// - RUNNING -> BLOCKED on resource wait, BLOCKED -> READY on wake
/// - RUNNING -> WAITING on child-wait, WAITING -> READY on child exit
/// - RUNNING -> ZOMBIE on exit while unreaped, ZOMBIE -> TERMINATED on reap
/// - TERMINATED is a tombstone until the slot is reused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    New,
    Ready,
    Running,
    Blocked,
    Waiting,
    Zombie,
    Terminated,
}

impl ProcessState {
    /// Whether the scheduler may hand the CPU to a process in this state.
    pub fn is_runnable(self) -> bool {
        matches!(self, ProcessState::Ready | ProcessState::Running)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::New => "NEW",
            ProcessState::Ready => "READY",
            ProcessState::Running => "RUNNING",
            ProcessState::Blocked => "BLOCKED",
            ProcessState::Waiting => "WAITING",
            ProcessState::Zombie => "ZOMBIE",
            ProcessState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Owner credentials of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub const fn root() -> Self {
        Self { uid: 0, gid: 0 }
    }
}

/// An open file-descriptor slot. With no filesystem in this kernel the only
/// backing objects are the console and the serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDescriptor {
    Console,
    Serial,
}

/// One process control block.
pub struct Process {
    pub pid: Pid,
    pub parent: Option<Pid>,
    name: [u8; PROCESS_NAME_LEN],
    name_len: usize,

    pub state: ProcessState,
    pub priority: u8,
    pub nice: i8,
    /// Remaining timer ticks before preemption.
    pub quantum: u32,
    /// Accumulated CPU time in timer ticks.
    pub cpu_ticks: u64,
    /// `system_time_ms` at creation.
    pub start_time_ms: u64,
    /// Tick at which a sleeping process becomes runnable again (0 = none).
    pub sleep_until: u64,

    /// Saved register bank, written on preemption and loaded on resume.
    pub saved_frame: InterruptFrame,
    /// Kernel stack owned by this process (base address, bytes).
    pub kernel_stack: usize,
    pub kernel_stack_size: usize,
    /// Physical address of the owning page directory (0 = kernel directory).
    pub page_directory: usize,

    /// First child, if any (PID link).
    pub first_child: Option<Pid>,
    /// Next sibling in the parent's child chain (PID link).
    pub next_sibling: Option<Pid>,
    /// Successor in the ready chain (PID link).
    pub next: Option<Pid>,

    pub exit_code: i32,

    /// Per-process heap window for the `brk` syscall.
    pub heap_start: usize,
    pub heap_end: usize,
    pub heap_limit: usize,

    pub credentials: Credentials,
    pub fds: [Option<FileDescriptor>; PROCESS_MAX_FDS],
    cwd: [u8; PROCESS_CWD_LEN],
    cwd_len: usize,

    /// Pending signal bits (set by `kill`).
    pub signals_pending: u32,
    /// Blocked signal bits.
    pub signals_blocked: u32,
    /// Installed handler addresses (`signal` syscall); 0 = default.
    pub signal_handlers: [u32; SIGNAL_COUNT],
}

impl Process {
    /// Creates a PCB in the NEW state with default attributes.
    pub fn new(pid: Pid, parent: Option<Pid>, name: &str, start_time_ms: u64) -> Self {
        let mut fds = [None; PROCESS_MAX_FDS];
        fds[0] = Some(FileDescriptor::Console);
        fds[1] = Some(FileDescriptor::Console);
        fds[2] = Some(FileDescriptor::Console);

        let mut process = Self {
            pid,
            parent,
            name: [0; PROCESS_NAME_LEN],
            name_len: 0,
            state: ProcessState::New,
            priority: 1,
            nice: 0,
            quantum: QUANTUM_TICKS,
            cpu_ticks: 0,
            start_time_ms,
            sleep_until: 0,
            saved_frame: InterruptFrame::default(),
            kernel_stack: 0,
            kernel_stack_size: 0,
            page_directory: 0,
            first_child: None,
            next_sibling: None,
            next: None,
            exit_code: 0,
            heap_start: 0,
            heap_end: 0,
            heap_limit: 0,
            credentials: Credentials::root(),
            fds,
            cwd: [0; PROCESS_CWD_LEN],
            cwd_len: 0,
            signals_pending: 0,
            signals_blocked: 0,
            signal_handlers: [0; SIGNAL_COUNT],
        };
        process.set_name(name);
        process.set_cwd("/");
        process
    }

    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(PROCESS_NAME_LEN);
        self.name[..len].copy_from_slice(&bytes[..len]);
        self.name_len = len;
    }

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len]).unwrap_or("?")
    }

    pub fn set_cwd(&mut self, cwd: &str) {
        let bytes = cwd.as_bytes();
        let len = bytes.len().min(PROCESS_CWD_LEN);
        self.cwd[..len].copy_from_slice(&bytes[..len]);
        self.cwd_len = len;
    }

    pub fn cwd(&self) -> &str {
        core::str::from_utf8(&self.cwd[..self.cwd_len]).unwrap_or("?")
    }
}

/// Error space for process creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Scheduler has not been initialized.
    NotInitialized,
    /// The fixed process table has no free slot.
    TableFull,
    /// The kernel heap could not back the task stack.
    OutOfMemory,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => f.write_str("scheduler not initialized"),
            Self::TableFull => f.write_str("process table full"),
            Self::OutOfMemory => f.write_str("out of memory for task stack"),
        }
    }
}
