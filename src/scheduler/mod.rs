//! Quantum-driven round-robin scheduler.
//!
//! A fixed-capacity process table indexed by PID, a ready chain threaded by
//! PID links, and a timer-tick entry point that bills the running process
//! and preempts it when its quantum runs out. The register-bank swap itself
//! is the job of the interrupt trampoline; this module only rewrites the
//! live trap frame and the PCB copies.
//!
//! All state lives behind an interrupt-masking lock; the timer IRQ and the
//! syscall layer are the only writers.

use core::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;

use crate::arch;
use crate::arch::interrupts::InterruptFrame;
use crate::drivers::timer;
use crate::memory::heap;
use crate::process::{
    Pid, Process, ProcessState, SpawnError, KERNEL_STACK_SIZE, QUANTUM_TICKS, SIGNAL_COUNT,
};
use crate::sync::irqlock::IrqLock;

/// Capacity of the process table; PIDs are slot indices.
pub const MAX_PROCESSES: usize = 32;

/// Milliseconds that pass per timer tick (PIT programmed at 100 Hz).
pub const MS_PER_TICK: u64 = 10;

/// Entry point type for kernel tasks.
pub type TaskEntry = extern "C" fn() -> !;

/// Outcome of a `wait` attempt by the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// A zombie child was reaped.
    Reaped(Pid),
    /// Children exist but none has exited; the caller is now WAITING.
    Blocked,
    /// The caller has no children.
    NoChildren,
}

/// Counters snapshot for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub time_ms: u64,
    pub context_switches: u64,
    pub process_count: usize,
}

/// The whole scheduler state: process table plus clock and counters.
pub struct SchedulerState {
    table: [Option<Process>; MAX_PROCESSES],
    current: Option<Pid>,
    /// Tail of the ready chain, where new processes are linked.
    chain_tail: Option<Pid>,
    initialized: bool,
    ticks: u64,
    time_ms: u64,
    context_switches: u64,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self {
            table: core::array::from_fn(|_| None),
            current: None,
            chain_tail: None,
            initialized: false,
            ticks: 0,
            time_ms: 0,
            context_switches: 0,
        }
    }

    /// Resets the table and creates PID 0, the idle task, as the running
    /// process.
    pub fn init(&mut self) {
        self.table = core::array::from_fn(|_| None);
        self.current = None;
        self.chain_tail = None;
        self.ticks = 0;
        self.time_ms = 0;
        self.context_switches = 0;

        let mut idle = Process::new(0, None, "idle", 0);
        idle.state = ProcessState::Running;
        self.table[0] = Some(idle);
        self.current = Some(0);
        self.chain_tail = Some(0);
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Admits a new kernel task over a caller-provided stack and links it
    /// into the ready chain (NEW -> READY).
    ///
    /// A non-zero `stack_base` must come from the kernel heap; it is given
    /// back on reap. A zero base leaves stack ownership with the caller.
    pub fn admit(
        &mut self,
        name: &str,
        entry: usize,
        stack_base: usize,
        stack_size: usize,
    ) -> Result<Pid, SpawnError> {
        if !self.initialized {
            return Err(SpawnError::NotInitialized);
        }

        let pid = self
            .free_slot()
            .ok_or(SpawnError::TableFull)?;

        let parent = self.current;
        let mut process = Process::new(pid, parent, name, self.time_ms);
        process.kernel_stack = stack_base;
        process.kernel_stack_size = stack_size;
        process.saved_frame = initial_task_frame(entry, stack_base, stack_size);
        process.state = ProcessState::Ready;

        // Family links: front of the parent's child chain.
        if let Some(parent_pid) = parent {
            if let Some(parent_pcb) = self.table[parent_pid].as_mut() {
                process.next_sibling = parent_pcb.first_child;
                parent_pcb.first_child = Some(pid);
            }
        }

        self.table[pid] = Some(process);
        self.link_into_chain(pid);
        Ok(pid)
    }

    fn free_slot(&self) -> Option<Pid> {
        self.table.iter().position(|slot| match slot {
            None => true,
            Some(p) => p.state == ProcessState::Terminated,
        })
    }

    /// Appends `pid` to the ready chain unless its slot is being reused and
    /// already sits in the chain.
    fn link_into_chain(&mut self, pid: Pid) {
        let mut walker = Some(0);
        while let Some(p) = walker {
            if p == pid {
                return;
            }
            walker = self.table[p].as_ref().and_then(|pcb| pcb.next);
        }

        if let Some(tail) = self.chain_tail {
            if let Some(tail_pcb) = self.table[tail].as_mut() {
                tail_pcb.next = Some(pid);
            }
        }
        self.chain_tail = Some(pid);
    }

    /// Timer-tick entry: advance the clock, bill the running process, and
    /// reschedule when its quantum is exhausted.
    pub fn timer_tick(&mut self, frame: &mut InterruptFrame) {
        self.ticks += 1;
        self.time_ms = self.ticks * MS_PER_TICK;
        timer::record_tick();

        let quantum_exhausted = match self.current.and_then(|pid| self.table[pid].as_mut()) {
            Some(current) => {
                current.cpu_ticks += 1;
                current.quantum = current.quantum.saturating_sub(1);
                current.quantum == 0
            }
            None => true,
        };

        if quantum_exhausted {
            self.schedule(frame);
        }
    }

    /// Selects the next runnable process round-robin and switches to it.
    ///
    /// Walks the PID chain from the current process, skipping anything not
    /// in {READY, RUNNING}, wrapping to slot 0 on a null link and giving up
    /// once the walk returns to the current process. Staying put is a
    /// no-op (the quantum is still refreshed).
    pub fn schedule(&mut self, frame: &mut InterruptFrame) {
        if !self.initialized {
            return;
        }

        self.wake_sleepers();

        let current = self.current.unwrap_or(0);
        let Some(next) = self.select_next(current) else {
            // Nothing else is runnable; give the current process (or idle)
            // a fresh quantum and keep going.
            if let Some(pcb) = self.table[current].as_mut() {
                pcb.quantum = QUANTUM_TICKS;
            }
            return;
        };

        if next == current {
            if let Some(pcb) = self.table[current].as_mut() {
                pcb.quantum = QUANTUM_TICKS;
            }
            return;
        }

        // Outgoing: save the live register bank, drop RUNNING to READY.
        if let Some(outgoing) = self.table[current].as_mut() {
            outgoing.saved_frame = *frame;
            if outgoing.state == ProcessState::Running {
                outgoing.state = ProcessState::Ready;
            }
        }

        // Incoming: load registers, refresh the quantum, switch the address
        // space.
        let directory = {
            let incoming = self.table[next].as_mut().expect("selected pid is live");
            incoming.state = ProcessState::Running;
            incoming.quantum = QUANTUM_TICKS;
            *frame = incoming.saved_frame;
            incoming.page_directory
        };

        if directory != 0 {
            // SAFETY:
            // - `directory` was installed by process creation and points at
            //   a valid page directory.
            unsafe {
                arch::load_page_directory(directory as u32);
            }
        }

        self.current = Some(next);
        self.context_switches += 1;
    }

    /// Promotes BLOCKED sleepers whose wake-up tick has passed.
    fn wake_sleepers(&mut self) {
        let now = self.ticks;
        for slot in self.table.iter_mut() {
            if let Some(pcb) = slot {
                if pcb.state == ProcessState::Blocked && pcb.sleep_until != 0 && now >= pcb.sleep_until
                {
                    pcb.sleep_until = 0;
                    pcb.state = ProcessState::Ready;
                }
            }
        }
    }

    /// Round-robin successor search. Returns `None` when no other process
    /// is runnable.
    fn select_next(&self, current: Pid) -> Option<Pid> {
        let mut pid = self.successor(current);
        // The walk visits every chain node at most once; the bound guards
        // against a corrupted chain that never returns to `current`.
        for _ in 0..=MAX_PROCESSES {
            if pid == current {
                return None;
            }
            if let Some(pcb) = self.table[pid].as_ref() {
                if pcb.state.is_runnable() {
                    return Some(pid);
                }
            }
            pid = self.successor(pid);
        }
        None
    }

    /// Next PID in the chain; a null link wraps to slot 0.
    fn successor(&self, pid: Pid) -> Pid {
        self.table[pid].as_ref().and_then(|pcb| pcb.next).unwrap_or(0)
    }

    /// Blocks the current process until `sleep_until` (in ticks).
    pub fn sleep_current(&mut self, until_tick: u64) {
        if let Some(pcb) = self.current.and_then(|pid| self.table[pid].as_mut()) {
            pcb.sleep_until = until_tick;
            pcb.state = ProcessState::Blocked;
        }
    }

    /// Terminates the current process with `code`.
    ///
    /// The process stays a ZOMBIE until the parent reaps it through `wait`;
    /// a parent already in WAITING is woken (WAITING -> READY) and reaps on
    /// its next `wait` attempt.
    pub fn exit_current(&mut self, code: i32) {
        let Some(pid) = self.current else {
            return;
        };

        let parent = {
            let Some(pcb) = self.table[pid].as_mut() else {
                return;
            };
            pcb.exit_code = code;
            pcb.state = ProcessState::Zombie;
            pcb.parent
        };

        if let Some(parent_pcb) = parent.and_then(|p| self.table[p].as_mut()) {
            if parent_pcb.state == ProcessState::Waiting {
                parent_pcb.state = ProcessState::Ready;
            }
        }
    }

    /// Reaps one ZOMBIE child of the current process.
    ///
    /// Children exist but none has exited: the caller transitions to
    /// WAITING (RUNNING -> WAITING) and is woken by the child's exit.
    pub fn wait_current(&mut self) -> WaitResult {
        let Some(pid) = self.current else {
            return WaitResult::NoChildren;
        };
        let Some(pcb) = self.table[pid].as_ref() else {
            return WaitResult::NoChildren;
        };

        let mut child = pcb.first_child;
        let mut has_children = false;
        while let Some(c) = child {
            let (state, sibling) = match self.table[c].as_ref() {
                Some(pcb) => (pcb.state, pcb.next_sibling),
                None => break,
            };
            // Reaped tombstones no longer count as children.
            if state != ProcessState::Terminated {
                has_children = true;
                if state == ProcessState::Zombie {
                    self.reap(c);
                    return WaitResult::Reaped(c);
                }
            }
            child = sibling;
        }

        if has_children {
            if let Some(pcb) = self.table[pid].as_mut() {
                pcb.state = ProcessState::Waiting;
            }
            WaitResult::Blocked
        } else {
            WaitResult::NoChildren
        }
    }

    /// ZOMBIE -> TERMINATED: release the stack, keep the tombstone until
    /// the slot is reused.
    fn reap(&mut self, pid: Pid) {
        if let Some(pcb) = self.table[pid].as_mut() {
            pcb.state = ProcessState::Terminated;
            if pcb.kernel_stack != 0 {
                heap::free(pcb.kernel_stack as *mut u8);
                pcb.kernel_stack = 0;
                pcb.kernel_stack_size = 0;
            }
        }
    }

    /// Sets a pending-signal bit; a BLOCKED target becomes READY.
    ///
    /// Returns false for a dead or out-of-range target.
    pub fn deliver_signal(&mut self, pid: Pid, signal: u32) -> bool {
        if pid >= MAX_PROCESSES || signal >= SIGNAL_COUNT as u32 {
            return false;
        }

        match self.table[pid].as_mut() {
            Some(pcb)
                if pcb.state != ProcessState::Terminated && pcb.state != ProcessState::Zombie =>
            {
                pcb.signals_pending |= 1 << signal;
                if pcb.state == ProcessState::Blocked {
                    pcb.sleep_until = 0;
                    pcb.state = ProcessState::Ready;
                }
                true
            }
            _ => false,
        }
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn time_ms(&self) -> u64 {
        self.time_ms
    }

    pub fn state_of(&self, pid: Pid) -> Option<ProcessState> {
        self.table.get(pid)?.as_ref().map(|pcb| pcb.state)
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.table.get(pid)?.as_ref()
    }

    pub fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.table.get_mut(pid)?.as_mut()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.ticks,
            time_ms: self.time_ms,
            context_switches: self.context_switches,
            process_count: self
                .table
                .iter()
                .filter(|slot| slot.is_some())
                .count(),
        }
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the trap frame a fresh kernel task starts from.
fn initial_task_frame(entry: usize, stack_base: usize, stack_size: usize) -> InterruptFrame {
    let stack_top = (stack_base + stack_size) & !0xF;

    InterruptFrame {
        ds: arch::KERNEL_DATA_SELECTOR as u32,
        esp: stack_top as u32,
        eip: entry as u32,
        cs: arch::KERNEL_CODE_SELECTOR as u32,
        eflags: arch::DEFAULT_EFLAGS,
        useresp: stack_top as u32,
        ss: arch::KERNEL_DATA_SELECTOR as u32,
        ..InterruptFrame::default()
    }
}

lazy_static! {
    /// Process-wide scheduler instance.
    static ref SCHED: IrqLock<SchedulerState> = IrqLock::new(SchedulerState::new());
}

/// Set by syscalls that gave up the CPU; consumed by the trap return path.
static RESCHED_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Initializes the scheduler: PID 0 (idle) becomes the current process.
pub fn init() {
    let mut sched = SCHED.lock();
    sched.init();
    log::info!(target: "scheduler", "idle task installed, quantum {} ticks", QUANTUM_TICKS);
}

/// Executes a closure with exclusive access to the scheduler state.
pub fn with_scheduler<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> R {
    let mut sched = SCHED.lock();
    f(&mut sched)
}

/// Creates a kernel task with a heap-backed stack and admits it.
pub fn spawn(name: &str, entry: TaskEntry) -> Result<Pid, SpawnError> {
    let stack = heap::malloc(KERNEL_STACK_SIZE);
    if stack.is_null() {
        return Err(SpawnError::OutOfMemory);
    }

    let result = with_scheduler(|sched| {
        sched.admit(name, entry as usize, stack as usize, KERNEL_STACK_SIZE)
    });

    match result {
        Ok(pid) => {
            log::info!(target: "scheduler", "spawned '{}' as pid {}", name, pid);
            Ok(pid)
        }
        Err(err) => {
            heap::free(stack);
            Err(err)
        }
    }
}

/// Timer IRQ entry (vector 32): called by the interrupt dispatcher.
pub fn timer_tick(frame: &mut InterruptFrame) {
    with_scheduler(|sched| sched.timer_tick(frame));
}

/// Immediately reselects a process, preempting the current one.
pub fn reschedule(frame: &mut InterruptFrame) {
    with_scheduler(|sched| sched.schedule(frame));
}

/// Asks the trap return path to reschedule before returning to the
/// interrupted context.
pub fn request_resched() {
    RESCHED_REQUESTED.store(true, Ordering::Release);
}

/// Consumes a pending reschedule request.
pub fn take_resched_request() -> bool {
    RESCHED_REQUESTED.swap(false, Ordering::AcqRel)
}

/// PID of the running process, if the scheduler is up.
pub fn current_pid() -> Option<Pid> {
    with_scheduler(|sched| sched.current())
}

/// Monotonic timer ticks since boot.
pub fn ticks() -> u64 {
    with_scheduler(|sched| sched.ticks())
}

/// Milliseconds since boot, derived from the tick count.
pub fn time_ms() -> u64 {
    with_scheduler(|sched| sched.time_ms())
}

/// Counters snapshot.
pub fn stats() -> SchedulerStats {
    with_scheduler(|sched| sched.stats())
}
