//! Round-robin scheduler integration tests.
//!
//! All tests drive a private `SchedulerState` with synthetic interrupt
//! frames, the same way the timer IRQ does. Task stacks are zero (caller
//! owned): nothing ever executes these tasks, only their PCB state moves.

use ferrite_kernel::arch::interrupts::InterruptFrame;
use ferrite_kernel::process::{ProcessState, QUANTUM_TICKS};
use ferrite_kernel::scheduler::{SchedulerState, WaitResult, MAX_PROCESSES};

const ENTRY_A: usize = 0x1000;
const ENTRY_B: usize = 0x2000;

fn fresh() -> (SchedulerState, InterruptFrame) {
    let mut sched = SchedulerState::new();
    sched.init();
    (sched, InterruptFrame::default())
}

/// Number of processes currently in the RUNNING state.
fn running_count(sched: &SchedulerState) -> usize {
    (0..MAX_PROCESSES)
        .filter(|&pid| sched.state_of(pid) == Some(ProcessState::Running))
        .count()
}

#[test]
fn test_init_installs_idle_as_current() {
    let (sched, _) = fresh();

    assert_eq!(sched.current(), Some(0));
    assert_eq!(sched.state_of(0), Some(ProcessState::Running));
    assert_eq!(sched.process(0).unwrap().name(), "idle");
    assert_eq!(sched.stats().process_count, 1);
}

#[test]
fn test_admit_enters_ready_state() {
    let (mut sched, _) = fresh();

    let pid = sched.admit("task-a", ENTRY_A, 0, 0).unwrap();
    assert_eq!(pid, 1);
    assert_eq!(sched.state_of(pid), Some(ProcessState::Ready));

    let pcb = sched.process(pid).unwrap();
    assert_eq!(pcb.parent, Some(0));
    assert_eq!(pcb.quantum, QUANTUM_TICKS);
    assert_eq!(pcb.saved_frame.eip as usize, ENTRY_A);

    // The child sits at the front of the parent's child chain.
    assert_eq!(sched.process(0).unwrap().first_child, Some(pid));
}

#[test]
fn test_schedule_is_noop_with_only_idle() {
    let (mut sched, mut frame) = fresh();

    for _ in 0..5 {
        sched.timer_tick(&mut frame);
    }

    assert_eq!(sched.current(), Some(0));
    assert_eq!(sched.state_of(0), Some(ProcessState::Running));
    assert_eq!(sched.stats().context_switches, 0);
}

#[test]
fn test_clock_is_monotonic_and_derives_time_ms() {
    let (mut sched, mut frame) = fresh();

    let mut last = 0;
    for _ in 0..25 {
        sched.timer_tick(&mut frame);
        let ticks = sched.ticks();
        assert!(ticks > last);
        assert_eq!(sched.time_ms(), ticks * 10);
        last = ticks;
    }
}

#[test]
fn test_quantum_exhaustion_preempts_round_robin() {
    let (mut sched, mut frame) = fresh();
    let a = sched.admit("task-a", ENTRY_A, 0, 0).unwrap();
    let b = sched.admit("task-b", ENTRY_B, 0, 0).unwrap();

    // Two ticks burn the idle quantum and switch to A.
    sched.timer_tick(&mut frame);
    sched.timer_tick(&mut frame);
    assert_eq!(sched.current(), Some(a));
    assert_eq!(frame.eip as usize, ENTRY_A);
    let switches_before = sched.stats().context_switches;

    // A runs its full quantum of two ticks, then B takes over.
    sched.timer_tick(&mut frame);
    assert_eq!(sched.current(), Some(a), "one tick must not preempt");
    sched.timer_tick(&mut frame);

    assert_eq!(sched.current(), Some(b));
    assert_eq!(sched.state_of(a), Some(ProcessState::Ready));
    assert_eq!(sched.state_of(b), Some(ProcessState::Running));
    assert_eq!(sched.stats().context_switches, switches_before + 1);
    assert_eq!(frame.eip as usize, ENTRY_B);
    assert_eq!(sched.process(b).unwrap().quantum, QUANTUM_TICKS);
}

#[test]
fn test_exactly_one_process_is_running() {
    let (mut sched, mut frame) = fresh();
    sched.admit("task-a", ENTRY_A, 0, 0).unwrap();
    sched.admit("task-b", ENTRY_B, 0, 0).unwrap();

    for _ in 0..20 {
        sched.timer_tick(&mut frame);
        assert_eq!(running_count(&sched), 1);
    }
}

#[test]
fn test_switch_saves_and_restores_register_banks() {
    let (mut sched, mut frame) = fresh();
    let a = sched.admit("task-a", ENTRY_A, 0, 0).unwrap();

    // Switch idle -> A, dirty A's live registers, then force a switch away
    // and back again.
    sched.schedule(&mut frame);
    assert_eq!(sched.current(), Some(a));
    frame.eax = 0x1234_5678;
    frame.eip = 0x1111_2222;

    sched.schedule(&mut frame); // A -> idle
    assert_eq!(sched.current(), Some(0));
    assert_eq!(sched.process(a).unwrap().saved_frame.eax, 0x1234_5678);

    sched.schedule(&mut frame); // idle -> A
    assert_eq!(sched.current(), Some(a));
    assert_eq!(frame.eax, 0x1234_5678);
    assert_eq!(frame.eip, 0x1111_2222);
}

#[test]
fn test_sleeping_process_wakes_at_or_after_deadline() {
    let (mut sched, mut frame) = fresh();
    let a = sched.admit("task-a", ENTRY_A, 0, 0).unwrap();

    // Bring A onto the CPU, then put it to sleep for three ticks.
    sched.timer_tick(&mut frame);
    sched.timer_tick(&mut frame);
    assert_eq!(sched.current(), Some(a));

    let deadline = sched.ticks() + 3;
    sched.sleep_current(deadline);
    sched.schedule(&mut frame);
    assert_eq!(sched.state_of(a), Some(ProcessState::Blocked));
    assert_eq!(sched.current(), Some(0));

    // Tick until A is back; the wakeup must not fire early.
    let mut woke_at = None;
    for _ in 0..10 {
        sched.timer_tick(&mut frame);
        if sched.current() == Some(a) {
            woke_at = Some(sched.ticks());
            break;
        }
        assert!(
            sched.ticks() >= deadline || sched.state_of(a) == Some(ProcessState::Blocked),
            "process woke before its deadline"
        );
    }

    let woke_at = woke_at.expect("sleeper never woke");
    assert!(woke_at >= deadline);
    assert_eq!(sched.state_of(a), Some(ProcessState::Running));
}

#[test]
fn test_exit_wait_reap_cycle() {
    let (mut sched, mut frame) = fresh();

    let parent = sched.admit("parent", ENTRY_A, 0, 0).unwrap();
    sched.schedule(&mut frame);
    assert_eq!(sched.current(), Some(parent));

    let child = sched.admit("child", ENTRY_B, 0, 0).unwrap();
    assert_eq!(sched.process(child).unwrap().parent, Some(parent));

    // No exited child yet: the parent blocks in WAITING.
    assert_eq!(sched.wait_current(), WaitResult::Blocked);
    assert_eq!(sched.state_of(parent), Some(ProcessState::Waiting));

    // The child runs and exits; the waiting parent is woken.
    sched.schedule(&mut frame);
    assert_eq!(sched.current(), Some(child));
    sched.exit_current(7);
    assert_eq!(sched.state_of(child), Some(ProcessState::Zombie));
    assert_eq!(sched.state_of(parent), Some(ProcessState::Ready));

    // Walk the CPU back to the parent, which reaps on its retry.
    sched.schedule(&mut frame);
    while sched.current() != Some(parent) {
        sched.schedule(&mut frame);
    }
    assert_eq!(sched.wait_current(), WaitResult::Reaped(child));
    assert_eq!(sched.state_of(child), Some(ProcessState::Terminated));
    assert_eq!(sched.process(child).unwrap().exit_code, 7);

    // Everything reaped: a further wait has nothing to wait for.
    assert_eq!(sched.wait_current(), WaitResult::NoChildren);
}

#[test]
fn test_wait_without_children() {
    let (mut sched, _) = fresh();
    assert_eq!(sched.wait_current(), WaitResult::NoChildren);
    assert_eq!(sched.state_of(0), Some(ProcessState::Running));
}

#[test]
fn test_signal_wakes_blocked_process() {
    let (mut sched, mut frame) = fresh();
    let a = sched.admit("task-a", ENTRY_A, 0, 0).unwrap();

    sched.timer_tick(&mut frame);
    sched.timer_tick(&mut frame);
    assert_eq!(sched.current(), Some(a));
    sched.sleep_current(sched.ticks() + 100);
    sched.schedule(&mut frame);
    assert_eq!(sched.state_of(a), Some(ProcessState::Blocked));

    assert!(sched.deliver_signal(a, 5));
    assert_eq!(sched.state_of(a), Some(ProcessState::Ready));
    assert_eq!(sched.process(a).unwrap().signals_pending, 1 << 5);
}

#[test]
fn test_signal_rejects_bad_targets() {
    let (mut sched, _) = fresh();

    assert!(!sched.deliver_signal(MAX_PROCESSES, 1));
    assert!(!sched.deliver_signal(7, 1), "no process in slot 7");
    assert!(!sched.deliver_signal(0, 32), "signal number out of range");
}

#[test]
fn test_terminated_slot_is_reused() {
    let (mut sched, mut frame) = fresh();

    let parent = sched.admit("parent", ENTRY_A, 0, 0).unwrap();
    sched.schedule(&mut frame);
    let child = sched.admit("child", ENTRY_B, 0, 0).unwrap();

    // Run the child to exit, then reap it from the parent.
    sched.schedule(&mut frame);
    assert_eq!(sched.current(), Some(child));
    sched.exit_current(0);
    while sched.current() != Some(parent) {
        sched.schedule(&mut frame);
    }
    assert_eq!(sched.wait_current(), WaitResult::Reaped(child));

    // The tombstone slot is handed out again.
    let reused = sched.admit("task-new", ENTRY_A, 0, 0).unwrap();
    assert_eq!(reused, child);
    assert_eq!(sched.state_of(reused), Some(ProcessState::Ready));

    // And the revived process is schedulable.
    sched.schedule(&mut frame);
    let mut seen = false;
    for _ in 0..MAX_PROCESSES {
        if sched.current() == Some(reused) {
            seen = true;
            break;
        }
        sched.schedule(&mut frame);
    }
    assert!(seen, "reused slot never got the CPU");
}
