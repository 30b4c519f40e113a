//! Kernel thread control blocks and the naked-asm stack bootstrap that lets
//! a freshly spawned thread be context-switched into for the first time
//! exactly like any other (the `task_switch` routine in [`super::scheduler`]
//! never needs to know whether a thread has run before).

use super::process::{Process, ThreadId};
use crate::error::KernelError;
use crate::sync::WakeReason;
use alloc::{string::String, sync::Arc};
use util::mutex::Mutex;
use x86_64::memory::{region::VirtualMemoryRegion, Address};

pub type ThreadEntryFunc = extern "C" fn();

/// Convenience bands a caller picks from when spawning a thread; mapped to
/// the numeric `pri` spec §4.5 actually schedules on (lower = higher
/// priority, two bands: kernel priority 50, user priority 100).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum ThreadPriority {
    Idle,
    Low,
    Normal,
    High,
}

impl ThreadPriority {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }

    /// Numeric `pri` value the run-queue actually orders on (spec §4.5:
    /// "lower `pri` value = higher priority"; kernel threads at 50, user
    /// threads at 100). `Idle` sits below every real priority so the
    /// per-CPU idle thread is always the last resort.
    pub fn as_pri(self) -> u8 {
        match self {
            ThreadPriority::High => 50,
            ThreadPriority::Normal => 100,
            ThreadPriority::Low => 120,
            ThreadPriority::Idle => 255,
        }
    }
}

/// Spec §3 thread states. `Paused` is spec's RUNNING-but-preempted/ready
/// state (named PAUSED in the spec's own preemption scenario, §8 scenario
/// 5); `Ready` would be equally apt but we keep the spec's own word so the
/// state machine reads the same as the prose it's grounded on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadRunState {
    Running,
    Paused,
    Waiting,
    Stopped,
    Zombie,
}

/// The 144-byte register frame [`super::scheduler::task_switch`] expects at
/// the top of a thread's kernel stack: sixteen pushed GPRs/rflags plus the
/// return address `ret` pops after `restore_state!`. For a thread that has
/// never run, this is hand-built by [`Thread::setup_stack`]; for one that
/// has, it's whatever `task_switch` itself wrote via `mov [rdi], rsp`.
const SWITCH_FRAME_QWORDS: usize = 18;

pub struct Thread {
    id: ThreadId,
    name: String,
    pub process: Arc<Mutex<Process>>,
    stack: VirtualMemoryRegion,
    priority: ThreadPriority,
    /// Numeric scheduling priority actually compared by the run-queue
    /// (spec §4.5). Seeded from `priority` but independently mutable so a
    /// future priority-inheritance scheme has somewhere to write to.
    pri: u8,
    entry: Option<ThreadEntryFunc>,
    state: ThreadRunState,
    last_rsp: u64,
    /// CPUs this thread is allowed to run on (spec §4.5 "affinity masks
    /// gate which CPUs may run a given thread"). Bit `i` set means CPU
    /// `i` is allowed; all bits set is "any CPU".
    affinity: u64,
    /// Which per-CPU run-queue this thread currently sits on, if any
    /// (spec §3 "`runq = nullptr` means not runnable").
    runq_cpu: Option<u32>,
    /// Nesting level of the trap frame this thread was last interrupted
    /// at (spec §4.5 `tf_nest_level`): 1 means it was running at user
    /// level, >1 means it was already inside a nested kernel-mode trap.
    /// Only a thread at level <= 1 is a safe work-steal candidate (spec
    /// §4.5 "refused when nested inside kernel mode on a different CPU").
    kernel_nest_level: u8,
    /// Absolute monotonic deadline this thread is parked until, if it is
    /// waiting with a timeout (spec §3, §5).
    wait_deadline: Option<u64>,
    pending_signals: u64,
    blocked_signals: u64,
    /// Recorded by [`super::scheduler::Scheduler::wake`] the moment this
    /// thread is taken off `blocked_threads`, and consumed by
    /// [`crate::sync::WaitQueue::wait`] as soon as this thread runs again
    /// (spec §5 "woken with a result code"). `None` until a wake actually
    /// happens; a thread that never blocked never reads it.
    wake_reason: Option<WakeReason>,
}

impl Thread {
    pub fn new<N>(
        id: ThreadId,
        name: N,
        process: Arc<Mutex<Process>>,
        stack: VirtualMemoryRegion,
        priority: ThreadPriority,
        entry: ThreadEntryFunc,
    ) -> Self
    where
        N: Into<String>,
    {
        Self {
            id,
            name: name.into(),
            process,
            stack,
            priority,
            pri: priority.as_pri(),
            entry: Some(entry),
            state: ThreadRunState::Paused,
            last_rsp: 0,
            affinity: u64::MAX,
            runq_cpu: None,
            kernel_nest_level: 1,
            wait_deadline: None,
            pending_signals: 0,
            blocked_signals: 0,
            wake_reason: None,
        }
    }

    /// The bootstrap thread for the currently executing context (the
    /// "colonel" kernel thread). It never goes through [`Self::setup_stack`]
    /// because it is already running on the stack it was given.
    pub fn colonel_thread<N>(
        id: ThreadId,
        name: N,
        process: Arc<Mutex<Process>>,
        stack: VirtualMemoryRegion,
    ) -> Self
    where
        N: Into<String>,
    {
        Self {
            id,
            name: name.into(),
            process,
            stack,
            priority: ThreadPriority::Normal,
            pri: ThreadPriority::Normal.as_pri(),
            entry: None,
            state: ThreadRunState::Running,
            last_rsp: 0,
            affinity: u64::MAX,
            runq_cpu: Some(0),
            kernel_nest_level: 1,
            wait_deadline: None,
            pending_signals: 0,
            blocked_signals: 0,
            wake_reason: None,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> ThreadPriority {
        self.priority
    }

    pub fn pri(&self) -> u8 {
        self.pri
    }

    pub fn state(&self) -> ThreadRunState {
        self.state
    }

    pub fn set_state(&mut self, state: ThreadRunState) {
        self.state = state;
    }

    pub fn affinity(&self) -> u64 {
        self.affinity
    }

    pub fn set_affinity(&mut self, mask: u64) {
        self.affinity = mask;
    }

    pub fn may_run_on(&self, cpu_id: u32) -> bool {
        self.affinity & (1 << cpu_id) != 0
    }

    pub fn runq_cpu(&self) -> Option<u32> {
        self.runq_cpu
    }

    pub fn set_runq_cpu(&mut self, cpu: Option<u32>) {
        self.runq_cpu = cpu;
    }

    pub fn kernel_nest_level(&self) -> u8 {
        self.kernel_nest_level
    }

    pub fn set_kernel_nest_level(&mut self, level: u8) {
        self.kernel_nest_level = level;
    }

    pub fn wait_deadline(&self) -> Option<u64> {
        self.wait_deadline
    }

    pub fn set_wait_deadline(&mut self, deadline: Option<u64>) {
        self.wait_deadline = deadline;
    }

    /// Called by [`super::scheduler::Scheduler::wake`] right before
    /// requeuing this thread, so `WaitQueue::wait` can tell a normal
    /// signal from a timeout sweep or a signal-delivery interrupt apart
    /// once it runs again.
    pub fn set_wake_reason(&mut self, reason: WakeReason) {
        self.wake_reason = Some(reason);
    }

    /// Reads and clears the recorded wake reason. `None` means this thread
    /// was never moved off `blocked_threads` by `Scheduler::wake` since the
    /// last time it was read — the caller defaults to `WakeReason::Normal`.
    pub fn take_wake_reason(&mut self) -> Option<WakeReason> {
        self.wake_reason.take()
    }

    pub fn raise_signal(&mut self, signum: u32) {
        self.pending_signals |= 1 << signum;
    }

    pub fn set_blocked_signals(&mut self, mask: u64) {
        self.blocked_signals = mask;
    }

    /// The next signal this thread should take delivery of on its return
    /// to user mode, if any is pending and not currently blocked (spec
    /// §4.6 "delivery checkpoint runs on the return-to-user-mode path").
    pub fn next_deliverable_signal(&self) -> Option<u32> {
        let deliverable = self.pending_signals & !self.blocked_signals;
        if deliverable == 0 {
            None
        } else {
            Some(deliverable.trailing_zeros())
        }
    }

    pub fn clear_signal(&mut self, signum: u32) {
        self.pending_signals &= !(1 << signum);
    }

    pub fn cr3(&self) -> u64 {
        self.process.lock().cr3()
    }

    pub fn last_stack_ptr(&self) -> u64 {
        self.last_rsp
    }

    pub fn last_stack_ptr_mut(&mut self) -> *mut u64 {
        &mut self.last_rsp
    }

    /// Writes the register frame `task_switch` expects to find the first
    /// time this thread is switched to, so that `restore_state!` followed
    /// by `ret` lands at the thread's entry point instead of a real
    /// caller. Must be called exactly once, before the thread is ever
    /// handed to the scheduler.
    pub unsafe fn setup_stack(&mut self) {
        let entry = self
            .entry
            .expect("setup_stack called on a thread with no entry point (colonel thread?)");

        let top = self.stack.end().inner_as_mut_ptr();
        // reserve the frame below the stack's top address
        let frame = top.sub(SWITCH_FRAME_QWORDS);

        // zero every saved GPR/rflags slot; a freshly spawned thread has no
        // meaningful prior register state.
        for i in 0..SWITCH_FRAME_QWORDS - 1 {
            frame.add(i).write(0);
        }
        // rflags: interrupts enabled (bit 9).
        frame.add(SWITCH_FRAME_QWORDS - 2).write(0x202);
        // the slot `ret` pops after `restore_state!` finishes unwinding.
        frame
            .add(SWITCH_FRAME_QWORDS - 1)
            .write(entry as usize as u64);

        self.last_rsp = frame as u64;
    }

    /// Releases the resources owned by a finished thread. The stack region
    /// itself is torn down by its own `Drop` impl once this `Thread` is
    /// dropped by the finalizer.
    pub fn finalize(&mut self) -> Result<(), KernelError> {
        Ok(())
    }
}

/// Ends the calling kernel thread for good. Equivalent to spec §4.6 "a
/// thread on exit moves to ZOMBIE"; reaping is left to the finalizer
/// thread ([`crate::housekeeping_threads::spawn_finalizer_thread`]).
pub fn leave_thread() -> ! {
    super::scheduler::Scheduler::finish_current_thread()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bands_match_spec_two_band_model() {
        assert!(ThreadPriority::High.as_pri() < ThreadPriority::Normal.as_pri());
        assert!(ThreadPriority::Normal.as_pri() < ThreadPriority::Low.as_pri());
        assert!(ThreadPriority::Low.as_pri() < ThreadPriority::Idle.as_pri());
    }

    #[test]
    fn signal_delivery_respects_block_mask() {
        let mut pending = 0u64;
        let mut blocked = 0u64;
        pending |= 1 << 5;
        blocked |= 1 << 5;
        let deliverable = pending & !blocked;
        assert_eq!(deliverable, 0);
    }

    /// `Scheduler::take_wake_reason` relies on `Option::take` to hand the
    /// reason to exactly one `WaitQueue::wait` call and leave the slot
    /// clear for the next time this thread blocks (spec §5 "a thread
    /// blocked on a wait-queue can be woken with a result code").
    #[test]
    fn wake_reason_is_consumed_once() {
        let mut slot: Option<WakeReason> = None;
        assert_eq!(slot.take(), None);

        slot = Some(WakeReason::TimedOut);
        assert_eq!(slot.take(), Some(WakeReason::TimedOut));
        assert_eq!(slot, None);
    }
}
